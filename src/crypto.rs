use std::time;

use jsonwebtoken as jwt;
use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub fn encode_password(pass : &[u8]) -> Result<String> {
    let mut salt = [0; 32];
    thread_rng().fill(&mut salt);

    Ok(argon2::hash_encoded(pass, &salt, &Default::default())?)
}

pub fn verify_password(encoded : &str, pass : &[u8]) -> Result<bool> {
    Ok(argon2::verify_encoded(encoded, pass)?)
}

/// Key for signing session tokens when none is configured.
pub fn random_secret() -> Vec<u8> {
    let mut secret = vec![0; 64];
    thread_rng().fill(&mut secret[..]);
    secret
}

/// Session token claims. `sub` is the user id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub iss : String,
    pub aud : String,
    pub sub : String,
}

#[derive(Serialize, Deserialize)]
struct TokenFull {
    iss : String,
    aud : String,
    sub : String,
    iat : u64,
    exp : u64,
}

impl Token {
    pub fn for_user(server_name : &str, user_id : u32) -> Self {
        Self {
            iss : server_name.to_string(),
            aud : server_name.to_string(),
            sub : user_id.to_string(),
        }
    }

    pub fn issue(
        &self,
        secret : &[u8],
        exp_duration : time::Duration,
    ) -> Result<String> {
        let now = time::SystemTime::now();

        let iat = now.duration_since(time::UNIX_EPOCH)?.as_secs();

        let exp = now
            .checked_add(exp_duration)
            .ok_or_else(|| {
                Error::Config("session length is too long".to_string())
            })?
            .duration_since(time::UNIX_EPOCH)?
            .as_secs();

        let tok = TokenFull {
            iss : self.iss.clone(),
            aud : self.aud.clone(),
            sub : self.sub.clone(),
            iat,
            exp,
        };

        Ok(jwt::encode(
            &jwt::Header::default(),
            &tok,
            &jwt::EncodingKey::from_secret(secret),
        )?)
    }

    /// Checks signature and expiry, and that the token was issued by and
    /// for `server_name`.
    pub fn validate(
        token : &str,
        secret : &[u8],
        server_name : &str,
    ) -> Result<Self> {
        let mut validation = jwt::Validation::new(jwt::Algorithm::HS256);
        validation.set_issuer(&[server_name]);
        validation.set_audience(&[server_name]);

        let tok : TokenFull = jwt::decode(
            token,
            &jwt::DecodingKey::from_secret(secret),
            &validation,
        )?
        .claims;

        Ok(Self {
            iss : tok.iss,
            aud : tok.aud,
            sub : tok.sub,
        })
    }

    pub fn user_id(&self) -> Option<u32> {
        self.sub.parse().ok()
    }
}
