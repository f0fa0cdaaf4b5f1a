use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::{crypto, Error, Result};

#[derive(Clone)]
pub struct Config {
    pub database_path :    PathBuf,
    pub secret_key :       Vec<u8>,
    pub server_name :      String,
    pub bind_addr :        SocketAddr,
    pub upload_dir :       PathBuf,
    pub session_length :   Duration,
    pub max_upload_bytes : u64,
}

const DAY : u64 = 60 * 60 * 24;

fn parse<T>(key : &str, value : Option<String>, default : T) -> Result<T>
where
    T : FromStr,
    T::Err : std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(s) => s
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}: {}", key, e))),
    }
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(get : F) -> Result<Self>
    where
        F : Fn(&str) -> Option<String>,
    {
        let database_url = get("DATABASE_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("DATABASE_URL is not set".to_string())
            })?;

        let database_path : PathBuf = database_url
            .trim()
            .strip_prefix("sqlite://")
            .unwrap_or(database_url.trim())
            .into();

        let secret_key = match get("SECRET_KEY").filter(|s| !s.is_empty()) {
            Some(key) => key.into_bytes(),
            None => {
                tracing::warn!(
                    "SECRET_KEY is not set, sessions will not survive a restart"
                );
                crypto::random_secret()
            },
        };

        let session_days : u64 =
            parse("SESSION_DAYS", get("SESSION_DAYS"), 30)?;
        let session_secs = session_days.checked_mul(DAY).ok_or_else(|| {
            Error::Config("SESSION_DAYS is too large".to_string())
        })?;

        Ok(Config {
            database_path,
            secret_key,
            server_name : get("SERVER_NAME")
                .unwrap_or_else(|| "localhost".to_string()),
            bind_addr : parse(
                "BIND_ADDR",
                get("BIND_ADDR"),
                SocketAddr::from(([127, 0, 0, 1], 3000)),
            )?,
            upload_dir : get("UPLOAD_DIR")
                .unwrap_or_else(|| "uploads".to_string())
                .into(),
            session_length : Duration::from_secs(session_secs),
            max_upload_bytes : parse(
                "MAX_UPLOAD_BYTES",
                get("MAX_UPLOAD_BYTES"),
                5 * 1024 * 1024,
            )?,
        })
    }
}
