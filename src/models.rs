use std::fmt;

use serde::Serialize;

pub type Time = crate::time_utils::Time;

/// Stored picture name of users who never uploaded one. It is served from
/// the binary, never from the upload directory.
pub const DEFAULT_PICTURE : &str = "default.svg";

#[derive(Clone, Serialize)]
pub struct User {
    pub id :            u32,
    pub username :      String,
    pub display_name :  Option<String>,
    pub bio :           Option<String>,
    #[serde(skip)]
    pub password_hash : Option<String>,
    pub picture :       String,
    pub created :       Time,
}

impl User {
    /// Display name if one is set, the username otherwise.
    pub fn shown_name(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.username,
        }
    }

    pub fn picture_url(&self) -> String {
        if self.picture == DEFAULT_PICTURE {
            format!("/static/{}", DEFAULT_PICTURE)
        } else {
            format!("/uploads/{}", self.picture)
        }
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f : &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("display_name", &self.display_name)
            .field("bio", &self.bio)
            .field(
                "password_hash",
                &self.password_hash.as_ref().map(|_| "<redacted>"),
            )
            .field("picture", &self.picture)
            .field("created", &self.created)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Link {
    pub id :       u32,
    pub user_id :  u32,
    pub title :    String,
    pub url :      String,
    pub position : i64,
    pub created :  Time,
}

/// Everything shown on a public profile page.
#[derive(Debug, Serialize)]
pub struct Profile {
    pub user :  User,
    pub links : Vec<Link>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}
