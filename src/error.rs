use std::sync::Mutex;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("you do not own {0}")]
    Forbidden(String),
    #[error("file type not allowed: {0}")]
    InvalidFileType(String),
    #[error("invalid username or password")]
    FailedLogin,
    #[error("login required")]
    Unauthenticated,
    #[error("route not found")]
    RouteNotFound,
    #[error("bad request")]
    BadRequest,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("internal server error")]
    Internal,

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("time: {0}")]
    Time(#[from] std::time::SystemTimeError),

    #[error("hyper: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("password hash: {0}")]
    Password(#[from] argon2::Error),

    #[error("token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("template: {0}")]
    Template(#[from] handlebars::RenderError),

    #[error("template: {0}")]
    TemplateSource(#[from] handlebars::TemplateError),

    #[error("request body: {0}")]
    Body(#[from] warp::Error),
}

impl Error {
    /// Errors caused by what the user sent, as opposed to failures of the
    /// server itself. Only these are shown verbatim to the user.
    pub fn is_user_facing(&self) -> bool {
        use Error::*;

        matches!(
            self,
            Validation(_)
                | Conflict(_)
                | NotFound(_)
                | Forbidden(_)
                | InvalidFileType(_)
                | FailedLogin
                | BadRequest
        )
    }
}

/// Carries an [`Error`] through a warp rejection. Rejections are only
/// handed out by reference, so the error is moved out with [`take`].
///
/// [`take`]: ErrorCell::take
#[derive(Debug)]
pub struct ErrorCell(Mutex<Option<Error>>);

impl ErrorCell {
    pub fn new(err : Error) -> Self {
        Self(Mutex::new(Some(err)))
    }

    pub fn take(&self) -> Option<Error> {
        self.0.lock().ok().and_then(|mut err| err.take())
    }
}
