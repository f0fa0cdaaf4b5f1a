use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::BufMut;
use cookie::{Cookie, SameSite};
use futures::TryStreamExt;
use http::{header, StatusCode, Uri};
use serde::Deserialize;
use warp::filters::method;
use warp::multipart::FormData;
use warp::reject::Reject;
use warp::reply::{self, Response};
use warp::{filters, Filter, Rejection, Reply};

use crate::config::Config;
use crate::error::{Error, ErrorCell};
use crate::models::Direction;
use crate::storage::{DiskStore, FileStore};
use crate::ui::Flash;
use crate::{accounts, crypto, database, links, models, ui, Result};

pub const COOKIE_NAME : &str = "bio-token";
pub const FLASH_COOKIE : &str = "flash";

const FORM_LIMIT : u64 = 16 * 1024;

type BoxReply = Box<dyn Reply>;
type DynReply = std::result::Result<BoxReply, Infallible>;

pub struct ServerInner {
    pub server_name :      String,
    pub token_secret :     Vec<u8>,
    pub session_length :   Duration,
    pub max_upload_bytes : u64,
    pub db :               database::Db,
    pub files :            Box<dyn FileStore>,
    pub render :           ui::Renderer,
}

pub type Server = Arc<ServerInner>;

impl ServerInner {
    pub fn new(config : &Config) -> Result<Self> {
        Ok(Self {
            server_name :      config.server_name.clone(),
            token_secret :     config.secret_key.clone(),
            session_length :   config.session_length,
            max_upload_bytes : config.max_upload_bytes,
            db :               database::Db::new(&config.database_path)?,
            files :            Box::new(DiskStore::new(&config.upload_dir)?),
            render :           ui::Renderer::new()?,
        })
    }
}

fn with_server(
    server : &Server,
) -> impl Filter<Extract = (Server,), Error = Infallible> + Clone {
    let server = Arc::clone(server);
    warp::any().map(move || Arc::clone(&server))
}

fn with_authn(
    server : &Server,
) -> impl Filter<Extract = (models::User,), Error = Rejection> + Clone {
    with_server(server)
        .and(filters::cookie::optional::<String>(COOKIE_NAME))
        .and_then(|server : Server, cookie : Option<String>| async move {
            session_user(&server, cookie.as_deref())
                .await
                .map_err(Rejection::from)
        })
}

/// The user a session cookie belongs to. Anything wrong with the cookie,
/// including a user that no longer exists, means "not logged in".
async fn session_user(
    server : &ServerInner,
    cookie : Option<&str>,
) -> Result<models::User> {
    let value = cookie.ok_or(Error::Unauthenticated)?;

    let tok = crypto::Token::validate(
        value,
        &server.token_secret,
        &server.server_name,
    )
    .map_err(|_| Error::Unauthenticated)?;

    let user_id = tok.user_id().ok_or(Error::Unauthenticated)?;

    match server.db.get_user(user_id).await {
        Ok(user) => Ok(user),
        Err(Error::NotFound(_)) => Err(Error::Unauthenticated),
        Err(err) => Err(err),
    }
}

macro_rules! handler {
    ($name:ident ( $($aname:ident : $atype:ty),*) $body:block) => {
        pub fn $name (
            $(
                $aname : $atype,
            )*
        ) -> impl Filter<Extract = (BoxReply,) , Error = Rejection> + Clone {
            $body
        }
    }
}

macro_rules! handler_or{
    ($head:expr $(, $tail:expr)*) => {
        $head
        $(
            .or($tail)
            .unify()
            .boxed()
        )*
    };
    ($head:expr $(, $tail:expr)*,) => {
        handler_or!($head $(, $tail)*)
    }
}

pub fn routes(
    server : &Server,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    handler_or!(
        get_index(server),
        get_default_picture(server),
        get_uploads(server),
        get_login(server),
        post_login(server),
        get_register(server),
        post_register(server),
        post_logout(),
        get_admin(server),
        post_profile(server),
        post_picture(server),
        post_add_link(server),
        post_update_link(server),
        post_delete_link(server),
        post_move_link(server),
        get_profile(server),
    )
    .recover(|err : Rejection| async move {
        Ok::<_, Rejection>(rejection_error(&err))
    })
    .with(warp::log::custom(|info| {
        tracing::info!(
            "{} {} {} in {:?}",
            info.status(),
            info.method(),
            info.path(),
            info.elapsed()
        );
    }))
}

fn rejection_error(err : &Rejection) -> Error {
    use Error::*;

    if let Some(cell) = err.find::<ErrorCell>() {
        cell.take().unwrap_or(Internal)
    } else if err.is_not_found()
        || err.find::<warp::reject::MethodNotAllowed>().is_some()
    {
        RouteNotFound
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        Validation("the request is too large".to_string())
    } else {
        tracing::debug!("rejected: {:?}", err);
        BadRequest
    }
}

fn session_cookie(token : String, length : Duration) -> Cookie<'static> {
    let secs = i64::try_from(length.as_secs()).unwrap_or(i64::MAX);

    Cookie::build(COOKIE_NAME, token)
        .http_only(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(cookie::time::Duration::seconds(secs))
        .finish()
}

fn removal_cookie(name : &'static str, path : &'static str) -> Cookie<'static> {
    Cookie::build(name, "")
        .http_only(true)
        .same_site(SameSite::Strict)
        .path(path)
        .max_age(cookie::time::Duration::ZERO)
        .finish()
}

fn see_other(location : &'static str, cookie : Option<Cookie>) -> BoxReply {
    let redirect = warp::redirect::see_other(Uri::from_static(location));

    match cookie {
        Some(cookie) => Box::new(reply::with_header(
            redirect,
            header::SET_COOKIE,
            cookie.to_string(),
        )),
        None => Box::new(redirect),
    }
}

fn html_status(html : String, status : StatusCode) -> BoxReply {
    Box::new(reply::with_status(reply::html(html), status))
}

fn start_session(server : &ServerInner, user : &models::User) -> DynReply {
    let tok = crypto::Token::for_user(&server.server_name, user.id)
        .issue(&server.token_secret, server.session_length);

    let tok = match tok {
        Ok(tok) => tok,
        Err(err) => return Ok(Box::new(err)),
    };

    Ok(see_other(
        "/admin",
        Some(session_cookie(tok, server.session_length)),
    ))
}

/// Answers a dashboard form post: back to the dashboard, with the outcome
/// in a flash cookie. Failures the user can act on become messages, the
/// rest become error pages.
fn back_to_admin(res : Result<Flash>) -> DynReply {
    let flash = match res {
        Ok(flash) => flash,
        Err(err) if err.is_user_facing() => Flash::danger(err.to_string()),
        Err(err) => return Ok(Box::new(err)),
    };

    let cookie = match serde_urlencoded::to_string(&flash) {
        Ok(value) => Cookie::build(FLASH_COOKIE, value)
            .http_only(true)
            .same_site(SameSite::Strict)
            .path("/admin")
            .finish(),
        Err(err) => {
            tracing::warn!("could not encode flash: {}", err);
            return Ok(see_other("/admin", None));
        },
    };

    Ok(see_other("/admin", Some(cookie)))
}

handler! { get_index (server : &Server) {
    warp::path::end()
        .and(method::get())
        .and(with_server(server))
        .map(|server : Server| -> BoxReply {
            Box::new(reply::html(server.render.index()))
        })
}}

handler! { get_default_picture (server : &Server) {
    warp::path!("static" / "default.svg")
        .and(method::get())
        .and(with_server(server))
        .map(|server : Server| -> BoxReply {
            Box::new(reply::with_header(
                server.render.default_picture(),
                header::CONTENT_TYPE,
                "image/svg+xml",
            ))
        })
}}

handler! { get_uploads (server : &Server) {
    warp::path("uploads")
        .and(method::get())
        .and(warp::fs::dir(server.files.root().to_path_buf()))
        .map(|file : warp::fs::File| -> BoxReply { Box::new(file) })
}}

handler! { get_login (server : &Server) {
    warp::path!("login")
        .and(method::get())
        .and(with_server(server))
        .and_then(|server : Server| async move {
            login_page(&server, None, "")
        })
}}

fn login_page(
    server : &ServerInner,
    error : Option<&str>,
    username : &str,
) -> DynReply {
    let status = if error.is_some() {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::OK
    };

    match server.render.login(error, username) {
        Ok(html) => Ok(html_status(html, status)),
        Err(err) => Ok(Box::new(err)),
    }
}

handler! { post_login (server : &Server) {
    #[derive(Deserialize)]
    struct Req {
        username : String,
        password : String,
    }

    warp::path!("login")
        .and(method::post())
        .and(with_server(server))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(filters::body::form())
        .and_then(|server : Server, body : Req| async move {
            login(&server, &body.username, &body.password).await
        })
}}

async fn login(
    server : &ServerInner,
    username : &str,
    password : &str,
) -> DynReply {
    match accounts::authenticate(&server.db, username, password).await {
        Ok(Some(user)) => start_session(server, &user),
        Ok(None) => {
            login_page(server, Some(&Error::FailedLogin.to_string()), username)
        },
        Err(err) => Ok(Box::new(err)),
    }
}

handler! { get_register (server : &Server) {
    warp::path!("register")
        .and(method::get())
        .and(with_server(server))
        .and_then(|server : Server| async move {
            register_page(&server, None, "", "", StatusCode::OK)
        })
}}

fn register_page(
    server : &ServerInner,
    error : Option<&str>,
    username : &str,
    display_name : &str,
    status : StatusCode,
) -> DynReply {
    match server.render.register(error, username, display_name) {
        Ok(html) => Ok(html_status(html, status)),
        Err(err) => Ok(Box::new(err)),
    }
}

#[derive(Deserialize)]
struct RegisterForm {
    username :         String,
    #[serde(default)]
    display_name :     String,
    password :         String,
    password_confirm : String,
}

handler! { post_register (server : &Server) {
    warp::path!("register")
        .and(method::post())
        .and(with_server(server))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(filters::body::form())
        .and_then(|server : Server, body : RegisterForm| async move {
            register(&server, body).await
        })
}}

/// A failed registration shows the form again with the message and what
/// was typed, except the passwords.
async fn register(server : &ServerInner, body : RegisterForm) -> DynReply {
    let res = accounts::register(
        &server.db,
        &body.username,
        &body.display_name,
        &body.password,
        &body.password_confirm,
    )
    .await;

    let err = match res {
        Ok(user) => return start_session(server, &user),
        Err(err) => err,
    };

    let status = match err {
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        _ => return Ok(Box::new(err)),
    };

    register_page(
        server,
        Some(&err.to_string()),
        &body.username,
        &body.display_name,
        status,
    )
}

handler! { post_logout () {
    warp::path!("logout")
        .and(method::post())
        .map(|| see_other("/login", Some(removal_cookie(COOKIE_NAME, "/"))))
}}

handler! { get_admin (server : &Server) {
    warp::path!("admin")
        .and(method::get())
        .and(with_authn(server))
        .and(with_server(server))
        .and(filters::cookie::optional::<String>(FLASH_COOKIE))
        .and_then(|
            user : models::User,
            server : Server,
            flash : Option<String>
        | admin_page(server, user, flash))
}}

async fn admin_page(
    server : Server,
    user : models::User,
    flash : Option<String>,
) -> DynReply {
    let flash =
        flash.and_then(|s| serde_urlencoded::from_str::<Flash>(&s).ok());

    let links = match links::list_links(&server.db, &user).await {
        Ok(links) => links,
        Err(err) => return Ok(Box::new(err)),
    };

    let html = match server.render.admin(&user, &links, flash.as_ref()) {
        Ok(html) => html,
        Err(err) => return Ok(Box::new(err)),
    };

    if flash.is_none() {
        return Ok(Box::new(reply::html(html)));
    }

    Ok(Box::new(reply::with_header(
        reply::html(html),
        header::SET_COOKIE,
        removal_cookie(FLASH_COOKIE, "/admin").to_string(),
    )))
}

handler! { post_profile (server : &Server) {
    #[derive(Deserialize)]
    struct Req {
        #[serde(default)]
        display_name : String,
        #[serde(default)]
        bio :          String,
    }

    warp::path!("admin" / "profile")
        .and(method::post())
        .and(with_authn(server))
        .and(with_server(server))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(filters::body::form())
        .and_then(|
            user : models::User,
            server : Server,
            body : Req
        | async move {
            let res = accounts::update_profile(
                &server.db,
                &user,
                &body.display_name,
                &body.bio,
            )
            .await
            .map(|_| Flash::success("Profile saved."));

            back_to_admin(res)
        })
}}

handler! { post_picture (server : &Server) {
    warp::path!("admin" / "picture")
        .and(method::post())
        .and(with_authn(server))
        .and(with_server(server))
        .and(warp::multipart::form().max_length(server.max_upload_bytes))
        .and_then(|
            user : models::User,
            server : Server,
            form : FormData
        | async move {
            back_to_admin(upload_picture(&server, &user, form).await)
        })
}}

async fn upload_picture(
    server : &ServerInner,
    user : &models::User,
    form : FormData,
) -> Result<Flash> {
    let (filename, bytes) = read_picture(form).await?;

    accounts::replace_profile_picture(
        &server.db,
        server.files.as_ref(),
        user,
        &bytes,
        &filename,
    )
    .await?;

    Ok(Flash::success("Picture updated."))
}

/// Contents and client-side name of the `picture` field.
async fn read_picture(form : FormData) -> Result<(String, Vec<u8>)> {
    let mut form = Box::pin(form);

    while let Some(part) = form.try_next().await? {
        if part.name() != "picture" {
            continue;
        }

        let filename = part.filename().unwrap_or_default().to_string();

        let bytes = part
            .stream()
            .try_fold(Vec::<u8>::new(), |mut acc, buf| async move {
                acc.put(buf);
                Ok::<_, warp::Error>(acc)
            })
            .await?;

        return Ok((filename, bytes));
    }

    Err(Error::Validation("no picture was sent".to_string()))
}

#[derive(Deserialize)]
struct LinkForm {
    #[serde(default)]
    title : String,
    #[serde(default)]
    url :   String,
}

handler! { post_add_link (server : &Server) {
    warp::path!("admin" / "links")
        .and(method::post())
        .and(with_authn(server))
        .and(with_server(server))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(filters::body::form())
        .and_then(|
            user : models::User,
            server : Server,
            body : LinkForm
        | async move {
            let res =
                links::add_link(&server.db, &user, &body.title, &body.url)
                    .await
                    .map(|_| Flash::success("Link added."));

            back_to_admin(res)
        })
}}

handler! { post_update_link (server : &Server) {
    warp::path!("admin" / "links" / u32)
        .and(method::post())
        .and(with_authn(server))
        .and(with_server(server))
        .and(warp::body::content_length_limit(FORM_LIMIT))
        .and(filters::body::form())
        .and_then(|
            link_id : u32,
            user : models::User,
            server : Server,
            body : LinkForm
        | async move {
            let res = links::update_link(
                &server.db,
                &user,
                link_id,
                &body.title,
                &body.url,
            )
            .await
            .map(|_| Flash::success("Link saved."));

            back_to_admin(res)
        })
}}

handler! { post_delete_link (server : &Server) {
    warp::path!("admin" / "links" / u32 / "delete")
        .and(method::post())
        .and(with_authn(server))
        .and(with_server(server))
        .and_then(|
            link_id : u32,
            user : models::User,
            server : Server
        | async move {
            let res = links::delete_link(&server.db, &user, link_id)
                .await
                .map(|_| Flash::success("Link removed."));

            back_to_admin(res)
        })
}}

handler! { post_move_link (server : &Server) {
    warp::path!("admin" / "links" / u32 / "up")
        .map(|id| (id, Direction::Up))
        .or(warp::path!("admin" / "links" / u32 / "down")
            .map(|id| (id, Direction::Down)))
        .unify()
        .and(method::post())
        .and(with_authn(server))
        .and(with_server(server))
        .and_then(|
            (link_id, direction) : (u32, Direction),
            user : models::User,
            server : Server
        | async move {
            let res = links::move_link(&server.db, &user, link_id, direction)
                .await
                .map(|_| Flash::success("Link moved."));

            back_to_admin(res)
        })
}}

handler! { get_profile (server : &Server) {
    warp::path::param::<String>()
        .and(warp::path::end())
        .and(method::get())
        .and_then(|username : String| async move {
            if accounts::RESERVED_NAMES.contains(&username.as_str()) {
                Err(warp::reject::not_found())
            } else {
                Ok(username)
            }
        })
        .and(with_server(server))
        .and_then(|username : String, server : Server| async move {
            profile_page(&server, &username).await
        })
}}

async fn profile_page(server : &ServerInner, username : &str) -> DynReply {
    let profile = match accounts::get_profile(&server.db, username).await {
        Ok(profile) => profile,
        Err(err) => return Ok(Box::new(err)),
    };

    match server.render.profile(&profile) {
        Ok(html) => Ok(Box::new(reply::html(html))),
        Err(err) => Ok(Box::new(err)),
    }
}

impl Reject for ErrorCell {}

impl From<Error> for Rejection {
    fn from(err : Error) -> Rejection {
        warp::reject::custom(ErrorCell::new(err))
    }
}

impl Reply for Error {
    fn into_response(self) -> Response {
        use http::StatusCode as S;
        use Error::*;

        let status = match &self {
            Validation(_) | BadRequest => S::BAD_REQUEST,
            Conflict(_) => S::CONFLICT,
            NotFound(_) | RouteNotFound => S::NOT_FOUND,
            Forbidden(_) => S::FORBIDDEN,
            InvalidFileType(_) => S::UNSUPPORTED_MEDIA_TYPE,
            FailedLogin => S::UNAUTHORIZED,
            Unauthenticated => {
                return warp::redirect::see_other(Uri::from_static("/login"))
                    .into_response()
            },
            _ => {
                tracing::error!("{}", self);
                return reply::with_status(
                    "internal server error",
                    S::INTERNAL_SERVER_ERROR,
                )
                .into_response();
            },
        };

        tracing::debug!(%status, "{}", self);

        reply::with_status(self.to_string(), status).into_response()
    }
}
