use rusqlite::{ffi, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::models::{self, Direction};
use crate::{Error, Result};

const SCHEMA : &str = "
CREATE TABLE IF NOT EXISTS usuario (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    username         TEXT NOT NULL UNIQUE,
    nome_de_exibicao TEXT,
    bio              TEXT,
    password_hash    TEXT,
    imagem_perfil    TEXT NOT NULL DEFAULT 'default.svg',
    created          TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS link (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    titulo      TEXT NOT NULL,
    url_destino TEXT NOT NULL,
    posicao     INTEGER NOT NULL DEFAULT 0,
    usuario_id  INTEGER NOT NULL
        REFERENCES usuario (id) ON DELETE CASCADE,
    created     TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS link_usuario_posicao
    ON link (usuario_id, posicao);
";

// extended result codes, see https://www.sqlite.org/rescode.html
const CONSTRAINT_FOREIGNKEY : i64 = 787;
const CONSTRAINT_UNIQUE : i64 = 2067;

fn error_code_match(
    err : &rusqlite::Error,
    code : ffi::ErrorCode,
    ext : i64,
) -> bool {
    matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == code
                && i64::from(e.extended_code) == ext)
}

macro_rules! db_method {
        ($name:ident (
            &$self:ident,
            $conn:ident
            $(, $pname:ident : $ptype:ty)*
        ) -> $ret:ty $body:block ) => {
            pub async fn $name (&$self, $( $pname : $ptype, )* ) -> $ret {
                let $conn = $self.conn.lock().await;
                tokio::task::block_in_place(|| $body)
            }
        }
    }

/// Handle to the user and link tables. Operations take it explicitly; there
/// is no process-wide connection.
pub struct Db {
    conn : Mutex<Connection>,
}

impl Db {
    pub fn new<P : AsRef<std::path::Path>>(p : P) -> Result<Self> {
        Self::with_connection(Connection::open(p)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn : Connection) -> Result<Self> {
        // cascades from usuario to link depend on this, and sqlite turns it
        // off for every new connection
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn : Mutex::new(conn),
        })
    }

    db_method! {insert_user(
        &self,
        conn,
        username : &str,
        display_name : Option<&str>,
        password_hash : Option<&str>
    ) -> Result<models::User> {
        conn
            .prepare_cached(
                "INSERT INTO usuario (username, nome_de_exibicao, password_hash)
                 VALUES (?, ?, ?)"
            )?
            .execute(rusqlite::params![username, display_name, password_hash])
            .map_err(|err| {
                if error_code_match(
                    &err,
                    ffi::ErrorCode::ConstraintViolation,
                    CONSTRAINT_UNIQUE,
                ) {
                    Error::Conflict(format!("username {}", username))
                } else {
                    err.into()
                }
            })?;

        user_by_id(&conn, last_id(&conn)?)
    }}

    db_method! {get_user(&self, conn, user_id : u32) -> Result<models::User> {
        user_by_id(&conn, user_id)
    }}

    db_method! {get_user_by_name(
        &self,
        conn,
        username : &str
    ) -> Result<models::User> {
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM usuario WHERE usuario.username = ?"
            )?;

        let mut rows = stmt.query(rusqlite::params![username])?;

        let row = rows.next()?
            .ok_or_else(|| Error::NotFound(format!("user {}", username)))?;

        Ok(models::User::from_row(row)?)
    }}

    db_method! {update_profile(
        &self,
        conn,
        user_id : u32,
        display_name : &str,
        bio : &str
    ) -> Result<models::User> {
        let n = conn
            .prepare_cached(
                "UPDATE usuario SET nome_de_exibicao = ?, bio = ? WHERE id = ?"
            )?
            .execute(rusqlite::params![display_name, bio, user_id])?;

        if n == 0 {
            return Err(Error::NotFound(format!("user {}", user_id)));
        }

        user_by_id(&conn, user_id)
    }}

    db_method! {set_picture(
        &self,
        conn,
        user_id : u32,
        picture : &str
    ) -> Result<()> {
        let n = conn
            .prepare_cached(
                "UPDATE usuario SET imagem_perfil = ? WHERE id = ?"
            )?
            .execute(rusqlite::params![picture, user_id])?;

        if n == 0 {
            return Err(Error::NotFound(format!("user {}", user_id)));
        }

        Ok(())
    }}

    db_method! {delete_user(&self, conn, user_id : u32) -> Result<()> {
        let tx = conn.unchecked_transaction()?;

        // the link rows go with it through ON DELETE CASCADE
        let n = tx
            .prepare_cached("DELETE FROM usuario WHERE id = ?")?
            .execute(rusqlite::params![user_id])?;

        if n == 0 {
            return Err(Error::NotFound(format!("user {}", user_id)));
        }

        tx.commit()?;
        Ok(())
    }}

    db_method! {insert_link(
        &self,
        conn,
        user_id : u32,
        title : &str,
        url : &str
    ) -> Result<models::Link> {
        conn
            .prepare_cached(
                "INSERT INTO link (titulo, url_destino, posicao, usuario_id)
                 SELECT ?1, ?2, COALESCE(MAX(posicao) + 1, 0), ?3
                 FROM link WHERE usuario_id = ?3"
            )?
            .execute(rusqlite::params![title, url, user_id])
            .map_err(|err| {
                if error_code_match(
                    &err,
                    ffi::ErrorCode::ConstraintViolation,
                    CONSTRAINT_FOREIGNKEY,
                ) {
                    Error::NotFound(format!("user {}", user_id))
                } else {
                    err.into()
                }
            })?;

        link_by_id(&conn, last_id(&conn)?)
    }}

    db_method! {get_link(&self, conn, link_id : u32) -> Result<models::Link> {
        link_by_id(&conn, link_id)
    }}

    db_method! {update_link(
        &self,
        conn,
        owner_id : u32,
        link_id : u32,
        title : &str,
        url : &str
    ) -> Result<models::Link> {
        owned_link(&conn, owner_id, link_id)?;

        conn
            .prepare_cached(
                "UPDATE link SET titulo = ?, url_destino = ? WHERE id = ?"
            )?
            .execute(rusqlite::params![title, url, link_id])?;

        link_by_id(&conn, link_id)
    }}

    db_method! {delete_link(
        &self,
        conn,
        owner_id : u32,
        link_id : u32
    ) -> Result<()> {
        owned_link(&conn, owner_id, link_id)?;

        conn
            .prepare_cached("DELETE FROM link WHERE id = ?")?
            .execute(rusqlite::params![link_id])?;

        Ok(())
    }}

    db_method! {move_link(
        &self,
        conn,
        owner_id : u32,
        link_id : u32,
        direction : Direction
    ) -> Result<Vec<models::Link>> {
        owned_link(&conn, owner_id, link_id)?;

        let mut links = links_of(&conn, owner_id)?;

        let idx = match links.iter().position(|l| l.id == link_id) {
            Some(idx) => idx,
            None => return Err(Error::NotFound(format!("link {}", link_id))),
        };

        let other = match direction {
            Direction::Up if idx > 0 => idx - 1,
            Direction::Down if idx + 1 < links.len() => idx + 1,
            _ => return Ok(links),
        };

        links.swap(idx, other);

        // renumber everything so that ties left by older rows disappear
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("UPDATE link SET posicao = ? WHERE id = ?")?;

            for (pos, link) in links.iter_mut().enumerate() {
                link.position = pos as i64;
                stmt.execute(rusqlite::params![link.position, link.id])?;
            }
        }
        tx.commit()?;

        Ok(links)
    }}

    db_method! {get_links(
        &self,
        conn,
        user_id : u32
    ) -> Result<Vec<models::Link>> {
        links_of(&conn, user_id)
    }}
}

fn last_id(conn : &Connection) -> Result<u32> {
    u32::try_from(conn.last_insert_rowid()).map_err(|_| Error::Internal)
}

fn user_by_id(conn : &Connection, user_id : u32) -> Result<models::User> {
    conn.prepare_cached("SELECT * FROM usuario WHERE usuario.id = ?")?
        .query_row(rusqlite::params![user_id], models::User::from_row)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("user {}", user_id)))
}

fn link_by_id(conn : &Connection, link_id : u32) -> Result<models::Link> {
    conn.prepare_cached("SELECT * FROM link WHERE link.id = ?")?
        .query_row(rusqlite::params![link_id], models::Link::from_row)
        .optional()?
        .ok_or_else(|| Error::NotFound(format!("link {}", link_id)))
}

/// Loads a link for modification by `owner_id`. A link that exists but
/// belongs to someone else is `Forbidden`, not `NotFound`.
fn owned_link(
    conn : &Connection,
    owner_id : u32,
    link_id : u32,
) -> Result<models::Link> {
    let link = link_by_id(conn, link_id)?;

    if link.user_id != owner_id {
        return Err(Error::Forbidden(format!("link {}", link_id)));
    }

    Ok(link)
}

fn links_of(conn : &Connection, user_id : u32) -> Result<Vec<models::Link>> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM link WHERE link.usuario_id = ? ORDER BY posicao, id",
    )?;

    let mut rows = stmt.query(rusqlite::params![user_id])?;

    let mut links = Vec::new();
    while let Some(row) = rows.next()? {
        links.push(models::Link::from_row(row)?);
    }

    Ok(links)
}

trait FromRow: Sized {
    fn from_row(row : &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

macro_rules! impl_from_row {
        ($ty:ty { $($field:ident = $col:literal),* $(,)? }) => {
            impl FromRow for $ty {
                fn from_row(row : &rusqlite::Row<'_>) -> rusqlite::Result<$ty> {
                    Ok(Self{
                    $(
                        $field : row.get($col)?,
                    )*
                    })
                }
            }
        }
    }

impl_from_row! {models::User {
    id = "id",
    username = "username",
    display_name = "nome_de_exibicao",
    bio = "bio",
    password_hash = "password_hash",
    picture = "imagem_perfil",
    created = "created",
}}

impl_from_row! {models::Link {
    id = "id",
    user_id = "usuario_id",
    title = "titulo",
    url = "url_destino",
    position = "posicao",
    created = "created",
}}
