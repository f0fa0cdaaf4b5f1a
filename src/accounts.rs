use std::path::Path;

use crate::database::Db;
use crate::models::{Profile, User, DEFAULT_PICTURE};
use crate::storage::FileStore;
use crate::{crypto, Error, Result};

/// Names that would shadow an application route if used as a profile path.
pub const RESERVED_NAMES : &[&str] =
    &["admin", "api", "login", "logout", "register", "static", "uploads"];

/// Picture extensions accepted on upload, compared case-insensitively.
pub const ALLOWED_EXTENSIONS : &[&str] = &["png", "jpg", "jpeg"];

const MAX_USERNAME : usize = 80;
const MAX_DISPLAY_NAME : usize = 120;
// how much of a rejected upload's name is echoed back
const MAX_SHOWN_FILENAME : usize = 64;

fn check_username(username : &str) -> Result<()> {
    if username.is_empty() {
        return Err(Error::Validation("username is required".to_string()));
    }

    if username.chars().count() > MAX_USERNAME {
        return Err(Error::Validation(format!(
            "username is longer than {} characters",
            MAX_USERNAME
        )));
    }

    let allowed = |c : char| c.is_ascii_alphanumeric() || "_.-".contains(c);
    if !username.chars().all(allowed) {
        return Err(Error::Validation(
            "username may only contain letters, digits, '_', '.' and '-'"
                .to_string(),
        ));
    }

    // "." and ".." never reach the server as a path segment
    if !username.starts_with(|c : char| c.is_ascii_alphanumeric()) {
        return Err(Error::Validation(
            "username must start with a letter or a digit".to_string(),
        ));
    }

    if RESERVED_NAMES.contains(&username) {
        return Err(Error::Validation(format!(
            "the username {} is reserved",
            username
        )));
    }

    Ok(())
}

fn check_display_name(display_name : &str) -> Result<()> {
    if display_name.chars().count() > MAX_DISPLAY_NAME {
        return Err(Error::Validation(format!(
            "display name is longer than {} characters",
            MAX_DISPLAY_NAME
        )));
    }

    Ok(())
}

/// Lowercased extension of `filename` if it is on the allow-list.
pub fn allowed_extension(filename : &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();

    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Some(ext)
    } else {
        None
    }
}

pub async fn register(
    db : &Db,
    username : &str,
    display_name : &str,
    password : &str,
    password_confirm : &str,
) -> Result<User> {
    if password != password_confirm {
        return Err(Error::Validation("passwords do not match".to_string()));
    }

    if password.is_empty() {
        return Err(Error::Validation("password is required".to_string()));
    }

    check_username(username)?;

    let display_name = display_name.trim();
    check_display_name(display_name)?;

    let hash = tokio::task::block_in_place(|| {
        crypto::encode_password(password.as_bytes())
    })?;

    let user = db
        .insert_user(
            username,
            Some(display_name).filter(|s| !s.is_empty()),
            Some(hash.as_str()),
        )
        .await?;

    tracing::info!(user_id = user.id, username = %user.username, "registered");

    Ok(user)
}

/// Returns the user only if it exists, has a password and `password`
/// matches it. Both failure paths hash once, so they take about as long as
/// a successful login.
pub async fn authenticate(
    db : &Db,
    username : &str,
    password : &str,
) -> Result<Option<User>> {
    let user = match db.get_user_by_name(username).await {
        Ok(user) => Some(user),
        Err(Error::NotFound(_)) => None,
        Err(err) => return Err(err),
    };

    let verified = tokio::task::block_in_place(|| {
        password_work(user.as_ref()).run(password)
    })?;

    if !verified {
        tracing::info!(username, "failed login");
        return Ok(None);
    }

    Ok(user)
}

/// The hashing `authenticate` does for a candidate user.
#[derive(Debug, PartialEq, Eq)]
enum PasswordWork<'a> {
    Verify(&'a str),
    /// No stored hash to check against; hash anyway and fail.
    Dummy,
}

fn password_work(user : Option<&User>) -> PasswordWork<'_> {
    match user.and_then(|u| u.password_hash.as_deref()) {
        Some(hash) => PasswordWork::Verify(hash),
        None => PasswordWork::Dummy,
    }
}

impl PasswordWork<'_> {
    fn run(&self, password : &str) -> Result<bool> {
        match self {
            Self::Verify(hash) => {
                crypto::verify_password(hash, password.as_bytes())
            },
            Self::Dummy => {
                crypto::encode_password(password.as_bytes()).map(|_| false)
            },
        }
    }
}

/// Overwrites both fields. The display name is trimmed as on registration;
/// empty strings are stored as given.
pub async fn update_profile(
    db : &Db,
    user : &User,
    display_name : &str,
    bio : &str,
) -> Result<User> {
    let display_name = display_name.trim();
    check_display_name(display_name)?;

    db.update_profile(user.id, display_name, bio).await
}

/// Stores `bytes` as the new picture of `user` and returns the stored name.
///
/// The new file is in place before the database points at it, and the old
/// one is only removed afterwards, so a failure at any step leaves the
/// reference pointing at a file that exists.
pub async fn replace_profile_picture(
    db : &Db,
    files : &dyn FileStore,
    user : &User,
    bytes : &[u8],
    original_filename : &str,
) -> Result<String> {
    let ext = allowed_extension(original_filename).ok_or_else(|| {
        Error::InvalidFileType(shown_filename(original_filename))
    })?;

    if bytes.is_empty() {
        return Err(Error::Validation(
            "the uploaded file is empty".to_string(),
        ));
    }

    let previous = db.get_user(user.id).await?.picture;
    let name = format!("user_{}.{}", user.id, ext);

    tokio::task::block_in_place(|| files.save(&name, bytes))?;
    db.set_picture(user.id, &name).await?;

    if previous != DEFAULT_PICTURE && previous != name {
        remove_picture(files, &previous);
    }

    tracing::debug!(user_id = user.id, picture = %name, "picture replaced");

    Ok(name)
}

/// Client-chosen names end up in messages and cookies, so they are cut.
fn shown_filename(filename : &str) -> String {
    if filename.chars().count() <= MAX_SHOWN_FILENAME {
        return filename.to_string();
    }

    let mut shown : String =
        filename.chars().take(MAX_SHOWN_FILENAME).collect();
    shown.push_str("...");
    shown
}

fn remove_picture(files : &dyn FileStore, name : &str) {
    if let Err(err) = tokio::task::block_in_place(|| files.delete(name)) {
        tracing::warn!(
            picture = %name,
            "could not remove old picture: {}",
            err
        );
    }
}

/// Public page data: the user and its links in display order.
pub async fn get_profile(db : &Db, username : &str) -> Result<Profile> {
    let user = db.get_user_by_name(username).await?;
    let links = db.get_links(user.id).await?;

    Ok(Profile {
        user,
        links,
    })
}

/// Administrative removal of a user, its links and its picture.
pub async fn delete_user(
    db : &Db,
    files : &dyn FileStore,
    username : &str,
) -> Result<()> {
    let user = db.get_user_by_name(username).await?;

    db.delete_user(user.id).await?;

    if user.picture != DEFAULT_PICTURE {
        remove_picture(files, &user.picture);
    }

    tracing::info!(user_id = user.id, username, "deleted user");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use super::*;
    use crate::storage::DiskStore;

    /// Keeps files in memory and remembers every call.
    #[derive(Default)]
    struct MemStore {
        files : Mutex<BTreeMap<String, Vec<u8>>>,
        calls : Mutex<Vec<String>>,
        root :  PathBuf,
    }

    impl FileStore for MemStore {
        fn root(&self) -> &Path {
            &self.root
        }

        fn save(&self, name : &str, bytes : &[u8]) -> Result<()> {
            self.calls.lock().unwrap().push(format!("save {}", name));
            self.files
                .lock()
                .unwrap()
                .insert(name.to_string(), bytes.to_vec());
            Ok(())
        }

        fn delete(&self, name : &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("delete {}", name));
            self.files.lock().unwrap().remove(name);
            Ok(())
        }
    }

    async fn diego(db : &Db) -> User {
        register(db, "diego", "Diego", "pw123", "pw123").await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn register_checks_passwords_and_names() {
        let db = Db::in_memory().unwrap();

        for (name, pw, confirm) in [
            ("diego", "pw123", "pw124"),
            ("diego", "", ""),
            ("", "pw", "pw"),
            ("die go", "pw", "pw"),
            ("admin", "pw", "pw"),
            (".", "pw", "pw"),
            ("..", "pw", "pw"),
            ("...", "pw", "pw"),
            ("_diego", "pw", "pw"),
        ] {
            let res = register(&db, name, "", pw, confirm).await;
            assert!(matches!(res, Err(Error::Validation(_))), "{}", name);
        }

        let long = "x".repeat(81);
        assert!(matches!(
            register(&db, &long, "", "pw", "pw").await,
            Err(Error::Validation(_))
        ));

        let user = register(&db, "d.iego_-1", "", "pw", "pw").await.unwrap();
        assert_eq!(user.username, "d.iego_-1");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn register_twice_is_conflict() {
        let db = Db::in_memory().unwrap();
        let user = diego(&db).await;

        assert_eq!(user.display_name.as_deref(), Some("Diego"));
        assert_eq!(user.bio, None);
        assert!(user.password_hash.as_deref().unwrap().starts_with("$argon2"));

        let res = register(&db, "diego", "", "other", "other").await;
        assert!(matches!(res, Err(Error::Conflict(_))), "{:?}", res);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn authenticate_accepts_only_the_right_password() {
        let db = Db::in_memory().unwrap();
        let user = diego(&db).await;

        let found = authenticate(&db, "diego", "pw123").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));

        assert!(authenticate(&db, "diego", "wrong").await.unwrap().is_none());
        assert!(authenticate(&db, "Diego", "pw123").await.unwrap().is_none());
        assert!(authenticate(&db, "nobody", "pw123").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn users_without_a_hash_cannot_log_in() {
        let db = Db::in_memory().unwrap();
        db.insert_user("legacy", None, None).await.unwrap();

        assert!(authenticate(&db, "legacy", "").await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn every_login_attempt_hashes() {
        let db = Db::in_memory().unwrap();
        let user = diego(&db).await;
        let legacy = db.insert_user("legacy", None, None).await.unwrap();

        let hash = user.password_hash.as_deref().unwrap();
        assert_eq!(password_work(Some(&user)), PasswordWork::Verify(hash));
        assert_eq!(password_work(Some(&legacy)), PasswordWork::Dummy);
        assert_eq!(password_work(None), PasswordWork::Dummy);

        assert!(PasswordWork::Verify(hash).run("pw123").unwrap());
        assert!(!PasswordWork::Verify(hash).run("wrong").unwrap());
        assert!(!PasswordWork::Dummy.run("pw123").unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_profile_overwrites_with_empty_strings() {
        let db = Db::in_memory().unwrap();
        let user = diego(&db).await;

        let user = update_profile(&db, &user, "Diego S.", "hello")
            .await
            .unwrap();
        assert_eq!(user.bio.as_deref(), Some("hello"));

        let user = update_profile(&db, &user, "", "").await.unwrap();
        assert_eq!(user.display_name.as_deref(), Some(""));
        assert_eq!(user.bio.as_deref(), Some(""));

        let user = update_profile(&db, &user, "  Diego  ", " hi ")
            .await
            .unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Diego"));
        assert_eq!(user.bio.as_deref(), Some(" hi "));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn picture_extension_allow_list() {
        let db = Db::in_memory().unwrap();
        let files = MemStore::default();
        let user = diego(&db).await;

        let res =
            replace_profile_picture(&db, &files, &user, b"MZ", "photo.exe")
                .await;
        assert!(matches!(res, Err(Error::InvalidFileType(_))), "{:?}", res);

        let res =
            replace_profile_picture(&db, &files, &user, b"x", "png").await;
        assert!(matches!(res, Err(Error::InvalidFileType(_))), "{:?}", res);

        let long = format!("{}.exe", "a".repeat(5000));
        match replace_profile_picture(&db, &files, &user, b"x", &long).await {
            Err(Error::InvalidFileType(shown)) => {
                assert!(shown.len() < 100, "{}", shown.len());
                assert!(shown.ends_with("..."));
            },
            res => panic!("{:?}", res),
        }

        let name =
            replace_profile_picture(&db, &files, &user, b"img", "photo.PNG")
                .await
                .unwrap();
        assert_eq!(name, format!("user_{}.png", user.id));
        assert_eq!(db.get_user(user.id).await.unwrap().picture, name);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_upload_is_rejected() {
        let db = Db::in_memory().unwrap();
        let files = MemStore::default();
        let user = diego(&db).await;

        let res =
            replace_profile_picture(&db, &files, &user, b"", "a.jpg").await;
        assert!(matches!(res, Err(Error::Validation(_))), "{:?}", res);
        assert!(files.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replacing_removes_the_old_picture_after_saving() {
        let db = Db::in_memory().unwrap();
        let files = MemStore::default();
        let user = diego(&db).await;

        replace_profile_picture(&db, &files, &user, b"a", "a.jpg")
            .await
            .unwrap();
        replace_profile_picture(&db, &files, &user, b"b", "b.png")
            .await
            .unwrap();
        replace_profile_picture(&db, &files, &user, b"c", "c.PNG")
            .await
            .unwrap();

        let id = user.id;
        assert_eq!(*files.calls.lock().unwrap(), [
            format!("save user_{}.jpg", id),
            format!("save user_{}.png", id),
            format!("delete user_{}.jpg", id),
            format!("save user_{}.png", id),
        ]);

        let stored = files.files.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[&format!("user_{}.png", id)], b"c");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pictures_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let files = DiskStore::new(dir.path()).unwrap();
        let db = Db::in_memory().unwrap();
        let user = diego(&db).await;

        replace_profile_picture(&db, &files, &user, b"1", "me.jpeg")
            .await
            .unwrap();
        // the old file vanished behind our back; not an error
        std::fs::remove_file(dir.path().join(format!("user_{}.jpeg", user.id)))
            .unwrap();
        replace_profile_picture(&db, &files, &user, b"2", "me.jpg")
            .await
            .unwrap();

        let path = dir.path().join(format!("user_{}.jpg", user.id));
        assert_eq!(std::fs::read(path).unwrap(), b"2");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn profile_lookup_is_exact() {
        let db = Db::in_memory().unwrap();
        let user = diego(&db).await;
        db.insert_link(user.id, "Site", "https://example.com").await.unwrap();

        let profile = get_profile(&db, "diego").await.unwrap();
        assert_eq!(profile.user.id, user.id);
        assert_eq!(profile.links.len(), 1);

        assert!(matches!(
            get_profile(&db, "DIEGO").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_user_removes_links_and_picture() {
        let db = Db::in_memory().unwrap();
        let files = MemStore::default();
        let user = diego(&db).await;
        db.insert_link(user.id, "Site", "https://example.com").await.unwrap();
        replace_profile_picture(&db, &files, &user, b"a", "a.jpg")
            .await
            .unwrap();

        delete_user(&db, &files, "diego").await.unwrap();

        assert!(db.get_links(user.id).await.unwrap().is_empty());
        assert!(files.files.lock().unwrap().is_empty());
        assert!(matches!(
            delete_user(&db, &files, "diego").await,
            Err(Error::NotFound(_))
        ));
    }
}
