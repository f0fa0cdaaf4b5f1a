use crate::database::Db;
use crate::models::{Direction, Link, User};
use crate::{Error, Result};

const MAX_TITLE : usize = 100;
const MAX_URL : usize = 500;

/// The one rule for link fields, on create and on update alike: both
/// present and within the column sizes. The URL format is not checked.
fn check_fields<'a>(
    title : &'a str,
    url : &'a str,
) -> Result<(&'a str, &'a str)> {
    let (title, url) = (title.trim(), url.trim());

    if title.is_empty() || url.is_empty() {
        return Err(Error::Validation("title and URL are required".to_string()));
    }

    if title.chars().count() > MAX_TITLE {
        return Err(Error::Validation(format!(
            "title is longer than {} characters",
            MAX_TITLE
        )));
    }

    if url.chars().count() > MAX_URL {
        return Err(Error::Validation(format!(
            "URL is longer than {} characters",
            MAX_URL
        )));
    }

    Ok((title, url))
}

/// Only the owner of a link may change it.
fn authorize(acting_user : &User, link : &Link) -> Result<()> {
    if link.user_id != acting_user.id {
        tracing::warn!(
            user_id = acting_user.id,
            link_id = link.id,
            "attempt to modify someone else's link"
        );
        return Err(Error::Forbidden(format!("link {}", link.id)));
    }

    Ok(())
}

pub async fn add_link(
    db : &Db,
    owner : &User,
    title : &str,
    url : &str,
) -> Result<Link> {
    let (title, url) = check_fields(title, url)?;

    let link = db.insert_link(owner.id, title, url).await?;
    tracing::debug!(user_id = owner.id, link_id = link.id, "link added");

    Ok(link)
}

pub async fn update_link(
    db : &Db,
    acting_user : &User,
    link_id : u32,
    title : &str,
    url : &str,
) -> Result<Link> {
    // not found and forbidden win over bad input
    authorize(acting_user, &db.get_link(link_id).await?)?;

    let (title, url) = check_fields(title, url)?;

    db.update_link(acting_user.id, link_id, title, url).await
}

pub async fn delete_link(
    db : &Db,
    acting_user : &User,
    link_id : u32,
) -> Result<()> {
    authorize(acting_user, &db.get_link(link_id).await?)?;

    db.delete_link(acting_user.id, link_id).await?;
    tracing::debug!(user_id = acting_user.id, link_id, "link deleted");

    Ok(())
}

/// Links of `owner` in display order.
pub async fn list_links(db : &Db, owner : &User) -> Result<Vec<Link>> {
    db.get_links(owner.id).await
}

/// Swaps a link with its neighbour and returns the new order. Moving the
/// first link up or the last one down changes nothing.
pub async fn move_link(
    db : &Db,
    acting_user : &User,
    link_id : u32,
    direction : Direction,
) -> Result<Vec<Link>> {
    authorize(acting_user, &db.get_link(link_id).await?)?;

    db.move_link(acting_user.id, link_id, direction).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts;

    async fn two_users(db : &Db) -> (User, User) {
        let a = accounts::register(db, "diego", "", "pw123", "pw123")
            .await
            .unwrap();
        let b = accounts::register(db, "ana", "", "pw456", "pw456")
            .await
            .unwrap();
        (a, b)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn add_requires_both_fields() {
        let db = Db::in_memory().unwrap();
        let (a, _) = two_users(&db).await;

        for (title, url) in [("", "https://x"), ("x", ""), ("  ", "  ")] {
            assert!(matches!(
                add_link(&db, &a, title, url).await,
                Err(Error::Validation(_))
            ));
        }

        let long = "x".repeat(101);
        assert!(matches!(
            add_link(&db, &a, &long, "u").await,
            Err(Error::Validation(_))
        ));

        // anything non-empty is a URL
        let link = add_link(&db, &a, " Site ", "not a url").await.unwrap();
        assert_eq!(link.title, "Site");
        assert_eq!(link.url, "not a url");
        assert_eq!(list_links(&db, &a).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_by_someone_else_is_forbidden() {
        let db = Db::in_memory().unwrap();
        let (a, b) = two_users(&db).await;
        let link = add_link(&db, &a, "Site", "https://example.com")
            .await
            .unwrap();

        for (title, url) in [("Mine", "https://evil.example"), ("", "")] {
            let res = update_link(&db, &b, link.id, title, url).await;
            assert!(matches!(res, Err(Error::Forbidden(_))), "{:?}", res);
        }

        let stored = db.get_link(link.id).await.unwrap();
        assert_eq!(stored.title, "Site");
        assert_eq!(stored.url, "https://example.com");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_uses_the_same_rule_as_add() {
        let db = Db::in_memory().unwrap();
        let (a, _) = two_users(&db).await;
        let link = add_link(&db, &a, "Site", "https://example.com")
            .await
            .unwrap();

        assert!(matches!(
            update_link(&db, &a, link.id, "", "https://example.com").await,
            Err(Error::Validation(_))
        ));

        let link = update_link(&db, &a, link.id, "Blog", "https://blog.example")
            .await
            .unwrap();
        assert_eq!(link.title, "Blog");
        assert_eq!(link.url, "https://blog.example");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_links_are_not_found() {
        let db = Db::in_memory().unwrap();
        let (a, _) = two_users(&db).await;

        assert!(matches!(
            update_link(&db, &a, 99, "t", "u").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            delete_link(&db, &a, 99).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            move_link(&db, &a, 99, Direction::Up).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_checks_owner() {
        let db = Db::in_memory().unwrap();
        let (a, b) = two_users(&db).await;
        let link = add_link(&db, &a, "Site", "https://example.com")
            .await
            .unwrap();

        assert!(matches!(
            delete_link(&db, &b, link.id).await,
            Err(Error::Forbidden(_))
        ));
        assert_eq!(list_links(&db, &a).await.unwrap().len(), 1);

        delete_link(&db, &a, link.id).await.unwrap();
        assert!(list_links(&db, &a).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reorder() {
        let db = Db::in_memory().unwrap();
        let (a, _) = two_users(&db).await;

        let mut ids = Vec::new();
        for title in ["one", "two", "three"] {
            ids.push(add_link(&db, &a, title, "u").await.unwrap().id);
        }

        move_link(&db, &a, ids[0], Direction::Down).await.unwrap();
        let links = move_link(&db, &a, ids[2], Direction::Down).await.unwrap();

        let titles : Vec<_> = links.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, ["two", "one", "three"]);

        let positions : Vec<_> = list_links(&db, &a)
            .await
            .unwrap()
            .iter()
            .map(|l| l.position)
            .collect();
        assert_eq!(positions, [0, 1, 2]);
    }
}
