use super::model::CatalogEntry;
use crate::model::Item;
use anyhow::{Context, Result};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use tracing::{instrument, warn};

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let opts = SqliteConnectOptions::from_str(&normalized)
        .context("invalid sqlite database URL")?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Ensure the parent directory of a file-backed SQLite URL exists.
/// In-memory URLs and non-sqlite schemes pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }
    let rest = url["sqlite:".len()..].trim_start_matches("//");
    let path = rest.split('?').next().unwrap_or(rest);
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    url.to_string()
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Ids of the current snapshot, used as the diff baseline.
#[instrument(skip_all)]
pub async fn snapshot_ids(pool: &Pool) -> Result<HashSet<String>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM items_current")
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().collect())
}

#[instrument(skip_all)]
pub async fn list_snapshot(pool: &Pool) -> Result<Vec<Item>> {
    let rows = sqlx::query("SELECT id, name, url, image_url FROM items_current ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| Item {
            id: row.get("id"),
            name: row.get("name"),
            url: row.get("url"),
            image_url: row.get("image_url"),
        })
        .collect())
}

/// Replace the current snapshot wholesale. Delete-then-insert inside one
/// transaction: a concurrent reader sees either the fully-prior or the
/// fully-new snapshot, never a mix. An empty `observed` legitimately clears
/// the snapshot.
#[instrument(skip_all)]
pub async fn replace_snapshot(pool: &Pool, observed: &[Item]) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM items_current")
        .execute(&mut *tx)
        .await?;
    for item in observed {
        sqlx::query("INSERT INTO items_current (id, name, url, image_url) VALUES (?, ?, ?, ?)")
            .bind(&item.id)
            .bind(&item.name)
            .bind(&item.url)
            .bind(&item.image_url)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to insert snapshot row {}", item.id))?;
    }
    tx.commit().await?;
    Ok(())
}

/// Append unseen items to the all-time catalog. Idempotent per id: a known id
/// is a no-op that touches neither the descriptive fields nor `first_seen`.
/// A single bad row is logged and skipped; the rest still apply.
/// Returns the number of rows actually appended.
#[instrument(skip_all)]
pub async fn append_catalog(pool: &Pool, observed: &[Item]) -> Result<usize> {
    let mut appended = 0usize;
    let mut tx = pool.begin().await?;
    for item in observed {
        let res = sqlx::query(
            "INSERT INTO items_catalog (id, name, url, image_url) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.url)
        .bind(&item.image_url)
        .execute(&mut *tx)
        .await;
        match res {
            Ok(done) => appended += done.rows_affected() as usize,
            Err(err) => warn!(?err, id = %item.id, "failed to append catalog row; skipping"),
        }
    }
    tx.commit().await?;
    Ok(appended)
}

#[instrument(skip_all)]
pub async fn list_catalog(pool: &Pool) -> Result<Vec<CatalogEntry>> {
    let rows = sqlx::query(
        "SELECT id, name, url, image_url, first_seen FROM items_catalog ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| CatalogEntry {
            id: row.get("id"),
            name: row.get("name"),
            url: row.get("url"),
            image_url: row.get("image_url"),
            first_seen: row.get("first_seen"),
        })
        .collect())
}

/// Name of a catalog entry, or None when the id was never observed. The
/// all-time catalog is the one source of truth for id validation.
#[instrument(skip_all)]
pub async fn catalog_name(pool: &Pool, item_id: &str) -> Result<Option<String>> {
    let name = sqlx::query_scalar("SELECT name FROM items_catalog WHERE id = ?")
        .bind(item_id)
        .fetch_optional(pool)
        .await?;
    Ok(name)
}

/// Idempotent: inserting an existing (subscriber, item) pair is a no-op.
#[instrument(skip_all)]
pub async fn insert_suppression(pool: &Pool, subscriber_id: i64, item_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO suppressions (subscriber_id, item_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
    )
    .bind(subscriber_id)
    .bind(item_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns whether a row was actually deleted.
#[instrument(skip_all)]
pub async fn delete_suppression(pool: &Pool, subscriber_id: i64, item_id: &str) -> Result<bool> {
    let done = sqlx::query("DELETE FROM suppressions WHERE subscriber_id = ? AND item_id = ?")
        .bind(subscriber_id)
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(done.rows_affected() > 0)
}

/// Names of the subscriber's suppressed items, resolved against the all-time
/// catalog so entries stay listable after an item rotates out of the snapshot.
#[instrument(skip_all)]
pub async fn list_suppressed_names(pool: &Pool, subscriber_id: i64) -> Result<Vec<String>> {
    let names = sqlx::query_scalar(
        "SELECT c.name FROM suppressions s \
         JOIN items_catalog c ON s.item_id = c.id \
         WHERE s.subscriber_id = ? ORDER BY c.name",
    )
    .bind(subscriber_id)
    .fetch_all(pool)
    .await?;
    Ok(names)
}

/// Suppression entries restricted to `item_ids`, grouped by subscriber.
#[instrument(skip_all)]
pub async fn suppressions_for_items(
    pool: &Pool,
    item_ids: &[String],
) -> Result<HashMap<i64, HashSet<String>>> {
    if item_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; item_ids.len()].join(", ");
    let sql = format!(
        "SELECT subscriber_id, item_id FROM suppressions WHERE item_id IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql);
    for id in item_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;

    let mut grouped: HashMap<i64, HashSet<String>> = HashMap::new();
    for row in rows {
        let subscriber_id: i64 = row.get("subscriber_id");
        let item_id: String = row.get("item_id");
        grouped.entry(subscriber_id).or_default().insert(item_id);
    }
    Ok(grouped)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn item(id: &str, name: &str) -> Item {
        Item {
            id: id.to_string(),
            name: name.to_string(),
            url: format!("https://example.com/events/{id}"),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn replace_snapshot_swaps_wholesale() {
        let pool = setup_pool().await;

        replace_snapshot(&pool, &[item("1", "Show A"), item("2", "Show B")])
            .await
            .unwrap();
        replace_snapshot(&pool, &[item("2", "Show B"), item("3", "Show C")])
            .await
            .unwrap();

        let mut ids: Vec<String> = list_snapshot(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["2", "3"]);
    }

    #[tokio::test]
    async fn empty_replace_clears_snapshot() {
        let pool = setup_pool().await;
        replace_snapshot(&pool, &[item("1", "Show A")]).await.unwrap();
        replace_snapshot(&pool, &[]).await.unwrap();
        assert!(list_snapshot(&pool).await.unwrap().is_empty());
        assert!(snapshot_ids(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_catalog_is_idempotent_per_id() {
        let pool = setup_pool().await;

        let appended = append_catalog(&pool, &[item("1", "Show A")]).await.unwrap();
        assert_eq!(appended, 1);
        let first = list_catalog(&pool).await.unwrap();
        assert_eq!(first.len(), 1);

        // Re-appending the same id must not touch name or first_seen.
        let appended = append_catalog(&pool, &[item("1", "Renamed Show")])
            .await
            .unwrap();
        assert_eq!(appended, 0);
        let second = list_catalog(&pool).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(second[0].name, "Show A");
    }

    #[tokio::test]
    async fn catalog_grows_but_never_shrinks() {
        let pool = setup_pool().await;
        append_catalog(&pool, &[item("1", "Show A")]).await.unwrap();
        append_catalog(&pool, &[item("2", "Show B")]).await.unwrap();
        replace_snapshot(&pool, &[]).await.unwrap();

        let catalog = list_catalog(&pool).await.unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog_name(&pool, "2").await.unwrap().as_deref(), Some("Show B"));
        assert_eq!(catalog_name(&pool, "404").await.unwrap(), None);
    }

    #[tokio::test]
    async fn suppression_insert_is_idempotent() {
        let pool = setup_pool().await;
        append_catalog(&pool, &[item("7", "Show G")]).await.unwrap();

        insert_suppression(&pool, 42, "7").await.unwrap();
        insert_suppression(&pool, 42, "7").await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM suppressions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        assert!(delete_suppression(&pool, 42, "7").await.unwrap());
        assert!(!delete_suppression(&pool, 42, "7").await.unwrap());
    }

    #[tokio::test]
    async fn suppressed_names_resolve_against_catalog() {
        let pool = setup_pool().await;
        append_catalog(&pool, &[item("1", "Zebra"), item("2", "Aardvark")])
            .await
            .unwrap();
        insert_suppression(&pool, 9, "1").await.unwrap();
        insert_suppression(&pool, 9, "2").await.unwrap();

        // Items rotated out of the snapshot stay listable.
        replace_snapshot(&pool, &[]).await.unwrap();
        let names = list_suppressed_names(&pool, 9).await.unwrap();
        assert_eq!(names, vec!["Aardvark", "Zebra"]);
        assert!(list_suppressed_names(&pool, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn suppressions_for_items_groups_by_subscriber() {
        let pool = setup_pool().await;
        insert_suppression(&pool, 1, "a").await.unwrap();
        insert_suppression(&pool, 1, "b").await.unwrap();
        insert_suppression(&pool, 2, "b").await.unwrap();
        insert_suppression(&pool, 2, "z").await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string()];
        let grouped = suppressions_for_items(&pool, &ids).await.unwrap();
        assert_eq!(grouped[&1].len(), 2);
        assert_eq!(grouped[&2].len(), 1);
        assert!(grouped[&2].contains("b"));

        assert!(suppressions_for_items(&pool, &[]).await.unwrap().is_empty());
    }
}
