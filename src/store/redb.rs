//! [`CounterStore`] persisted in a redb database file.
//!
//! Layout:
//! - `sites`: `id -> (name, created_at)`
//! - `counters`: `site_id -> (total, unique)`
//!
//! Every call opens its own transaction on a blocking thread. A flush is one
//! write transaction, so a batch is committed whole or not at all.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, info};

use super::{CounterStore, FlushBatch};
use crate::error::Result;
use crate::site::{Counts, Site, SiteId};

const SITES: TableDefinition<'_, &str, (&str, u64)> = TableDefinition::new("sites");
const COUNTERS: TableDefinition<'_, &str, (u64, u64)> = TableDefinition::new("counters");

/// redb-backed durable counters.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Opens or creates the database at `path`, creating parent directories
    /// and both tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            let _sites = txn.open_table(SITES)?;
            let _counters = txn.open_table(COUNTERS)?;
        }
        txn.commit()?;

        info!(path = %path.display(), "opened counter database");
        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

fn ensure_blocking(db: &Database, site: &Site) -> Result<bool> {
    let txn = db.begin_write()?;
    let created = {
        let mut sites = txn.open_table(SITES)?;
        let exists = sites.get(site.id.as_str())?.is_some();
        if !exists {
            sites.insert(site.id.as_str(), (site.name.as_str(), site.created_at))?;
        }

        let mut counters = txn.open_table(COUNTERS)?;
        let has_row = counters.get(site.id.as_str())?.is_some();
        if !has_row {
            counters.insert(site.id.as_str(), (0, 0))?;
        }
        !exists
    };
    txn.commit()?;
    Ok(created)
}

fn apply_blocking(db: &Database, batch: &FlushBatch) -> Result<()> {
    let txn = db.begin_write()?;
    {
        let mut counters = txn.open_table(COUNTERS)?;
        for (site, delta) in batch.iter() {
            let (total, unique) = counters
                .get(site.as_str())?
                .map(|row| row.value())
                .unwrap_or((0, 0));
            let next = Counts::new(total, unique) + *delta;
            counters.insert(site.as_str(), (next.total, next.unique))?;
        }
    }
    txn.commit()?;
    Ok(())
}

#[async_trait]
impl CounterStore for RedbStore {
    async fn ensure(&self, site: &Site) -> Result<bool> {
        let site = site.clone();
        self.blocking(move |db| ensure_blocking(db, &site)).await
    }

    async fn site(&self, id: &SiteId) -> Result<Option<Site>> {
        let id = id.clone();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let sites = txn.open_table(SITES)?;
            let row = sites.get(id.as_str())?.map(|row| {
                let (name, created_at) = row.value();
                (name.to_string(), created_at)
            });
            Ok(row.map(|(name, created_at)| Site {
                id,
                name,
                created_at,
            }))
        })
        .await
    }

    async fn read(&self, id: &SiteId) -> Result<Option<Counts>> {
        let id = id.clone();
        self.blocking(move |db| {
            let txn = db.begin_read()?;
            let counters = txn.open_table(COUNTERS)?;
            let row = counters.get(id.as_str())?.map(|row| row.value());
            Ok(row.map(|(total, unique)| Counts::new(total, unique)))
        })
        .await
    }

    async fn apply_batch(&self, batch: &FlushBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let batch = batch.clone();
        let sites = batch.len();
        self.blocking(move |db| apply_blocking(db, &batch)).await?;
        debug!(sites, "committed counter batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn site(id: &str) -> SiteId {
        SiteId::new(id).unwrap()
    }

    fn open(dir: &TempDir) -> RedbStore {
        RedbStore::open(dir.path().join("counts.redb")).unwrap()
    }

    #[tokio::test]
    async fn test_ensure_creates_rows_once() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let s = Site::new(site("abc123"), "Example");

        assert!(store.ensure(&s).await.unwrap());
        assert!(!store.ensure(&s).await.unwrap());
        assert_eq!(store.read(&s.id).await.unwrap(), Some(Counts::ZERO));

        let loaded = store.site(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded, s);
    }

    #[tokio::test]
    async fn test_apply_batch_adds_and_creates_rows() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let a = site("a");
        let b = site("b");
        store.ensure(&Site::new(a.clone(), "A")).await.unwrap();

        let batch: FlushBatch = [(a.clone(), Counts::new(5, 3)), (b.clone(), Counts::new(2, 1))]
            .into_iter()
            .collect();
        store.apply_batch(&batch).await.unwrap();
        store.apply_batch(&batch).await.unwrap();

        assert_eq!(store.read(&a).await.unwrap(), Some(Counts::new(10, 6)));
        assert_eq!(store.read(&b).await.unwrap(), Some(Counts::new(4, 2)));
        assert_eq!(store.site(&b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_counts_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = site("persist");
        {
            let store = open(&dir);
            store.ensure(&Site::new(id.clone(), "P")).await.unwrap();
            let batch: FlushBatch = [(id.clone(), Counts::new(7, 4))].into_iter().collect();
            store.apply_batch(&batch).await.unwrap();
        }

        let store = open(&dir);
        assert_eq!(store.read(&id).await.unwrap(), Some(Counts::new(7, 4)));
        assert_eq!(store.site(&id).await.unwrap().unwrap().name, "P");
    }

    #[test]
    fn test_open_creates_parent_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("deeper").join("c.redb");
        assert!(RedbStore::open(&path).is_ok());
        assert!(path.exists());
    }
}
