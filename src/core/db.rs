use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::search::{IndexChange, SearchMirror, Searchable};

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    // Every connection to `:memory:` is its own database, so keep exactly one
    // alive for the life of the pool.
    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Fresh, migrated in-memory database.
pub async fn connect_in_memory() -> anyhow::Result<SqlitePool> {
    let pool = connect("sqlite::memory:").await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// One database transaction plus the search index changes it implies.
///
/// Call sites record every searchable row they insert, update or delete.
/// The changes reach the search index only after the transaction commits;
/// a failed commit, a rollback or dropping the unit of work discards them.
pub struct UnitOfWork {
    tx: Transaction<'static, Sqlite>,
    added: Vec<IndexChange>,
    updated: Vec<IndexChange>,
    deleted: Vec<IndexChange>,
}

impl UnitOfWork {
    pub async fn begin(pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        Ok(Self {
            tx: pool.begin().await?,
            added: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        })
    }

    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub fn added<T: Searchable>(&mut self, entity: &T) {
        self.added.push(IndexChange::upsert(entity));
    }

    pub fn updated<T: Searchable>(&mut self, entity: &T) {
        self.updated.push(IndexChange::upsert(entity));
    }

    pub fn deleted<T: Searchable>(&mut self, entity: &T) {
        self.deleted.push(IndexChange::remove(entity));
    }

    pub fn pending_changes(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }

    pub async fn commit(self, mirror: &SearchMirror) -> Result<(), sqlx::Error> {
        let UnitOfWork {
            tx,
            added,
            updated,
            deleted,
        } = self;

        tx.commit().await?;

        let changes = added.into_iter().chain(updated).chain(deleted).collect();
        mirror.apply(changes).await;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}
