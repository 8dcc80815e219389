//! SQL-based lock store (MySQL/PostgreSQL/SQLite via SeaORM)
//!
//! One row per lock key in the `cluster_lock` table. The table is shared by
//! every cluster node, so every mutation is a single conditional `UPDATE`
//! (or an `INSERT` guarded by the primary key): a zero-row result means the
//! caller lost the race.

use async_trait::async_trait;
use sea_orm::{prelude::Expr, *};
use tracing::debug;

use clusterlock_common::{LockClaim, LockRecord, LockStatus};

use crate::entity::cluster_lock;
use crate::traits::LockStore;

/// Shared database lock store
///
/// Wraps a SeaORM `DatabaseConnection`. All rows, including those owned by
/// other nodes, are visible to every node.
#[derive(Clone)]
pub struct DbLockStore {
    db: DatabaseConnection,
}

impl DbLockStore {
    /// Create a new DbLockStore with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get a reference to the underlying database connection
    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Create the `cluster_lock` table from the entity definition if it is missing
    pub async fn create_table_if_not_exists(&self) -> anyhow::Result<()> {
        let backend = self.db.get_database_backend();
        let schema = Schema::new(backend);
        let mut statement = schema.create_table_from_entity(cluster_lock::Entity);
        statement.if_not_exists();

        self.db.execute(backend.build(&statement)).await?;
        debug!(backend = ?backend, "cluster_lock table ready");
        Ok(())
    }

    /// Insert a brand-new row; a primary key collision means another node won
    async fn insert_claim(&self, claim: &LockClaim) -> anyhow::Result<bool> {
        let model = cluster_lock::ActiveModel {
            lock_key: Set(claim.key.clone()),
            status: Set(LockStatus::Running.as_str().to_string()),
            lock_owner: Set(Some(claim.owner.clone())),
            lock_thread: Set(Some(claim.thread.clone())),
            lock_time: Set(claim.now),
            expiration_time: Set(claim.expires_at),
            last_modified: Set(claim.now),
        };

        match cluster_lock::Entity::insert(model)
            .exec_without_returning(&self.db)
            .await
        {
            Ok(rows) => Ok(rows > 0),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                debug!(key = %claim.key, "Lost insert race for lock row");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Free the rows returned by `candidates`, each guarded by `guard` so that a
    /// row changed since it was read is left alone
    async fn release_each<F>(
        &self,
        candidates: Vec<cluster_lock::Model>,
        now: i64,
        guard: F,
    ) -> anyhow::Result<Vec<LockRecord>>
    where
        F: Fn(&cluster_lock::Model) -> Condition,
    {
        let mut released = Vec::with_capacity(candidates.len());
        for model in candidates {
            let result = free_columns(cluster_lock::Entity::update_many(), now)
                .filter(cluster_lock::Column::LockKey.eq(model.lock_key.as_str()))
                .filter(held_condition())
                .filter(guard(&model))
                .exec(&self.db)
                .await?;

            if result.rows_affected > 0 {
                released.push(lock_entity_to_record(model)?);
            }
        }
        Ok(released)
    }
}

fn held_condition() -> Condition {
    Condition::all().add(
        cluster_lock::Column::Status.is_in(LockStatus::HELD.iter().map(|s| s.as_str())),
    )
}

fn free_columns(
    update: UpdateMany<cluster_lock::Entity>,
    now: i64,
) -> UpdateMany<cluster_lock::Entity> {
    update
        .col_expr(
            cluster_lock::Column::Status,
            Expr::value(LockStatus::Free.as_str()),
        )
        .col_expr(
            cluster_lock::Column::LockOwner,
            Expr::value(Option::<String>::None),
        )
        .col_expr(
            cluster_lock::Column::LockThread,
            Expr::value(Option::<String>::None),
        )
        .col_expr(cluster_lock::Column::LastModified, Expr::value(now))
}

fn lock_entity_to_record(model: cluster_lock::Model) -> anyhow::Result<LockRecord> {
    let status = model.status.parse::<LockStatus>()?;
    Ok(LockRecord {
        key: model.lock_key,
        status,
        owner: model.lock_owner,
        thread: model.lock_thread,
        lock_time: model.lock_time,
        expiration_time: model.expiration_time,
        last_modified: model.last_modified,
    })
}

fn lock_entities_to_records(models: Vec<cluster_lock::Model>) -> anyhow::Result<Vec<LockRecord>> {
    models.into_iter().map(lock_entity_to_record).collect()
}

#[async_trait]
impl LockStore for DbLockStore {
    fn is_clustered(&self) -> bool {
        true
    }

    async fn try_acquire(&self, claim: &LockClaim) -> anyhow::Result<bool> {
        // Reuse a FREE tombstone, or take over a row whose lease ran out
        let result = cluster_lock::Entity::update_many()
            .col_expr(
                cluster_lock::Column::Status,
                Expr::value(LockStatus::Running.as_str()),
            )
            .col_expr(
                cluster_lock::Column::LockOwner,
                Expr::value(claim.owner.as_str()),
            )
            .col_expr(
                cluster_lock::Column::LockThread,
                Expr::value(claim.thread.as_str()),
            )
            .col_expr(cluster_lock::Column::LockTime, Expr::value(claim.now))
            .col_expr(
                cluster_lock::Column::ExpirationTime,
                Expr::value(claim.expires_at),
            )
            .col_expr(cluster_lock::Column::LastModified, Expr::value(claim.now))
            .filter(cluster_lock::Column::LockKey.eq(claim.key.as_str()))
            .filter(
                Condition::any()
                    .add(cluster_lock::Column::Status.eq(LockStatus::Free.as_str()))
                    .add(cluster_lock::Column::ExpirationTime.lt(claim.now)),
            )
            .exec(&self.db)
            .await?;

        if result.rows_affected > 0 {
            return Ok(true);
        }

        if cluster_lock::Entity::find_by_id(claim.key.clone())
            .one(&self.db)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        self.insert_claim(claim).await
    }

    async fn release(&self, key: &str, owner: &str, now: i64) -> anyhow::Result<bool> {
        let result = free_columns(cluster_lock::Entity::update_many(), now)
            .filter(cluster_lock::Column::LockKey.eq(key))
            .filter(cluster_lock::Column::LockOwner.eq(owner))
            .filter(held_condition())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn mark_aborted(&self, key: &str, now: i64) -> anyhow::Result<bool> {
        let result = cluster_lock::Entity::update_many()
            .col_expr(
                cluster_lock::Column::Status,
                Expr::value(LockStatus::Abort.as_str()),
            )
            .col_expr(cluster_lock::Column::LastModified, Expr::value(now))
            .filter(cluster_lock::Column::LockKey.eq(key))
            .filter(held_condition())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn find(&self, key: &str) -> anyhow::Result<Option<LockRecord>> {
        cluster_lock::Entity::find_by_id(key.to_string())
            .one(&self.db)
            .await?
            .map(lock_entity_to_record)
            .transpose()
    }

    async fn find_held(&self) -> anyhow::Result<Vec<LockRecord>> {
        let models = cluster_lock::Entity::find()
            .filter(held_condition())
            .order_by_asc(cluster_lock::Column::LockKey)
            .all(&self.db)
            .await?;
        lock_entities_to_records(models)
    }

    async fn find_held_by(&self, owner: &str) -> anyhow::Result<Vec<LockRecord>> {
        let models = cluster_lock::Entity::find()
            .filter(held_condition())
            .filter(cluster_lock::Column::LockOwner.eq(owner))
            .order_by_asc(cluster_lock::Column::LockKey)
            .all(&self.db)
            .await?;
        lock_entities_to_records(models)
    }

    async fn refresh(
        &self,
        keys: &[String],
        owner: &str,
        now: i64,
        expires_at: i64,
    ) -> anyhow::Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let result = cluster_lock::Entity::update_many()
            .col_expr(
                cluster_lock::Column::ExpirationTime,
                Expr::value(expires_at),
            )
            .col_expr(cluster_lock::Column::LastModified, Expr::value(now))
            .filter(cluster_lock::Column::LockKey.is_in(keys.iter().map(String::as_str)))
            .filter(cluster_lock::Column::LockOwner.eq(owner))
            .filter(held_condition())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn release_stale(&self, cutoff: i64, now: i64) -> anyhow::Result<Vec<LockRecord>> {
        let candidates = cluster_lock::Entity::find()
            .filter(held_condition())
            .filter(cluster_lock::Column::LastModified.lt(cutoff))
            .all(&self.db)
            .await?;

        // A refresh landing between the read and the update moves lastModified
        self.release_each(candidates, now, |model| {
            Condition::all().add(cluster_lock::Column::LastModified.eq(model.last_modified))
        })
        .await
    }

    async fn release_owned_by(&self, owner: &str, now: i64) -> anyhow::Result<Vec<LockRecord>> {
        let candidates = cluster_lock::Entity::find()
            .filter(held_condition())
            .filter(cluster_lock::Column::LockOwner.eq(owner))
            .all(&self.db)
            .await?;

        let owner = owner.to_string();
        self.release_each(candidates, now, move |_| {
            Condition::all().add(cluster_lock::Column::LockOwner.eq(owner.as_str()))
        })
        .await
    }
}
