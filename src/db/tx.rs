//! Call-chain transaction management.
//!
//! A `DbContext` carries the shared pool plus one chain of transaction
//! frames. The chain is an explicit value threaded through storage-calling
//! code (handlers receive it, repositories are built from it) rather than a
//! task-local lookup, so connection resolution is always visible at the call
//! site: statements run on the top frame's connection while a frame is
//! active, and directly on the pool otherwise.
//!
//! Every `in_transaction` entry begins a new transaction on its own pooled
//! connection, nested or not. That lets an inner failure roll back
//! independently while the outer chain continues, and lets a root failure
//! discard all nested work.

use crate::db::row::{row_to_json, BindValue};
use crate::error::AppError;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

const DEFAULT_BEGIN_DEADLINE: Duration = Duration::from_secs(30);

/// One active transaction: its own connection/transaction handle, nesting
/// flag (false only for the chain's outermost frame), depth index, and a
/// generated id for diagnostics.
struct TxFrame {
    tx: Transaction<'static, Postgres>,
    nested: bool,
    index: usize,
    id: Uuid,
}

#[derive(Default)]
struct TxChain {
    frames: Mutex<Vec<TxFrame>>,
}

/// Storage access for one logical call chain. Cheap to clone; clones share
/// the same frame stack. Use [`DbContext::fork`] to start an unrelated chain
/// over the same pool.
#[derive(Clone)]
pub struct DbContext {
    pool: PgPool,
    chain: Arc<TxChain>,
    begin_deadline: Duration,
}

impl DbContext {
    pub fn new(pool: PgPool) -> Self {
        Self::with_begin_deadline(pool, DEFAULT_BEGIN_DEADLINE)
    }

    /// `begin_deadline` bounds how long a transaction entry may wait for a
    /// pooled connection, so a stalled chain cannot hold the pool hostage.
    pub fn with_begin_deadline(pool: PgPool, begin_deadline: Duration) -> Self {
        DbContext {
            pool,
            chain: Arc::new(TxChain::default()),
            begin_deadline,
        }
    }

    /// A context over the same pool with a fresh, empty frame stack.
    pub fn fork(&self) -> Self {
        DbContext {
            pool: self.pool.clone(),
            chain: Arc::new(TxChain::default()),
            begin_deadline: self.begin_deadline,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of open frames on this chain.
    pub async fn depth(&self) -> usize {
        self.chain.frames.lock().await.len()
    }

    /// Run `task` inside a transaction frame.
    ///
    /// Nesting rules: on success of the chain's root frame the whole stack is
    /// committed innermost-first; a non-root success leaves its transaction
    /// open for the eventual root commit. On failure of a root frame the
    /// whole stack is rolled back and the error re-raised. On failure of a
    /// nested frame only that frame is rolled back and the error is absorbed,
    /// yielding `Ok(None)`: nested failures do not propagate past their own
    /// scope, so a caller that needs the outer transaction to fail must turn
    /// `None` into an error itself.
    pub async fn in_transaction<T, F, Fut>(&self, task: F) -> Result<Option<T>, AppError>
    where
        F: FnOnce(DbContext) -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let (index, nested) = {
            let frames = self.chain.frames.lock().await;
            (frames.len(), !frames.is_empty())
        };
        let tx = tokio::time::timeout(self.begin_deadline, self.pool.begin())
            .await
            .map_err(|_| AppError::Tx("timed out acquiring a transaction connection".into()))??;
        let id = Uuid::new_v4();
        self.chain.frames.lock().await.push(TxFrame {
            tx,
            nested,
            index,
            id,
        });
        tracing::debug!(transaction = %id, depth = index, nested, "transaction begin");

        match task(self.clone()).await {
            Ok(value) => {
                if index == 0 {
                    self.commit_chain().await?;
                }
                Ok(Some(value))
            }
            Err(err) => {
                let mut frames = self.chain.frames.lock().await;
                let top_is_nested = frames.last().map(|f| f.nested).unwrap_or(false);
                if !top_is_nested {
                    tracing::error!(error = %err, "transaction failed, rolling back chain");
                    Self::rollback_frames(&mut frames).await;
                    Err(err)
                } else {
                    let frame = frames.pop().expect("frame pushed above");
                    let frame_id = frame.id;
                    if let Err(rb) = frame.tx.rollback().await {
                        tracing::error!(transaction = %frame_id, error = %rb, "rollback failed");
                    }
                    tracing::debug!(
                        transaction = %frame_id,
                        error = %err,
                        "nested transaction rolled back, failure absorbed"
                    );
                    Ok(None)
                }
            }
        }
    }

    /// Commit every open frame, most recent (innermost) first. A commit
    /// failure rolls back whatever frames remain.
    async fn commit_chain(&self) -> Result<(), AppError> {
        let mut frames = self.chain.frames.lock().await;
        while let Some(frame) = frames.pop() {
            if let Err(e) = frame.tx.commit().await {
                tracing::error!(
                    transaction = %frame.id,
                    error = %e,
                    "commit failed, rolling back remaining frames"
                );
                Self::rollback_frames(&mut frames).await;
                return Err(AppError::Db(e));
            }
            tracing::debug!(
                transaction = %frame.id,
                depth = frame.index,
                nested = frame.nested,
                "transaction commit"
            );
        }
        Ok(())
    }

    /// Roll back every remaining frame, most recent first. Rollback failures
    /// are logged, never silently dropped.
    async fn rollback_frames(frames: &mut Vec<TxFrame>) {
        while let Some(frame) = frames.pop() {
            match frame.tx.rollback().await {
                Ok(()) => tracing::debug!(
                    transaction = %frame.id,
                    depth = frame.index,
                    nested = frame.nested,
                    "transaction rollback"
                ),
                Err(e) => tracing::error!(transaction = %frame.id, error = %e, "rollback failed"),
            }
        }
    }

    /// Run a query and decode every row to a JSON object.
    pub async fn fetch_all(&self, sql: &str, binds: &[BindValue]) -> Result<Vec<Value>, AppError> {
        tracing::debug!(sql = %sql, "query");
        let mut frames = self.chain.frames.lock().await;
        if let Some(frame) = frames.last_mut() {
            let rows = bind_all(sqlx::query(sql), binds)
                .fetch_all(&mut *frame.tx)
                .await?;
            Ok(rows.iter().map(row_to_json).collect())
        } else {
            drop(frames);
            let rows = bind_all(sqlx::query(sql), binds)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows.iter().map(row_to_json).collect())
        }
    }

    /// Run a query expected to yield at most one row.
    pub async fn fetch_optional(
        &self,
        sql: &str,
        binds: &[BindValue],
    ) -> Result<Option<Value>, AppError> {
        tracing::debug!(sql = %sql, "query");
        let mut frames = self.chain.frames.lock().await;
        if let Some(frame) = frames.last_mut() {
            let row = bind_all(sqlx::query(sql), binds)
                .fetch_optional(&mut *frame.tx)
                .await?;
            Ok(row.as_ref().map(row_to_json))
        } else {
            drop(frames);
            let row = bind_all(sqlx::query(sql), binds)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.as_ref().map(row_to_json))
        }
    }

    /// Run a statement and return the affected row count.
    pub async fn execute(&self, sql: &str, binds: &[BindValue]) -> Result<u64, AppError> {
        tracing::debug!(sql = %sql, "execute");
        let mut frames = self.chain.frames.lock().await;
        if let Some(frame) = frames.last_mut() {
            let done = bind_all(sqlx::query(sql), binds)
                .execute(&mut *frame.tx)
                .await?;
            Ok(done.rows_affected())
        } else {
            drop(frames);
            let done = bind_all(sqlx::query(sql), binds).execute(&self.pool).await?;
            Ok(done.rows_affected())
        }
    }
}

fn bind_all<'q>(
    mut query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    binds: &[BindValue],
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    for b in binds {
        query = query.bind(b.clone());
    }
    query
}
