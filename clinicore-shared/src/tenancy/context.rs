//! Request-scoped schema context
//!
//! The active schema of a request lives in a tokio task-local. It is set once
//! by wrapping the request future in [`SchemaContext::scope`], read by the
//! data access layer on every connection checkout, and disappears together
//! with the wrapped future, whether it completes, fails, panics or is
//! dropped. Two requests running concurrently on the same worker thread each
//! see only their own value, and outside any scope the schema is `public`.
//!
//! # Spawned tasks
//!
//! Task-locals are not inherited by `tokio::spawn`. Work spawned from a
//! request that touches tenant data must use [`SchemaContext::spawn`], which
//! re-enters the caller's schema inside the new task.
//!
//! # Example
//!
//! ```no_run
//! use clinicore_shared::tenancy::{SchemaContext, SchemaName};
//!
//! # async fn example() {
//! let schema = SchemaContext::scope(SchemaName::for_tenant(7), async {
//!     SchemaContext::current()
//! })
//! .await;
//!
//! assert_eq!(schema.to_string(), "tenant_7");
//! assert!(SchemaContext::current().is_public());
//! # }
//! ```

use std::future::Future;
use tokio::task::JoinHandle;

use super::schema::SchemaName;

tokio::task_local! {
    static ACTIVE_SCHEMA: SchemaName;
}

/// Accessors for the task-local active schema
pub struct SchemaContext;

impl SchemaContext {
    /// Runs `fut` with `schema` as the active schema
    ///
    /// The value is visible to everything `fut` awaits and is gone as soon as
    /// `fut` finishes or is dropped. Scopes nest; the innermost wins.
    pub async fn scope<F>(schema: SchemaName, fut: F) -> F::Output
    where
        F: Future,
    {
        ACTIVE_SCHEMA.scope(schema, fut).await
    }

    /// Synchronous counterpart of [`SchemaContext::scope`]
    pub fn sync_scope<F, R>(schema: SchemaName, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        ACTIVE_SCHEMA.sync_scope(schema, f)
    }

    /// The active schema, `public` when no scope is set
    pub fn current() -> SchemaName {
        ACTIVE_SCHEMA.try_with(|schema| *schema).unwrap_or_default()
    }

    /// Whether the caller runs inside an explicit schema scope
    pub fn is_scoped() -> bool {
        ACTIVE_SCHEMA.try_with(|_| ()).is_ok()
    }

    /// Spawns `fut` on the runtime with the caller's active schema
    pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let schema = Self::current();
        tokio::spawn(ACTIVE_SCHEMA.scope(schema, fut))
    }
}

/// Shorthand for [`SchemaContext::current`]
pub fn current_schema() -> SchemaName {
    SchemaContext::current()
}

/// Shorthand for [`SchemaContext::spawn`]
pub fn spawn_with_current_schema<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    SchemaContext::spawn(fut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_default_is_public() {
        assert_eq!(SchemaContext::current(), SchemaName::Public);
        assert!(!SchemaContext::is_scoped());
    }

    #[tokio::test]
    async fn test_scope_sets_and_discards() {
        let inside = SchemaContext::scope(SchemaName::for_tenant(7), async {
            tokio::task::yield_now().await;
            (SchemaContext::current(), SchemaContext::is_scoped())
        })
        .await;

        assert_eq!(inside, (SchemaName::for_tenant(7), true));
        assert_eq!(current_schema(), SchemaName::Public);
    }

    #[tokio::test]
    async fn test_nested_scope_innermost_wins() {
        SchemaContext::scope(SchemaName::for_tenant(1), async {
            let inner = SchemaContext::scope(SchemaName::for_tenant(2), async {
                SchemaContext::current()
            })
            .await;
            assert_eq!(inner, SchemaName::for_tenant(2));
            assert_eq!(SchemaContext::current(), SchemaName::for_tenant(1));
        })
        .await;
    }

    #[test]
    fn test_sync_scope() {
        let seen = SchemaContext::sync_scope(SchemaName::for_tenant(5), SchemaContext::current);
        assert_eq!(seen, SchemaName::for_tenant(5));
        assert_eq!(SchemaContext::current(), SchemaName::Public);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scopes_do_not_cross_talk() {
        let mut handles = Vec::new();

        for tenant_id in 1..=64i64 {
            handles.push(tokio::spawn(SchemaContext::scope(
                SchemaName::for_tenant(tenant_id),
                async move {
                    let mut observed = Vec::new();
                    for round in 0..10u64 {
                        observed.push(SchemaContext::current());
                        // Interleave with the other requests and let the
                        // scheduler migrate this task between threads.
                        tokio::time::sleep(Duration::from_millis(round % 3)).await;
                        tokio::task::yield_now().await;
                    }
                    (tenant_id, observed)
                },
            )));
        }

        for handle in handles {
            let (tenant_id, observed) = handle.await.unwrap();
            assert!(
                observed.iter().all(|s| *s == SchemaName::for_tenant(tenant_id)),
                "tenant {tenant_id} observed a foreign schema: {observed:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_plain_spawn_does_not_inherit() {
        let seen = SchemaContext::scope(SchemaName::for_tenant(9), async {
            tokio::spawn(async { SchemaContext::current() }).await.unwrap()
        })
        .await;

        assert_eq!(seen, SchemaName::Public);
    }

    #[tokio::test]
    async fn test_spawn_carries_schema() {
        let seen = SchemaContext::scope(SchemaName::for_tenant(9), async {
            spawn_with_current_schema(async { SchemaContext::current() })
                .await
                .unwrap()
        })
        .await;

        assert_eq!(seen, SchemaName::for_tenant(9));
    }

    #[tokio::test]
    async fn test_cancelled_scope_does_not_leak() {
        let result = tokio::time::timeout(
            Duration::from_millis(10),
            SchemaContext::scope(SchemaName::for_tenant(3), async {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(SchemaContext::current(), SchemaName::Public);
    }

    #[tokio::test]
    async fn test_panicking_request_does_not_leak() {
        let handle = tokio::spawn(SchemaContext::scope(SchemaName::for_tenant(4), async {
            panic!("handler blew up");
        }));

        assert!(handle.await.is_err());
        assert_eq!(SchemaContext::current(), SchemaName::Public);
    }
}
