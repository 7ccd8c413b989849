// Tenant context propagation
// Carries the current tenant id through every await point of one event's handling

//! # Context Propagator
//!
//! The shared service was never written to accept a tenant id, so the id is
//! carried in a Tokio task-local instead of a parameter. A scope opened with
//! [`run_with_tenant`] is visible to the wrapped future and everything it
//! awaits, survives suspension, and is invisible to other tasks polled on the
//! same runtime.
//!
//! Nested scopes shadow the outer one and restore it on exit (LIFO).
//!
//! Task-locals are not inherited by `tokio::spawn`; code inside a scope that
//! fans work out to new tasks uses [`spawn_with_current_tenant`] so the
//! spawned work stays in the same tenant's view.

use std::future::Future;
use tokio::task::JoinHandle;

tokio::task_local! {
    /// Tenant id of the event being handled by the current task
    static CURRENT_TENANT: String;
}

/// Run `body` with `tenant_id` as the current tenant
pub async fn run_with_tenant<F, T>(tenant_id: impl Into<String>, body: F) -> T
where
    F: Future<Output = T>,
{
    CURRENT_TENANT.scope(tenant_id.into(), body).await
}

/// Synchronous counterpart of [`run_with_tenant`]
pub fn with_tenant_sync<F, T>(tenant_id: impl Into<String>, body: F) -> T
where
    F: FnOnce() -> T,
{
    CURRENT_TENANT.sync_scope(tenant_id.into(), body)
}

/// Current tenant id, `None` outside any scope
pub fn current_tenant() -> Option<String> {
    CURRENT_TENANT.try_with(|id| id.clone()).ok()
}

/// Spawn a task that inherits the current tenant, if any
pub fn spawn_with_current_tenant<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match current_tenant() {
        Some(tenant_id) => tokio::spawn(CURRENT_TENANT.scope(tenant_id, future)),
        None => tokio::spawn(future),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Barrier;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_no_scope_means_no_tenant() {
        assert_eq!(current_tenant(), None);
    }

    #[tokio::test]
    async fn test_scope_survives_suspension() {
        let seen = run_with_tenant("alice", async {
            tokio::task::yield_now().await;
            tokio::time::sleep(Duration::from_millis(5)).await;
            current_tenant()
        })
        .await;
        assert_eq!(seen.as_deref(), Some("alice"));
        assert_eq!(current_tenant(), None);
    }

    #[tokio::test]
    async fn test_nested_scopes_restore_outer_tenant() {
        let trace = run_with_tenant("outer", async {
            let mut trace = vec![current_tenant()];
            let inner = run_with_tenant("inner", async {
                tokio::task::yield_now().await;
                current_tenant()
            })
            .await;
            trace.push(inner);
            trace.push(current_tenant());
            trace
        })
        .await;
        assert_eq!(
            trace,
            vec![
                Some("outer".to_string()),
                Some("inner".to_string()),
                Some("outer".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_interleaved_scopes_do_not_leak() {
        let barrier = Arc::new(Barrier::new(2));
        let observe = |tenant: &'static str, barrier: Arc<Barrier>| async move {
            run_with_tenant(tenant, async move {
                let mut seen = Vec::new();
                for _ in 0..3 {
                    barrier.wait().await;
                    seen.push(current_tenant());
                    tokio::task::yield_now().await;
                }
                seen
            })
            .await
        };

        let (a, b) = tokio::join!(
            observe("t1", barrier.clone()),
            observe("t2", barrier.clone())
        );
        assert!(a.iter().all(|t| t.as_deref() == Some("t1")));
        assert!(b.iter().all(|t| t.as_deref() == Some("t2")));
    }

    #[tokio::test]
    async fn test_spawned_work_inherits_tenant() {
        let seen = run_with_tenant("alice", async {
            spawn_with_current_tenant(async { current_tenant() })
                .await
                .unwrap()
        })
        .await;
        assert_eq!(seen.as_deref(), Some("alice"));

        let plain = run_with_tenant("alice", async {
            tokio::spawn(async { current_tenant() }).await.unwrap()
        })
        .await;
        assert_eq!(plain, None);
    }

    #[test]
    fn test_sync_scope() {
        assert_eq!(with_tenant_sync("bob", current_tenant).as_deref(), Some("bob"));
        assert_eq!(current_tenant(), None);
    }
}
