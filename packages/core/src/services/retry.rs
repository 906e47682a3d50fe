//! Retry for operations that lost the write lock
//!
//! Only [`HierarchyError::ConcurrentModification`] is retried. Every engine
//! operation rolls back completely on that error, so the whole operation can
//! simply be issued again.

use crate::config::HierarchyConfig;
use crate::services::error::HierarchyError;
use std::future::Future;

/// Run `op`, re-running it up to `config.max_retries` times while it fails
/// with a retryable error
///
/// Attempt `n` (1-based) waits `n * config.retry_backoff` before re-running.
/// The last error is returned once attempts are exhausted.
///
/// # Examples
///
/// ```rust,no_run
/// # use synergia_core::services::{with_retry, HierarchyEngine, NoPayload};
/// # use synergia_core::models::{NewNode, NodeType};
/// # async fn example(engine: &HierarchyEngine) -> Result<(), synergia_core::services::HierarchyError> {
/// let node = with_retry(engine.config(), || {
///     engine.insert_node(NewNode::root(NodeType::Client, "ACME"), &NoPayload)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, F, Fut>(config: &HierarchyConfig, mut op: F) -> Result<T, HierarchyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HierarchyError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.retry_backoff * attempt;
                tracing::warn!(
                    "Retrying after concurrent modification (attempt {}/{}, waiting {:?}): {}",
                    attempt,
                    config.max_retries,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_config(max_retries: u32) -> HierarchyConfig {
        HierarchyConfig {
            max_retries,
            retry_backoff: Duration::from_millis(1),
            ..HierarchyConfig::default()
        }
    }

    fn busy() -> HierarchyError {
        HierarchyError::ConcurrentModification {
            context: "database is locked".into(),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_retry(&fast_config(3), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(busy())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast_config(2), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(busy())
        })
        .await;

        assert!(matches!(
            result,
            Err(HierarchyError::ConcurrentModification { .. })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_other_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = with_retry(&fast_config(5), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(HierarchyError::node_not_found(7))
        })
        .await;

        assert!(matches!(result, Err(HierarchyError::NodeNotFound { id: 7 })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
