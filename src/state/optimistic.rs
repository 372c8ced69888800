//! Optimistic mutations
//!
//! apply(local patch) -> call(remote) -> reconcile on success,
//! rollback(undo token) on failure. Every store mutation that shows its
//! result before the server confirms it goes through here.

use std::future::Future;

use tokio::sync::RwLock;

use crate::error::Result;
use crate::metrics::OPTIMISTIC_ROLLBACKS_TOTAL;

/// One speculative change to a piece of store state
pub struct OptimisticMutation<'a, S> {
    state: &'a RwLock<S>,
    operation: &'static str,
}

impl<'a, S> OptimisticMutation<'a, S> {
    pub fn new(state: &'a RwLock<S>, operation: &'static str) -> Self {
        Self { state, operation }
    }

    /// Run the mutation
    ///
    /// # Arguments
    /// * `apply` - Local patch; returns the undo token
    /// * `remote` - The request confirming the patch
    /// * `reconcile` - Folds the server's answer into local state
    /// * `rollback` - Reverts exactly what `apply` changed
    ///
    /// The lock is never held across the remote call.
    pub async fn run<U, T, Fut>(
        self,
        apply: impl FnOnce(&mut S) -> U,
        remote: Fut,
        reconcile: impl FnOnce(&mut S, &T),
        rollback: impl FnOnce(&mut S, U),
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let undo = {
            let mut state = self.state.write().await;
            apply(&mut state)
        };

        match remote.await {
            Ok(value) => {
                let mut state = self.state.write().await;
                reconcile(&mut state, &value);
                Ok(value)
            }
            Err(error) => {
                {
                    let mut state = self.state.write().await;
                    rollback(&mut state, undo);
                }
                OPTIMISTIC_ROLLBACKS_TOTAL
                    .with_label_values(&[self.operation])
                    .inc();
                tracing::warn!(
                    operation = self.operation,
                    error = %error,
                    "Optimistic update rolled back"
                );
                Err(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use std::collections::HashMap;

    #[tokio::test]
    async fn failure_restores_previous_value() {
        let state = RwLock::new(HashMap::from([("img".to_string(), false)]));

        let result: Result<bool> = OptimisticMutation::new(&state, "test_toggle")
            .run(
                |map| {
                    let previous = map.get("img").copied();
                    map.insert("img".to_string(), true);
                    previous
                },
                async { Err(ClientError::from_status(500, None)) },
                |_, _| {},
                |map, previous| match previous {
                    Some(value) => {
                        map.insert("img".to_string(), value);
                    }
                    None => {
                        map.remove("img");
                    }
                },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(state.read().await.get("img"), Some(&false));
    }

    #[test]
    fn success_reconciles_with_server_value() {
        let state = RwLock::new(0u64);

        let result = tokio_test::block_on(OptimisticMutation::new(&state, "test_counter").run(
            |count| {
                *count += 1;
            },
            async { Ok(7u64) },
            |count, server| *count = *server,
            |count, _| *count -= 1,
        ));

        assert_eq!(result.unwrap(), 7);
        assert_eq!(*state.try_read().unwrap(), 7);
    }

    #[tokio::test]
    async fn patch_is_visible_while_request_is_pending() {
        let state = std::sync::Arc::new(RwLock::new(false));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let task_state = state.clone();
        let task = tokio::spawn(async move {
            OptimisticMutation::new(&*task_state, "test_pending")
                .run(
                    |flag| *flag = true,
                    async move {
                        let _ = rx.await;
                        Ok(())
                    },
                    |_, _| {},
                    |flag, _| *flag = false,
                )
                .await
        });

        tokio::task::yield_now().await;
        for _ in 0..10 {
            if *state.read().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(*state.read().await);

        tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(*state.read().await);
    }
}
