//! Init Barrier: completion counter for the asynchronous init phase
//!
//! The barrier is created with the full set of modules up front, so a hook
//! finishing early can never make the count reach zero before its siblings
//! were enlisted. Each module gets one [`CompletionToken`]; reporting consumes
//! it, and dropping an unreported token counts as a failure so a panicking
//! hook cannot stall the barrier.
use crate::error::ModuleError;
use crate::report::{InitStage, ModuleFailure};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct BarrierState {
    pending: Vec<String>,
    completed: Vec<String>,
    failures: Vec<ModuleFailure>,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<BarrierState>,
    done: watch::Sender<bool>,
    fired: AtomicUsize,
}

impl Inner {
    fn report(&self, module: &str, result: Result<(), ModuleError>) {
        let finished = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let Some(pos) = state.pending.iter().position(|m| m == module) else {
                return;
            };
            state.pending.remove(pos);
            state.completed.push(module.to_string());
            if let Err(err) = result {
                tracing::warn!(module = %module, error = %err, "async init failed");
                state.failures.push(ModuleFailure::new(module, InitStage::Async, &err));
            } else {
                tracing::debug!(module = %module, "async init done");
            }
            state.pending.is_empty()
        };

        if finished {
            self.fired.fetch_add(1, Ordering::AcqRel);
            self.done.send_replace(true);
        }
    }
}

/// What the barrier saw once every module reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarrierOutcome {
    /// Modules in the order they reported
    pub completed: Vec<String>,
    pub failures: Vec<ModuleFailure>,
}

#[derive(Debug, Clone)]
pub struct InitBarrier {
    inner: Arc<Inner>,
}

impl InitBarrier {
    /// Enlist every module at once and hand back one token per module, in
    /// the same order.
    pub fn new<I>(modules: I) -> (Self, Vec<CompletionToken>)
    where
        I: IntoIterator<Item = String>,
    {
        let pending: Vec<String> = modules.into_iter().collect();
        let empty = pending.is_empty();
        let (done, _) = watch::channel(empty);

        let inner = Arc::new(Inner {
            state: Mutex::new(BarrierState {
                pending: pending.clone(),
                ..BarrierState::default()
            }),
            done,
            fired: AtomicUsize::new(usize::from(empty)),
        });

        let tokens = pending
            .into_iter()
            .map(|module| CompletionToken {
                module,
                inner: Some(Arc::clone(&inner)),
            })
            .collect();

        (Self { inner }, tokens)
    }

    /// Modules that have not reported yet, in enlistment order
    pub fn pending(&self) -> Vec<String> {
        self.state().pending.clone()
    }

    pub fn outstanding(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_complete(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// How many times the barrier has released its waiters; 1 once complete
    pub fn times_fired(&self) -> usize {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until every module reported. No timeout is applied here.
    pub async fn wait(&self) -> BarrierOutcome {
        let mut rx = self.inner.done.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|done| *done).await;
        self.outcome()
    }

    /// Snapshot of completions and failures so far
    pub fn outcome(&self) -> BarrierOutcome {
        let state = self.state();
        BarrierOutcome {
            completed: state.completed.clone(),
            failures: state.failures.clone(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BarrierState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One module's obligation to report completion exactly once
#[derive(Debug)]
pub struct CompletionToken {
    module: String,
    inner: Option<Arc<Inner>>,
}

impl CompletionToken {
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn complete(mut self, result: Result<(), ModuleError>) {
        if let Some(inner) = self.inner.take() {
            inner.report(&self.module, result);
        }
    }
}

impl Drop for CompletionToken {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let err = if std::thread::panicking() {
                ModuleError::Panicked
            } else {
                ModuleError::Dropped
            };
            inner.report(&self.module, Err(err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("m{i}")).collect()
    }

    #[test]
    fn test_empty_barrier_is_complete() {
        let (barrier, tokens) = InitBarrier::new(Vec::new());
        assert!(tokens.is_empty());
        assert!(barrier.is_complete());
        assert_eq!(barrier.times_fired(), 1);
    }

    #[test]
    fn test_fires_after_last_report_only() {
        let (barrier, tokens) = InitBarrier::new(names(3));
        let mut tokens = tokens.into_iter();

        tokens.next().unwrap().complete(Ok(()));
        tokens.next().unwrap().complete(Ok(()));
        assert!(!barrier.is_complete());
        assert_eq!(barrier.pending(), vec!["m2".to_string()]);

        tokens.next().unwrap().complete(Ok(()));
        assert!(barrier.is_complete());
        assert_eq!(barrier.times_fired(), 1);
    }

    #[test]
    fn test_dropped_token_counts_as_failure() {
        let (barrier, tokens) = InitBarrier::new(names(1));
        drop(tokens);

        let outcome = barrier.outcome();
        assert!(barrier.is_complete());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].module, "m0");
        assert_eq!(outcome.failures[0].error, ModuleError::Dropped.to_string());
    }

    #[tokio::test]
    async fn test_panicking_task_is_recorded() {
        let (barrier, tokens) = InitBarrier::new(names(1));
        let token = tokens.into_iter().next().unwrap();

        let handle = tokio::spawn(async move {
            let _token = token;
            panic!("boom");
        });
        assert!(handle.await.is_err());

        let outcome = barrier.wait().await;
        assert_eq!(outcome.failures[0].error, ModuleError::Panicked.to_string());
    }

    #[tokio::test]
    async fn test_wait_returns_completion_order() {
        let (barrier, tokens) = InitBarrier::new(names(3));
        for token in tokens.into_iter().rev() {
            token.complete(Ok(()));
        }

        let outcome = barrier.wait().await;
        assert_eq!(outcome.completed, vec!["m2", "m1", "m0"]);
        assert!(outcome.failures.is_empty());
    }
}
