//! Lazily constructed, retry-on-failure singletons.
//!
//! A `LifecycleCell` moves `Uninitialized -> Initializing -> Ready`. A failed
//! or cancelled initialization keeps nothing and returns to `Uninitialized`,
//! so the next caller starts over. Concurrent callers wait for the one
//! running initialization rather than build a second instance.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Uninitialized,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Initializing => 1,
            Self::Ready => 2,
        }
    }
}

/// Marks the cell `Initializing` while alive; resets it to `Uninitialized`
/// on drop unless `complete` was called.
struct InitGuard<'a> {
    state: &'a AtomicU8,
    completed: bool,
}

impl<'a> InitGuard<'a> {
    fn begin(state: &'a AtomicU8) -> Self {
        state.store(LifecycleState::Initializing.as_u8(), Ordering::SeqCst);
        Self {
            state,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.state
                .store(LifecycleState::Uninitialized.as_u8(), Ordering::SeqCst);
        }
    }
}

pub struct LifecycleCell<T> {
    slot: OnceCell<Arc<T>>,
    state: AtomicU8,
}

impl<T> Default for LifecycleCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LifecycleCell<T> {
    pub fn new() -> Self {
        Self {
            slot: OnceCell::new(),
            state: AtomicU8::new(LifecycleState::Uninitialized.as_u8()),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Return the ready instance, or run `init` to build one.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ready = self
            .slot
            .get_or_try_init(|| async {
                let guard = InitGuard::begin(&self.state);
                let value = init().await?;
                guard.complete();
                Ok::<_, E>(Arc::new(value))
            })
            .await?;
        self.state
            .store(LifecycleState::Ready.as_u8(), Ordering::SeqCst);
        Ok(ready.clone())
    }

    /// The instance, if one is ready. Never triggers initialization.
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn failure_resets_and_next_call_retries() {
        let cell: LifecycleCell<u32> = LifecycleCell::new();

        let first: Result<Arc<u32>, &str> = cell.get_or_try_init(|| async { Err("boom") }).await;
        assert_eq!(first.expect_err("should fail"), "boom");
        assert_eq!(cell.state(), LifecycleState::Uninitialized);
        assert!(cell.get().is_none());

        let second: Result<Arc<u32>, &str> = cell.get_or_try_init(|| async { Ok(7) }).await;
        assert_eq!(*second.expect("ready"), 7);
        assert_eq!(cell.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn ready_instance_is_reused() {
        let cell: LifecycleCell<u32> = LifecycleCell::new();
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<Arc<u32>, ()> = cell
                .get_or_try_init(|| async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .await;
            assert!(value.is_ok());
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_construction() {
        let cell: Arc<LifecycleCell<usize>> = Arc::new(LifecycleCell::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cell = cell.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                cell.get_or_try_init(|| async {
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    Ok::<_, ()>(builds.fetch_add(1, Ordering::SeqCst))
                })
                .await
            }));
        }

        for handle in handles {
            let value = handle.await.expect("join").expect("init");
            assert_eq!(*value, 0);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_init_returns_to_uninitialized() {
        let cell: LifecycleCell<u32> = LifecycleCell::new();

        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            cell.get_or_try_init(|| async {
                std::future::pending::<()>().await;
                Ok::<_, ()>(1)
            }),
        )
        .await;
        assert!(pending.is_err(), "init should still be pending");
        assert_eq!(cell.state(), LifecycleState::Uninitialized);
        assert!(cell.get().is_none());

        let value = cell
            .get_or_try_init(|| async { Ok::<_, ()>(5) })
            .await
            .expect("init");
        assert_eq!(*value, 5);
        assert_eq!(cell.state(), LifecycleState::Ready);
    }
}
