//! Scoped busy flags
//!
//! [`FlagGuard`] raises an [`AtomicBool`] for the lifetime of the guard and
//! lowers it on drop, so a flag set around an `.await` is cleared even when
//! the surrounding future is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};

/// Holds a flag raised until dropped
#[derive(Debug)]
#[must_use = "the flag is lowered as soon as the guard is dropped"]
pub struct FlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlagGuard<'a> {
    /// Raise the flag unconditionally
    #[inline]
    pub fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self { flag }
    }

    /// Raise the flag only if it is currently lowered
    ///
    /// `None` when another holder already raised it.
    #[inline]
    pub fn try_raise(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowered_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = FlagGuard::raise(&flag);
            assert!(flag.load(Ordering::Acquire));
        }
        assert!(!flag.load(Ordering::Acquire));
    }

    #[test]
    fn try_raise_is_exclusive() {
        let flag = AtomicBool::new(false);
        let guard = FlagGuard::try_raise(&flag);
        assert!(guard.is_some());
        assert!(FlagGuard::try_raise(&flag).is_none());
        drop(guard);
        assert!(FlagGuard::try_raise(&flag).is_some());
    }

    #[tokio::test]
    async fn lowered_when_future_is_cancelled() {
        let flag = AtomicBool::new(false);
        let pending = async {
            let _guard = FlagGuard::raise(&flag);
            std::future::pending::<()>().await;
        };
        let result = tokio::time::timeout(std::time::Duration::from_millis(10), pending).await;
        assert!(result.is_err());
        assert!(!flag.load(Ordering::Acquire));
    }
}
