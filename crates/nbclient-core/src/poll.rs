//! Cancellable polling
//!
//! [`Poll`] runs a refresh factory on a fixed interval in a tokio task.
//! Ticks are skipped while the poll is in standby (for example while the
//! client is backgrounded) and while a previous tick is still in flight,
//! so a slow refresh never overlaps with the next one.

use crate::disposable::{Disposable, DisposalState};
use crate::flag::FlagGuard;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Boxed error returned by a poll factory
pub type PollError = Box<dyn std::error::Error + Send + Sync>;

type Factory = Box<dyn Fn() -> BoxFuture<'static, Result<(), PollError>> + Send + Sync>;

/// Standby policy for a poll
#[derive(Clone, Default)]
pub enum Standby {
    /// Always tick
    #[default]
    Never,
    /// Skip ticks while the predicate returns `true`
    When(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl Standby {
    /// Build a standby policy from a predicate
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self::When(Arc::new(predicate))
    }

    /// Whether ticks should currently be skipped
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        match self {
            Self::Never => false,
            Self::When(predicate) => predicate(),
        }
    }
}

impl fmt::Debug for Standby {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => f.write_str("Standby::Never"),
            Self::When(_) => f.write_str("Standby::When(..)"),
        }
    }
}

/// Poll configuration
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Name used in log output
    pub name: String,
    /// Time between ticks
    pub interval: Duration,
    /// Standby policy
    pub standby: Standby,
}

impl PollOptions {
    /// Create options with no standby
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            standby: Standby::Never,
        }
    }

    /// With standby policy
    #[inline]
    #[must_use]
    pub fn with_standby(mut self, standby: Standby) -> Self {
        self.standby = standby;
        self
    }
}

/// Outcome of a single tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The factory ran and succeeded
    Completed,
    /// The factory ran and failed (the failure is logged)
    Failed,
    /// Skipped: standby was active
    Standby,
    /// Skipped: a previous tick was still in flight
    Coalesced,
    /// Skipped: the poll is disposed
    Disposed,
}

struct PollInner {
    options: PollOptions,
    factory: Factory,
    in_flight: AtomicBool,
    state: DisposalState,
}

impl PollInner {
    async fn tick(&self) -> TickOutcome {
        if self.state.is_disposed() {
            return TickOutcome::Disposed;
        }
        if self.options.standby.is_active() {
            return TickOutcome::Standby;
        }
        let Some(_in_flight) = FlagGuard::try_raise(&self.in_flight) else {
            tracing::debug!("poll '{}': tick coalesced", self.options.name);
            return TickOutcome::Coalesced;
        };

        let result = (self.factory)().await;

        match result {
            Ok(()) => TickOutcome::Completed,
            Err(e) => {
                tracing::warn!("poll '{}' failed: {}", self.options.name, e);
                TickOutcome::Failed
            }
        }
    }
}

/// Interval-driven refresh task
pub struct Poll {
    inner: Arc<PollInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poll {
    /// Create a poll without starting its timer
    ///
    /// Ticks only happen through [`Poll::refresh`] until [`Poll::start`]
    /// is used instead.
    pub fn manual<F>(options: PollOptions, factory: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<(), PollError>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PollInner {
                options,
                factory: Box::new(factory),
                in_flight: AtomicBool::new(false),
                state: DisposalState::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Create a poll and spawn its timer task
    ///
    /// The first tick fires one interval after creation. Must be called
    /// from within a tokio runtime.
    pub fn start<F>(options: PollOptions, factory: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<(), PollError>> + Send + Sync + 'static,
    {
        let poll = Self::manual(options, factory);
        let inner = Arc::clone(&poll.inner);
        let period = inner.options.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if inner.tick().await == TickOutcome::Disposed {
                    break;
                }
            }
        });

        *poll.task.lock() = Some(handle);
        poll
    }

    /// Run one tick now, under the same standby and in-flight guards
    pub async fn refresh(&self) -> TickOutcome {
        self.inner.tick().await
    }

    /// Poll name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// Whether a tick is currently running
    #[inline]
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.inner.in_flight.load(Ordering::Acquire)
    }
}

impl Disposable for Poll {
    fn is_disposed(&self) -> bool {
        self.inner.state.is_disposed()
    }

    fn dispose(&self) {
        if !self.inner.state.begin() {
            return;
        }
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        tracing::debug!("poll '{}' disposed", self.inner.options.name);
    }
}

impl Drop for Poll {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Poll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poll")
            .field("name", &self.inner.options.name)
            .field("interval", &self.inner.options.interval)
            .field("in_flight", &self.is_in_flight())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn counting_factory(
        count: Arc<AtomicUsize>,
    ) -> impl Fn() -> BoxFuture<'static, Result<(), PollError>> + Send + Sync + 'static {
        move || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval() {
        let count = Arc::new(AtomicUsize::new(0));
        let poll = Poll::start(
            PollOptions::new("test", Duration::from_secs(10)),
            counting_factory(Arc::clone(&count)),
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        poll.dispose();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn standby_skips_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let hidden = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&hidden);
        let poll = Poll::manual(
            PollOptions::new("standby", Duration::from_secs(1))
                .with_standby(Standby::when(move || flag.load(Ordering::SeqCst))),
            counting_factory(Arc::clone(&count)),
        );

        assert_eq!(poll.refresh().await, TickOutcome::Standby);
        hidden.store(false, Ordering::SeqCst);
        assert_eq!(poll.refresh().await, TickOutcome::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overlapping_ticks_are_coalesced() {
        let gate = Arc::new(Notify::new());
        let count = Arc::new(AtomicUsize::new(0));

        let factory_gate = Arc::clone(&gate);
        let factory_count = Arc::clone(&count);
        let poll = Arc::new(Poll::manual(
            PollOptions::new("slow", Duration::from_secs(1)),
            move || {
                let gate = Arc::clone(&factory_gate);
                let count = Arc::clone(&factory_count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(())
                }
                .boxed()
            },
        ));

        let first = {
            let poll = Arc::clone(&poll);
            tokio::spawn(async move { poll.refresh().await })
        };
        while !poll.is_in_flight() {
            tokio::task::yield_now().await;
        }

        assert_eq!(poll.refresh().await, TickOutcome::Coalesced);
        gate.notify_one();
        assert_eq!(first.await.unwrap(), TickOutcome::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_refresh_releases_in_flight() {
        let count = Arc::new(AtomicUsize::new(0));
        let factory_count = Arc::clone(&count);
        let stalled = Arc::new(AtomicBool::new(true));
        let factory_stalled = Arc::clone(&stalled);
        let poll = Poll::manual(PollOptions::new("cancelled", Duration::from_secs(1)), move || {
            let count = Arc::clone(&factory_count);
            let stalled = factory_stalled.load(Ordering::SeqCst);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                if stalled {
                    std::future::pending::<()>().await;
                }
                Ok(())
            }
            .boxed()
        });

        let cancelled = tokio::time::timeout(Duration::from_millis(20), poll.refresh()).await;
        assert!(cancelled.is_err());
        assert!(!poll.is_in_flight());

        stalled.store(false, Ordering::SeqCst);
        assert_eq!(poll.refresh().await, TickOutcome::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_reported_not_fatal() {
        let poll = Poll::manual(PollOptions::new("failing", Duration::from_secs(1)), || {
            async { Err::<(), PollError>("boom".into()) }.boxed()
        });

        assert_eq!(poll.refresh().await, TickOutcome::Failed);
        assert_eq!(poll.refresh().await, TickOutcome::Failed);

        poll.dispose();
        assert_eq!(poll.refresh().await, TickOutcome::Disposed);
    }
}
