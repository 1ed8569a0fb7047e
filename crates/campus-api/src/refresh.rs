//! Refresh-cycle ordering and stale-while-revalidate state.
//!
//! Each refresh cycle takes a [`RefreshTicket`] from a shared
//! [`RefreshGeneration`]. Results carrying a ticket from a superseded cycle
//! are discarded, so a slow response can never overwrite a newer one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Monotonic counter of refresh cycles.
#[derive(Debug, Default)]
pub struct RefreshGeneration {
    counter: AtomicU64,
}

impl RefreshGeneration {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start a new cycle, superseding every earlier ticket.
    pub fn begin(self: &Arc<Self>) -> RefreshTicket {
        let generation = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        RefreshTicket {
            generation,
            source: Arc::clone(self),
        }
    }

    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

/// Proof of which refresh cycle a result belongs to.
#[derive(Debug, Clone)]
pub struct RefreshTicket {
    generation: u64,
    source: Arc<RefreshGeneration>,
}

impl RefreshTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// False once a newer cycle has begun.
    pub fn is_current(&self) -> bool {
        self.source.current() == self.generation
    }
}

/// What [`Section::apply`] did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The fetch failed; the previous value is kept.
    Failed,
    /// The ticket was superseded; nothing changed.
    Stale,
}

/// One independently loaded part of a screen.
///
/// A failed load keeps the last good value and records a message for the
/// retry affordance instead of blanking the section.
#[derive(Debug, Clone)]
pub struct Section<T> {
    value: Option<T>,
    error: Option<String>,
}

impl<T> Default for Section<T> {
    fn default() -> Self {
        Self {
            value: None,
            error: None,
        }
    }
}

impl<T> Section<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, ticket: &RefreshTicket, result: Result<T, ApiError>) -> ApplyOutcome {
        if !ticket.is_current() {
            debug!(generation = ticket.generation(), "discarding stale result");
            return ApplyOutcome::Stale;
        }
        match result {
            Ok(value) => {
                self.value = Some(value);
                self.error = None;
                ApplyOutcome::Applied
            }
            Err(e) => {
                warn!(error = %e, "section failed to load");
                self.error = Some(e.user_message());
                ApplyOutcome::Failed
            }
        }
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Message describing the last failure, cleared by the next success.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn needs_retry(&self) -> bool {
        self.error.is_some()
    }
}

/// Run `task` immediately and then every `period` until `cancel` fires.
///
/// Cancellation is checked between runs; a run in progress completes.
///
/// # Panics
/// If `period` is zero.
pub fn spawn_periodic<F, Fut>(
    period: Duration,
    cancel: CancellationToken,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => task().await,
            }
        }
        debug!("periodic task stopped");
    })
}
