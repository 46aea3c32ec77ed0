// crates/flotilla-core/src/runtime/clock.rs
// ============================================================================
// Module: Flotilla Clocks
// Description: System and manually driven implementations of the Clock seam.
// Purpose: Let production use tokio time while tests advance virtual time.
// Dependencies: crate::interfaces, tokio
// ============================================================================

//! ## Overview
//! [`SystemClock`] reads Unix time and sleeps on the tokio timer.
//! [`ManualClock`] only moves when [`ManualClock::advance`] is called; every
//! sleeper whose deadline has been reached is woken during that call, which
//! lets tests drive agent ticks and convergence deadlines deterministically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::core::Timestamp;
use crate::interfaces::Clock;

// ============================================================================
// SECTION: System Clock
// ============================================================================

/// Wall-clock time backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Timestamp::from_millis(millis)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// ============================================================================
// SECTION: Manual Clock
// ============================================================================

/// A pending sleeper registered on a [`ManualClock`].
#[derive(Debug)]
struct Sleeper {
    /// Wake-up time.
    deadline: Timestamp,
    /// Fired when the deadline is reached.
    waker: oneshot::Sender<()>,
}

/// Mutable state of a [`ManualClock`].
#[derive(Debug, Default)]
struct ManualState {
    /// Current virtual time.
    now: Timestamp,
    /// Sleepers that have not fired yet.
    sleepers: Vec<Sleeper>,
}

/// Virtual clock advanced explicitly by tests.
///
/// # Invariants
/// - Time never moves backward.
/// - A sleep of zero duration completes immediately.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Clock state.
    state: Mutex<ManualState>,
}

impl ManualClock {
    /// Creates a clock at [`Timestamp::EPOCH`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a clock starting at `start`.
    #[must_use]
    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                sleepers: Vec::new(),
            }),
        }
    }

    /// Moves time forward and wakes every sleeper whose deadline passed.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now = state.now.saturating_add(duration);
        let now = state.now;
        let (due, waiting): (Vec<Sleeper>, Vec<Sleeper>) =
            state.sleepers.drain(..).partition(|sleeper| sleeper.deadline <= now);
        state.sleepers = waiting.into_iter().filter(|sleeper| !sleeper.waker.is_closed()).collect();
        drop(state);
        for sleeper in due {
            let _ = sleeper.waker.send(());
        }
    }

    /// Returns the number of sleepers still waiting (dropped ones excluded).
    #[must_use]
    pub fn pending_sleepers(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sleepers.iter().filter(|sleeper| !sleeper.waker.is_closed()).count()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let receiver = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let (waker, receiver) = oneshot::channel();
            let deadline = state.now.saturating_add(duration);
            state.sleepers.push(Sleeper {
                deadline,
                waker,
            });
            receiver
        };
        let _ = receiver.await;
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
