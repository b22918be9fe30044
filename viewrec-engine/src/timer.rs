//! Cancellable dwell timers
//!
//! `arm(duration, on_fire) -> TimerHandle`. Cancelling (or dropping) the
//! handle guarantees `on_fire` is not called afterwards by the timer itself.
//! A callback that already ran may have queued a message; consumers guard
//! against that with a generation check (see [`crate::dwell`]).
//!
//! Two implementations:
//! - [`TokioTimer`]: spawns a task on the current tokio runtime
//! - [`ManualTimer`]: simulated clock, advanced explicitly

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Callback run when a timer fires
pub type FireCallback = Box<dyn FnOnce() + Send + 'static>;

/// Source of cancellable one-shot timers
pub trait DwellTimer: Send + Sync {
    fn arm(&self, duration: Duration, on_fire: FireCallback) -> TimerHandle;
}

/// Cancels its timer when cancelled or dropped
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Timers backed by `tokio::time::sleep`
///
/// `arm` must be called from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

impl DwellTimer for TokioTimer {
    fn arm(&self, duration: Duration, on_fire: FireCallback) -> TimerHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(duration) => {
                    if !cancelled.is_cancelled() {
                        on_fire();
                    }
                }
            }
        });

        TimerHandle::new(token)
    }
}

struct PendingTimer {
    due: Duration,
    seq: u64,
    token: CancellationToken,
    on_fire: FireCallback,
}

#[derive(Default)]
struct ManualClock {
    now: Duration,
    next_seq: u64,
    pending: Vec<PendingTimer>,
}

/// Simulated-clock timers
///
/// Nothing fires until [`ManualTimer::advance`] moves the clock past a
/// timer's due time. Timers fire in due order, ties in arming order.
#[derive(Clone, Default)]
pub struct ManualTimer {
    clock: Arc<Mutex<ManualClock>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward and fire every due, uncancelled timer
    ///
    /// Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let due = {
            let mut clock = self.lock();
            clock.now += by;
            let now = clock.now;

            let (mut due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut clock.pending)
                .into_iter()
                .filter(|timer| !timer.token.is_cancelled())
                .partition(|timer| timer.due <= now);
            clock.pending = rest;
            due.sort_by_key(|timer| (timer.due, timer.seq));
            due
        };

        // Callbacks run unlocked so they may arm new timers
        let mut fired = 0;
        for timer in due {
            if !timer.token.is_cancelled() {
                (timer.on_fire)();
                fired += 1;
            }
        }
        fired
    }

    /// Time elapsed on the simulated clock
    pub fn elapsed(&self) -> Duration {
        self.lock().now
    }

    /// Armed timers that have neither fired nor been cancelled
    pub fn pending_count(&self) -> usize {
        self.lock()
            .pending
            .iter()
            .filter(|timer| !timer.token.is_cancelled())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, ManualClock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DwellTimer for ManualTimer {
    fn arm(&self, duration: Duration, on_fire: FireCallback) -> TimerHandle {
        let token = CancellationToken::new();
        let mut clock = self.lock();
        let seq = clock.next_seq;
        clock.next_seq += 1;
        let due = clock.now + duration;
        clock.pending.push(PendingTimer {
            due,
            seq,
            token: token.clone(),
            on_fire,
        });
        TimerHandle::new(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> FireCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            let c = c.clone();
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }) as FireCallback
        })
    }

    #[test]
    fn test_manual_timer_fires_when_due() {
        let timer = ManualTimer::new();
        let (count, callback) = counter();
        let _handle = timer.arm(Duration::from_secs(3), callback());

        assert_eq!(timer.advance(Duration::from_millis(2999)), 0);
        assert_eq!(timer.advance(Duration::from_millis(1)), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(timer.pending_count(), 0);
    }

    #[test]
    fn test_manual_timer_cancel_prevents_fire() {
        let timer = ManualTimer::new();
        let (count, callback) = counter();
        let handle = timer.arm(Duration::from_secs(1), callback());

        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(timer.pending_count(), 0);
        assert_eq!(timer.advance(Duration::from_secs(10)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_timer_drop_cancels() {
        let timer = ManualTimer::new();
        let (count, callback) = counter();
        drop(timer.arm(Duration::from_secs(1), callback()));

        timer.advance(Duration::from_secs(2));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_timer_relative_to_current_time() {
        let timer = ManualTimer::new();
        let (count, callback) = counter();
        timer.advance(Duration::from_secs(5));
        let _handle = timer.arm(Duration::from_secs(1), callback());

        assert_eq!(timer.elapsed(), Duration::from_secs(5));
        timer.advance(Duration::from_millis(500));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        timer.advance(Duration::from_millis(500));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_fires_after_duration() {
        let (count, callback) = counter();
        let _handle = TokioTimer.arm(Duration::from_secs(3), callback());

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_cancelled_never_fires() {
        let (count, callback) = counter();
        let handle = TokioTimer.arm(Duration::from_secs(3), callback());

        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(handle);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
