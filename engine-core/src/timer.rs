//! The graduated countdown timer used by atomic stages: a single terminal
//! timeout preceded by graduated alerts at ever-more-frequent intervals as the
//! deadline approaches.
//!
//! Unlike the teacher's per-frame polled `Timer` (there is no heartbeat loop
//! driving this engine — requests arrive as discrete chat messages), each
//! scheduled firing is a `tokio::spawn`ed task that sleeps for its delay and
//! then invokes the handler, the way `relay-server::main`'s watchdog task is
//! spawned once and sleeps on an interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Minimum lead time of the first (closest-to-deadline) alert.
pub const MIN_ALERT: u64 = 10;

/// What fired: a graduated alert carrying the seconds still remaining until
/// the deadline, or the terminal timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    Alert { remaining_secs: u64 },
    Timeout,
}

/// Computes the alert schedule for a total duration of `total_secs`,
/// returning `(delay_from_start, event)` pairs in ascending delay order. The
/// terminal timeout is always the last entry, fired at `total_secs`.
///
/// Alerts sit at offsets `MIN_ALERT, 2*MIN_ALERT, 4*MIN_ALERT, ...` from the
/// deadline — each alert twice as close to the deadline as its predecessor —
/// kept only while the offset does not exceed half the total interval. The
/// uncovered lead-in before the first alert is the "residual" and carries no
/// handler of its own.
fn compute_schedule(total_secs: u64) -> Vec<(u64, TimerEvent)> {
    let mut schedule = Vec::new();
    if total_secs == 0 {
        return schedule;
    }
    let half = total_secs / 2;
    let mut offset = MIN_ALERT;
    let mut offsets = Vec::new();
    while offset <= half {
        offsets.push(offset);
        offset *= 2;
    }
    for offset in offsets.into_iter().rev() {
        schedule.push((
            total_secs - offset,
            TimerEvent::Alert {
                remaining_secs: offset,
            },
        ));
    }
    schedule.push((total_secs, TimerEvent::Timeout));
    schedule
}

/// A single match's countdown. Constructing a new one supersedes (stops) any
/// previous timer the caller was holding; `stop()` is idempotent.
pub struct GraduatedTimer {
    is_over: Arc<AtomicBool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl GraduatedTimer {
    /// Starts a countdown of `total_secs` seconds. A `total_secs` of zero
    /// produces a no-op timer that never fires. `handler` is invoked for
    /// every alert and for the terminal timeout; it is responsible for
    /// acquiring the match lock and re-checking stage state before touching
    /// it, so a timeout racing a request that already checked the stage out
    /// becomes a silent no-op.
    pub fn start<F>(total_secs: u64, handler: F) -> Self
    where
        F: Fn(TimerEvent) + Send + Sync + 'static,
    {
        let is_over = Arc::new(AtomicBool::new(total_secs == 0));
        if total_secs == 0 {
            return GraduatedTimer {
                is_over,
                handles: Vec::new(),
            };
        }

        let handler = Arc::new(handler);
        let mut handles = Vec::with_capacity(4);
        for (delay, event) in compute_schedule(total_secs) {
            let is_over = is_over.clone();
            let handler = handler.clone();
            let is_terminal = matches!(event, TimerEvent::Timeout);
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(delay)).await;
                if is_terminal {
                    // Terminal delivery closes the flag; a prior stop() makes this a no-op.
                    if is_over.swap(true, Ordering::SeqCst) {
                        return;
                    }
                } else if is_over.load(Ordering::SeqCst) {
                    return;
                }
                handler(event);
            }));
        }
        GraduatedTimer { is_over, handles }
    }

    /// Cancels every pending firing. Idempotent.
    pub fn stop(&self) {
        self.is_over.store(true, Ordering::SeqCst);
        for handle in &self.handles {
            handle.abort();
        }
    }

    /// True once the terminal timeout has fired or `stop()` was called.
    pub fn is_over(&self) -> bool {
        self.is_over.load(Ordering::SeqCst)
    }
}

impl Drop for GraduatedTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_for_forty_seconds_has_two_alerts() {
        // S4: total=40 -> alerts at offsets 10 and 20 (t=30, t=20), terminal at t=40.
        let schedule = compute_schedule(40);
        assert_eq!(
            schedule,
            vec![
                (20, TimerEvent::Alert { remaining_secs: 20 }),
                (30, TimerEvent::Alert { remaining_secs: 10 }),
                (40, TimerEvent::Timeout),
            ]
        );
    }

    #[test]
    fn schedule_for_fifteen_seconds_is_terminal_only() {
        let schedule = compute_schedule(15);
        assert_eq!(schedule, vec![(15, TimerEvent::Timeout)]);
    }

    #[test]
    fn zero_duration_is_a_no_op() {
        assert!(compute_schedule(0).is_empty());
    }

    #[tokio::test]
    async fn zero_duration_timer_never_fires() {
        use std::sync::atomic::AtomicU32;
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        let timer = GraduatedTimer::start(0, move |_| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_over());
        timer.stop();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
