//! Deferred and repeating work scheduling on a monotonic, owner-driven clock.
//!
//! The service never sleeps on its own. Its owner reports elapsed time through
//! [`TimerService::pop_due`] and [`TimerService::settle`], which keeps firing
//! order deterministic and lets tests drive time directly.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    fmt,
    time::Duration,
};

use tracing::debug;

const MIN_REPEAT_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredTimer<W> {
    pub handle: TimerHandle,
    pub due: Duration,
    pub work: W,
}

struct Armed<W> {
    due: Duration,
    seq: u64,
    interval: Option<Duration>,
    work: W,
}

pub struct TimerService<W> {
    now: Duration,
    next_handle: u64,
    next_seq: u64,
    // (due, seq) ordering: equal due times release in scheduling order.
    queue: BinaryHeap<Reverse<(Duration, u64, TimerHandle)>>,
    armed: HashMap<TimerHandle, Armed<W>>,
}

impl<W> Default for TimerService<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> TimerService<W> {
    pub fn new() -> Self {
        Self {
            now: Duration::ZERO,
            next_handle: 0,
            next_seq: 0,
            queue: BinaryHeap::new(),
            armed: HashMap::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule(&mut self, delay: Duration, work: W) -> TimerHandle {
        self.arm(delay, None, work)
    }

    /// Arms `work` to fire every `interval`, measured from the previous firing.
    pub fn schedule_repeating(&mut self, interval: Duration, work: W) -> TimerHandle {
        let interval = interval.max(MIN_REPEAT_INTERVAL);
        self.arm(interval, Some(interval), work)
    }

    /// Disarms a timer. Returns `false` when it already fired or was cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let removed = self.armed.remove(&handle).is_some();
        if removed {
            debug!("timer: cancelled handle={handle}");
        }
        removed
    }

    pub fn cancel_all(&mut self) -> usize {
        let count = self.armed.len();
        self.armed.clear();
        self.queue.clear();
        count
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.armed.contains_key(&handle)
    }

    pub fn due_at(&self, handle: TimerHandle) -> Option<Duration> {
        self.armed.get(&handle).map(|armed| armed.due)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }

    pub fn repeating_count(&self) -> usize {
        self.armed
            .values()
            .filter(|armed| armed.interval.is_some())
            .count()
    }

    /// Earliest due time among armed timers.
    pub fn next_due(&mut self) -> Option<Duration> {
        self.discard_stale();
        self.queue.peek().map(|Reverse((due, _, _))| *due)
    }

    /// Moves the clock forward to `until` once nothing else is due.
    pub fn settle(&mut self, until: Duration) {
        if until > self.now {
            self.now = until;
        }
    }

    fn arm(&mut self, delay: Duration, interval: Option<Duration>, work: W) -> TimerHandle {
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);
        let due = self.now + delay;
        let seq = self.push(due, handle);
        self.armed.insert(
            handle,
            Armed {
                due,
                seq,
                interval,
                work,
            },
        );
        debug!(
            "timer: armed handle={handle} due_ms={} repeating={}",
            due.as_millis(),
            interval.is_some()
        );
        handle
    }

    fn push(&mut self, due: Duration, handle: TimerHandle) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.queue.push(Reverse((due, seq, handle)));
        seq
    }

    fn is_current(&self, seq: u64, handle: TimerHandle) -> bool {
        self.armed
            .get(&handle)
            .is_some_and(|armed| armed.seq == seq)
    }

    // Cancelled and re-armed entries stay in the heap until they surface here.
    fn discard_stale(&mut self) {
        while let Some(Reverse((_, seq, handle))) = self.queue.peek().copied() {
            if self.is_current(seq, handle) {
                break;
            }
            self.queue.pop();
        }
    }
}

impl<W: Clone> TimerService<W> {
    /// Releases the next timer due at or before `until`, advancing the clock to
    /// its due time. Repeating timers are re-armed before being returned.
    pub fn pop_due(&mut self, until: Duration) -> Option<FiredTimer<W>> {
        self.discard_stale();
        let Reverse((due, _, handle)) = *self.queue.peek()?;
        if due > until {
            return None;
        }
        self.queue.pop();
        if due > self.now {
            self.now = due;
        }

        let interval = self.armed.get(&handle)?.interval;
        let work = match interval {
            Some(interval) => {
                let next_due = due + interval;
                let seq = self.push(next_due, handle);
                let armed = self.armed.get_mut(&handle)?;
                armed.due = next_due;
                armed.seq = seq;
                armed.work.clone()
            }
            None => self.armed.remove(&handle)?.work,
        };

        Some(FiredTimer { handle, due, work })
    }
}

#[cfg(test)]
#[path = "tests/timer_tests.rs"]
mod tests;
