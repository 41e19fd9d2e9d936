//! Shared deadline thread.
//!
//! Time-bounded tokens register an expiry callback here instead of parking a
//! thread of their own. A single `kairos-deadline` thread sleeps until the
//! earliest deadline, runs whatever is due and goes back to sleep. Disarmed
//! entries leave the callback table at once and the heap lazily.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::sync::OnceLock;
use std::thread;
use std::time::Instant;

type Expiry = Box<dyn FnOnce() + Send + 'static>;

static TIMER: OnceLock<DeadlineTimer> = OnceLock::new();

// dead heap entries tolerated before the heap is rebuilt
const COMPACT_SLACK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline: Instant,
    key: u64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap and we want the earliest deadline on top
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.key.cmp(&self.key))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct TimerState {
    heap: BinaryHeap<Entry>,
    live: HashMap<u64, Expiry>,
    next_key: u64,
    started: bool,
}

pub(crate) struct DeadlineTimer {
    state: Mutex<TimerState>,
    cond: Condvar,
}

impl DeadlineTimer {
    fn new() -> Self {
        Self {
            state: Mutex::new(TimerState::default()),
            cond: Condvar::new(),
        }
    }

    /// The process-wide timer. Its thread starts on the first `schedule`.
    pub(crate) fn global() -> &'static DeadlineTimer {
        TIMER.get_or_init(DeadlineTimer::new)
    }

    /// Run `expiry` once `deadline` passes, unless it is disarmed first.
    ///
    /// Fails only if the timer thread could not be started.
    pub(crate) fn schedule<F>(&'static self, deadline: Instant, expiry: F) -> io::Result<u64>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();

        if !state.started {
            thread::Builder::new()
                .name("kairos-deadline".to_string())
                .spawn(move || self.run())?;
            state.started = true;
            tracing::debug!("deadline thread started");
        }

        let key = state.next_key;
        state.next_key += 1;

        let earliest = state.heap.peek().map_or(true, |top| deadline < top.deadline);
        state.heap.push(Entry { deadline, key });
        state.live.insert(key, Box::new(expiry));

        if earliest {
            self.cond.notify_one();
        }
        Ok(key)
    }

    /// Drop a pending expiry. False if it already ran or was disarmed.
    pub(crate) fn disarm(&self, key: u64) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.live.remove(&key);

            let TimerState { heap, live, .. } = &mut *state;
            if heap.len() > live.len() * 2 + COMPACT_SLACK {
                heap.retain(|entry| live.contains_key(&entry.key));
            }
            removed
        };

        // the callback may own the last handle to a token; drop it unlocked
        removed.is_some()
    }

    fn run(&self) {
        let mut state = self.state.lock();

        loop {
            let now = Instant::now();
            let mut due = Vec::new();

            while let Some(top) = state.heap.peek().copied() {
                if top.deadline > now {
                    break;
                }
                state.heap.pop();
                if let Some(expiry) = state.live.remove(&top.key) {
                    due.push(expiry);
                }
            }

            if !due.is_empty() {
                MutexGuard::unlocked(&mut state, || {
                    for expiry in due {
                        expiry();
                    }
                });
                continue;
            }

            match state.heap.peek().map(|top| top.deadline) {
                Some(deadline) => {
                    self.cond.wait_until(&mut state, deadline);
                }
                None => self.cond.wait(&mut state),
            }
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.state.lock().live.len()
    }

    #[cfg(test)]
    pub(crate) fn is_scheduled(&self, key: u64) -> bool {
        self.state.lock().live.contains_key(&key)
    }
}
