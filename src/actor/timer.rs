//! Single-thread timer wheel, grounded on `original_source/LiteCore/Support/Timer.cc`:
//! one background thread owns an ordered multimap from fire time to timer, mutated
//! under a mutex and woken by a condition variable. Firing drops the lock so a
//! callback may reschedule itself or other timers without deadlocking.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

type Callback = Box<dyn FnMut() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Unscheduled,
    Scheduled,
    Deleted,
}

struct TimerState {
    id: u64,
    callback: Mutex<Callback>,
    state: Mutex<State>,
    auto_delete: Mutex<bool>,
    /// The key this timer is currently filed under in `Inner::schedule`, if scheduled.
    key: Mutex<Option<(Instant, u64)>>,
}

struct Inner {
    schedule: BTreeMap<(Instant, u64), Arc<TimerState>>,
    firing: std::collections::HashSet<u64>,
    shutdown: bool,
}

/// Owns the single background thread that fires due timers.
pub struct TimerWheel {
    inner: Mutex<Inner>,
    condvar: Condvar,
    next_id: AtomicU64,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl TimerWheel {
    pub fn new() -> Arc<Self> {
        let wheel = Arc::new(TimerWheel {
            inner: Mutex::new(Inner {
                schedule: BTreeMap::new(),
                firing: std::collections::HashSet::new(),
                shutdown: false,
            }),
            condvar: Condvar::new(),
            next_id: AtomicU64::new(1),
            thread: Mutex::new(None),
        });
        let bg = {
            let wheel = wheel.clone();
            std::thread::Builder::new()
                .name("peersync-timer".into())
                .spawn(move || wheel.run())
                .expect("spawn timer thread")
        };
        *wheel.thread.lock().unwrap() = Some(bg);
        wheel
    }

    fn run(self: Arc<Self>) {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.shutdown {
                return;
            }
            let now = Instant::now();
            let due = guard
                .schedule
                .keys()
                .next()
                .copied()
                .filter(|(fire_time, _)| *fire_time <= now);

            let Some(key) = due else {
                match guard.schedule.keys().next().copied() {
                    Some((fire_time, _)) => {
                        let wait = fire_time.saturating_duration_since(now);
                        let (g, _) = self.condvar.wait_timeout(guard, wait).unwrap();
                        guard = g;
                    }
                    None => {
                        guard = self.condvar.wait(guard).unwrap();
                    }
                }
                continue;
            };

            let timer = guard.schedule.remove(&key).unwrap();
            *timer.key.lock().unwrap() = None;
            guard.firing.insert(timer.id);
            drop(guard);

            {
                let mut cb = timer.callback.lock().unwrap();
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (cb)()));
                if let Err(e) = result {
                    tracing::error!("timer callback panicked: {:?}", e);
                }
            }

            guard = self.inner.lock().unwrap();
            guard.firing.remove(&timer.id);
            *timer.state.lock().unwrap() = State::Unscheduled;
            let auto_delete = *timer.auto_delete.lock().unwrap();
            self.condvar.notify_all();
            if auto_delete {
                // Nothing else references it once we drop `timer` at the end of this block.
            }
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn set_fire_time(&self, state: &Arc<TimerState>, t: Instant, if_earlier: bool) -> bool {
        let mut guard = self.inner.lock().unwrap();
        let current = state.key.lock().unwrap().clone();
        if if_earlier {
            if let Some((cur_time, _)) = current {
                if cur_time <= t {
                    return false;
                }
            }
        }
        if let Some(key) = current {
            guard.schedule.remove(&key);
        }
        let key = (t, state.id);
        guard.schedule.insert(key, state.clone());
        *state.key.lock().unwrap() = Some(key);
        *state.state.lock().unwrap() = State::Scheduled;
        self.condvar.notify_all();
        true
    }

    fn unschedule(&self, state: &Arc<TimerState>, deleting: bool) {
        {
            let mut guard = self.inner.lock().unwrap();
            if let Some(key) = state.key.lock().unwrap().take() {
                guard.schedule.remove(&key);
            }
            if !deleting {
                *state.state.lock().unwrap() = State::Unscheduled;
                return;
            }
            // Block until any in-flight firing of this timer completes.
            let mut guard = guard;
            while guard.firing.contains(&state.id) {
                guard = self.condvar.wait(guard).unwrap();
            }
        }
        *state.state.lock().unwrap() = State::Deleted;
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.inner.lock().unwrap().shutdown = true;
        self.condvar.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// A handle to a single scheduled callback. Dropping it blocks until any
/// in-flight invocation of the callback completes, then unschedules it —
/// matching the original `Timer`'s destructor contract.
pub struct Timer {
    wheel: Arc<TimerWheel>,
    state: Arc<TimerState>,
}

impl Timer {
    pub fn new(wheel: Arc<TimerWheel>, callback: impl FnMut() + Send + 'static) -> Self {
        let id = wheel.next_id();
        let state = Arc::new(TimerState {
            id,
            callback: Mutex::new(Box::new(callback)),
            state: Mutex::new(State::Unscheduled),
            auto_delete: Mutex::new(false),
            key: Mutex::new(None),
        });
        Timer { wheel, state }
    }

    pub fn auto_delete(&self) {
        *self.state.auto_delete.lock().unwrap() = true;
    }

    pub fn fire_at(&self, t: Instant) {
        self.wheel.set_fire_time(&self.state, t, false);
    }

    pub fn fire_after(&self, d: Duration) {
        self.fire_at(Instant::now() + d);
    }

    /// Only reschedules if `t` is earlier than the currently-scheduled fire time.
    pub fn fire_earlier_at(&self, t: Instant) -> bool {
        self.wheel.set_fire_time(&self.state, t, true)
    }

    pub fn fire_earlier_after(&self, d: Duration) -> bool {
        self.fire_earlier_at(Instant::now() + d)
    }

    pub fn stop(&self) {
        if self.scheduled() {
            self.wheel.unschedule(&self.state, false);
        }
    }

    pub fn scheduled(&self) -> bool {
        !matches!(*self.state.state.lock().unwrap(), State::Unscheduled | State::Deleted)
            || self.wheel.inner.lock().unwrap().firing.contains(&self.state.id)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if *self.state.auto_delete.lock().unwrap() {
            // `run()` already removes its own schedule entry once this timer
            // fires, so dropping the caller's handle early must not cancel a
            // still-pending fire. Just let the Arc refcount fall.
            return;
        }
        self.wheel.unschedule(&self.state, true);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let wheel = TimerWheel::new();
        let (tx, rx) = mpsc::channel();
        let timer = Timer::new(wheel, move || {
            tx.send(()).unwrap();
        });
        timer.fire_after(Duration::from_millis(20));
        rx.recv_timeout(Duration::from_secs(2)).expect("timer should fire");
    }

    #[test]
    fn stop_prevents_firing() {
        let wheel = TimerWheel::new();
        let (tx, rx) = mpsc::channel::<()>();
        let timer = Timer::new(wheel, move || {
            tx.send(()).unwrap();
        });
        timer.fire_after(Duration::from_millis(50));
        timer.stop();
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn fire_earlier_only_moves_time_forward() {
        let wheel = TimerWheel::new();
        let (tx, rx) = mpsc::channel();
        let timer = Timer::new(wheel, move || {
            tx.send(Instant::now()).unwrap();
        });
        timer.fire_after(Duration::from_millis(200));
        // Not earlier — should be a no-op.
        assert!(!timer.fire_earlier_after(Duration::from_millis(500)));
        // Earlier — should move it up.
        assert!(timer.fire_earlier_after(Duration::from_millis(10)));
        rx.recv_timeout(Duration::from_secs(1)).expect("should fire early");
    }

    #[test]
    fn rescheduling_replaces_fire_time() {
        let wheel = TimerWheel::new();
        let (tx, rx) = mpsc::channel();
        let timer = Timer::new(wheel, move || {
            let _ = tx.send(());
        });
        timer.fire_after(Duration::from_secs(10));
        timer.fire_after(Duration::from_millis(20));
        rx.recv_timeout(Duration::from_secs(2)).expect("rescheduled fire time should win");
    }
}
