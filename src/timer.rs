use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One-shot timer that coalesces bursts of arm requests.
///
/// Re-arming an already pending timer pushes the deadline forward, so a
/// burst of notifications yields a single fire once the burst goes quiet.
/// The worker thread is spawned lazily on first arm and parks on a condvar
/// in between deadlines.
pub(crate) struct DebounceTimer {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct TimerShared {
    state: Mutex<TimerState>,
    cv: Condvar,
    on_fire: Box<dyn Fn() + Send + Sync>,
}

struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

impl DebounceTimer {
    pub fn new(on_fire: Box<dyn Fn() + Send + Sync>) -> Self {
        Self {
            shared: Arc::new(TimerShared {
                state: Mutex::new(TimerState {
                    deadline: None,
                    shutdown: false,
                }),
                cv: Condvar::new(),
                on_fire,
            }),
            worker: Mutex::new(None),
        }
    }

    /// (Re)arms the one-shot; a pending deadline moves forward.
    pub fn arm(&self, delay: Duration) {
        let mut worker = self.worker.lock().expect("timer worker poisoned");
        {
            let mut state = self.shared.state.lock().expect("timer state poisoned");
            if state.shutdown {
                return;
            }
            state.deadline = Some(Instant::now() + delay);
        }
        self.shared.cv.notify_all();
        if worker.is_none() {
            let shared = Arc::clone(&self.shared);
            *worker = Some(thread::spawn(move || run_worker(&shared)));
        }
    }

    /// Drops any pending deadline without firing.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock().expect("timer state poisoned");
        state.deadline = None;
        drop(state);
        self.shared.cv.notify_all();
    }

    /// Stops the worker thread. Further arms are ignored.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().expect("timer state poisoned");
            state.shutdown = true;
            state.deadline = None;
        }
        self.shared.cv.notify_all();
        if let Some(handle) = self.worker.lock().expect("timer worker poisoned").take() {
            // The worker itself can end up running the shutdown when a fire
            // releases the last handle to the owner; it must not self-join.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn run_worker(shared: &TimerShared) {
    let mut state = shared.state.lock().expect("timer state poisoned");
    loop {
        if state.shutdown {
            return;
        }
        match state.deadline {
            None => {
                state = shared.cv.wait(state).expect("timer state poisoned");
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    state.deadline = None;
                    drop(state);
                    (shared.on_fire)();
                    state = shared.state.lock().expect("timer state poisoned");
                } else {
                    let (guard, _timed_out) = shared
                        .cv
                        .wait_timeout(state, deadline - now)
                        .expect("timer state poisoned");
                    state = guard;
                }
            }
        }
    }
}
