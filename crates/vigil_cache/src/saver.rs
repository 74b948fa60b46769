//! Background saver that coalesces bursts of mutations into one write.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::debug;

/// What the save callback reports back to the saver thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAttempt {
    /// The state was written, or there was nothing to write.
    Saved,
    /// The write failed; try again after another debounce window.
    Retry,
    /// Persistence is off for good; the saver thread exits.
    GiveUp,
}

#[derive(Debug, Default)]
struct State {
    deadline: Option<Instant>,
    shutdown: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    delay: Duration,
}

impl Shared {
    fn arm(&self, state: &mut State) {
        state.deadline = Some(Instant::now() + self.delay);
        self.wake.notify_one();
    }
}

/// Runs a save callback on its own thread once mutations have been quiet for
/// the debounce delay. Every [`schedule`](Self::schedule) call pushes the
/// deadline back, so a burst of stores produces a single save.
///
/// Dropping the saver stops the thread without running a pending save; the
/// owner is expected to flush synchronously afterwards.
#[derive(Debug)]
pub struct DebouncedSaver {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl DebouncedSaver {
    /// Starts the saver thread.
    pub fn spawn<F>(delay: Duration, mut save: F) -> std::io::Result<Self>
    where
        F: FnMut() -> SaveAttempt + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wake: Condvar::new(),
            delay,
        });
        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("vigil-cache-saver".to_string())
            .spawn(move || {
                let mut state = worker.state.lock();
                while !state.shutdown {
                    let deadline = state.deadline;
                    match deadline {
                        None => worker.wake.wait(&mut state),
                        Some(deadline) if Instant::now() < deadline => {
                            worker.wake.wait_until(&mut state, deadline);
                        }
                        Some(_) => {
                            state.deadline = None;
                            match MutexGuard::unlocked(&mut state, &mut save) {
                                SaveAttempt::Saved => {}
                                SaveAttempt::Retry => {
                                    if state.deadline.is_none() {
                                        worker.arm(&mut state);
                                    }
                                }
                                SaveAttempt::GiveUp => {
                                    debug!("saver thread stopping, persistence disabled");
                                    break;
                                }
                            }
                        }
                    }
                }
            })?;
        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// (Re)arms the debounce timer.
    pub fn schedule(&self) {
        let mut state = self.shared.state.lock();
        self.shared.arm(&mut state);
    }

    /// Returns `true` while a save is armed but has not started.
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    /// Stops the thread and waits for an in-flight save to finish.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.deadline = None;
            self.shared.wake.notify_one();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DebouncedSaver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
