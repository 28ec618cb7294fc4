use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{DeviceError, Result};

/// A named background thread with its own running flag.
///
/// The flag starts out set. The thread clears it when it exits on its own,
/// and the owner clears it to ask the thread to stop.
pub(crate) struct Worker {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub(crate) fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn start<F>(&self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                body(&*running);
                running.store(false, Ordering::SeqCst);
            })
            .map_err(DeviceError::Spawn)?;
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wake the thread if it is pausing and wait for it to finish.
    pub(crate) fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

/// Sleep for `duration`, returning early once `running` is cleared and the
/// thread is unparked.
pub(crate) fn pause(running: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::park_timeout(deadline - now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_and_join_interrupts_pause() {
        let worker = Worker::new();
        worker
            .start("test-worker", |running| {
                while running.load(Ordering::SeqCst) {
                    pause(running, Duration::from_secs(60));
                }
            })
            .unwrap();

        let start = Instant::now();
        worker.stop();
        worker.join();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!worker.is_running());
    }

    #[test]
    fn thread_exit_clears_flag() {
        let worker = Worker::new();
        worker.start("test-exit", |_| {}).unwrap();
        worker.join();
        assert!(!worker.is_running());
    }
}
