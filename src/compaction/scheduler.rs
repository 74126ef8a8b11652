//! Background compaction scheduler.
//!
//! A dedicated thread wakes up every interval and runs a compaction cycle. Stopping
//! sends a signal over a channel; a cycle already in progress runs to completion.

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Handle to a running scheduler thread.
#[derive(Debug)]
pub struct BackgroundCompactor {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundCompactor {
    /// Spawns the scheduler. `cycle` runs once per interval and returns false when
    /// the store it serves is gone, which ends the thread.
    pub fn start<F>(interval: Duration, mut cycle: F) -> std::io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let handle = thread::Builder::new().name("velocity-compaction".to_string()).spawn(
            move || {
                log::info!("Background compaction started (interval {:?})", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if !cycle() {
                                break;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("Background compaction stopped");
            },
        )?;
        Ok(Self { stop_tx, handle: Some(handle) })
    }

    /// Signals the thread to stop without waiting for it.
    pub fn stop(mut self) {
        let _ = self.stop_tx.try_send(());
        self.handle.take();
    }

    /// Signals the thread to stop and waits until it has exited.
    pub fn stop_and_wait(mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    /// Returns true while the thread is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for BackgroundCompactor {
    fn drop(&mut self) {
        let _ = self.stop_tx.try_send(());
    }
}
