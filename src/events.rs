//! Progress events flowing from a running stage to the dashboard thread.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};

/// Idle redraw interval while a stage is running.
pub const IDLE_TICK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    /// One more candidate checked.
    CheckProgress { done: usize, total: usize },
    /// One upload finished, successfully or not.
    FileDone { extension: String, success: bool, bytes: u64 },
    /// One more file through the upload stage.
    UploadProgress { done: usize, total: usize },
}

pub type EventSender = Sender<StageEvent>;

/// Run `stage` on a scoped helper thread and feed its events to `handle`.
///
/// `handle` receives `Some(event)` for each event and `None` after every
/// `tick` without one. The loop ends when the stage drops its sender; the
/// stage's return value is then handed back. A panicking stage becomes an
/// error.
pub fn run_stage<T, S, H>(tick: Duration, stage: S, mut handle: H) -> Result<T>
where
    T: Send,
    S: FnOnce(EventSender) -> T + Send,
    H: FnMut(Option<StageEvent>) -> Result<()>,
{
    let (tx, rx) = unbounded();

    thread::scope(|scope| {
        let worker = scope.spawn(move || stage(tx));

        let mut outcome = Ok(());
        loop {
            match rx.recv_timeout(tick) {
                Ok(event) => outcome = handle(Some(event)),
                Err(RecvTimeoutError::Timeout) => outcome = handle(None),
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if outcome.is_err() {
                // Keep draining so the stage never blocks on a dead receiver.
                while rx.recv().is_ok() {}
                break;
            }
        }

        let value = worker.join().map_err(|_| anyhow!("stage thread panicked"))?;
        outcome.map(|_| value)
    })
}
