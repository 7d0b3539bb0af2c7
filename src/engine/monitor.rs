use crate::engine::signal::{wait_for, SignalHandle, WaitOutcome};
use crate::error::ProtocolError;
use crate::model::RunEvent;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Parameters for monitoring an armed run.
pub(crate) struct MonitorParams<'a> {
    pub completion: &'a dyn SignalHandle,
    pub progress_path: &'a Path,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub cancel: Arc<AtomicBool>,
    pub event_tx: &'a mpsc::UnboundedSender<RunEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorOutcome {
    Completed,
    TimedOut { waited: Duration },
    Cancelled,
}

/// Read the worker's progress file.
///
/// Absent, empty, torn or out-of-range content yields `None`; the worker rewrites the
/// file concurrently, so none of these are errors.
pub(crate) fn read_progress(path: &Path) -> Option<u8> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            debug!("progress read failed: {e}");
            return None;
        }
    };
    let value: i64 = text.trim().parse().ok()?;
    u8::try_from(value).ok().filter(|v| *v <= 100)
}

/// Poll the completion signal and progress file until the run terminates.
///
/// Each tick waits on the completion signal for at most one poll interval (never past
/// the deadline), then republishes progress, then checks cancellation and the timeout.
/// Progress is forwarded only when it changes; nothing is smoothed or forced to 100.
pub(crate) async fn monitor_run(params: MonitorParams<'_>) -> Result<MonitorOutcome, ProtocolError> {
    let MonitorParams {
        completion,
        progress_path,
        poll_interval,
        timeout,
        cancel,
        event_tx,
    } = params;
    let start = Instant::now();
    let deadline = start + timeout;
    let mut last_reported: Option<u8> = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if wait_for(completion, poll_interval.min(remaining)).await? == WaitOutcome::Signaled {
            return Ok(MonitorOutcome::Completed);
        }

        if let Some(percent) = read_progress(progress_path) {
            if last_reported != Some(percent) {
                last_reported = Some(percent);
                let _ = event_tx.send(RunEvent::Progress { percent });
            }
        }

        if cancel.load(Ordering::Relaxed) {
            return Ok(MonitorOutcome::Cancelled);
        }

        if Instant::now() >= deadline {
            return Ok(MonitorOutcome::TimedOut {
                waited: start.elapsed(),
            });
        }
    }
}
