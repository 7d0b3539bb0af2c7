pub mod config_writer;
pub(crate) mod monitor;
pub mod results;
pub mod signal;

use crate::config::{DEFAULT_POLL_INTERVAL, DEFAULT_RUN_TIMEOUT};
use crate::error::ProtocolError;
use crate::model::{RunConfig, RunEvent, RunResult, RunState, SharedChannelConfig};
use monitor::{monitor_run, MonitorOutcome, MonitorParams};
use signal::{SignalChannel, SignalId};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Stop waiting for the worker; results are not read.
    Cancel,
}

/// Timing knobs for a single monitored run.
#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

/// Remove a shared file left over from a previous run.
pub(crate) fn remove_stale(path: &Path) -> Result<(), ProtocolError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ProtocolError::io(path, e)),
    }
}

/// Executes the single-run protocol: write config, raise "start", monitor, read results.
#[derive(Debug, Clone)]
pub struct RunEngine {
    channel: SharedChannelConfig,
    signals: SignalChannel,
    settings: MonitorSettings,
}

impl RunEngine {
    pub fn new(channel: SharedChannelConfig, signals: SignalChannel, settings: MonitorSettings) -> Self {
        Self {
            channel,
            signals,
            settings,
        }
    }

    pub fn channel(&self) -> &SharedChannelConfig {
        &self.channel
    }

    /// Run `cfg` to a terminal state.
    ///
    /// Timeouts and cancellation come back as `RunTimedOut` / `RunCancelled`; results
    /// are read only after the completion signal was observed.
    pub async fn run(
        &self,
        cfg: RunConfig,
        event_tx: mpsc::UnboundedSender<RunEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<RunResult, ProtocolError> {
        let cancel = Arc::new(AtomicBool::new(false));

        // Control listener.
        let cancel2 = cancel.clone();
        let control_handle = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                match msg {
                    EngineControl::Cancel => {
                        cancel2.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        let res = self.execute(&cfg, &event_tx, cancel).await;
        control_handle.abort();

        let state = match &res {
            Ok(_) => RunState::Completed,
            Err(e) => e.terminal_state(),
        };
        let _ = event_tx.send(RunEvent::StateChanged { state });
        res
    }

    async fn execute(
        &self,
        cfg: &RunConfig,
        event_tx: &mpsc::UnboundedSender<RunEvent>,
        cancel: Arc<AtomicBool>,
    ) -> Result<RunResult, ProtocolError> {
        let _ = event_tx.send(RunEvent::StateChanged {
            state: RunState::Idle,
        });

        fs::create_dir_all(&self.channel.temp_dir)
            .map_err(|e| ProtocolError::io(&self.channel.temp_dir, e))?;
        remove_stale(&cfg.progress_path)?;
        remove_stale(&cfg.completion_time_path)?;

        // Open before arming so a missing worker fails fast, then drop any completion
        // left over from an abandoned run.
        let completion = self.signals.open(SignalId::Completion)?;
        signal::drain(completion.as_ref())?;

        config_writer::write_config(&self.channel.config_file, cfg)?;
        self.signals.raise(SignalId::Start)?;
        info!(
            "armed run: impl={} threads={} avx={}",
            cfg.implementation, cfg.thread_count, cfg.use_vectorization
        );
        let _ = event_tx.send(RunEvent::StateChanged {
            state: RunState::Armed,
        });
        let _ = event_tx.send(RunEvent::Progress { percent: 0 });

        let _ = event_tx.send(RunEvent::StateChanged {
            state: RunState::Polling,
        });
        let outcome = monitor_run(MonitorParams {
            completion: completion.as_ref(),
            progress_path: &cfg.progress_path,
            poll_interval: self.settings.poll_interval,
            timeout: self.settings.timeout,
            cancel,
            event_tx,
        })
        .await?;

        match outcome {
            MonitorOutcome::Completed => {
                let result = results::read_result(cfg)?;
                info!("run completed in {:.4}s", result.elapsed_seconds);
                Ok(result)
            }
            MonitorOutcome::TimedOut { waited } => {
                warn!("run timed out after {:?}", waited);
                Err(ProtocolError::RunTimedOut { waited })
            }
            MonitorOutcome::Cancelled => {
                info!("run cancelled");
                Err(ProtocolError::RunCancelled)
            }
        }
    }
}
