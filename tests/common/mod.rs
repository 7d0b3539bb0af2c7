//! In-process stand-in for the compute worker, speaking the protocol over file signals.
#![allow(dead_code)]

use compute_bench_cli::engine::config_writer::read_config;
use compute_bench_cli::engine::signal::{
    wait_for, FileSignalBackend, SignalBackend, SignalChannel, WaitOutcome,
};
use compute_bench_cli::model::{RunConfig, SharedChannelConfig};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Isolated shared-file directory plus a file signal backend living inside it.
pub struct Rig {
    pub dir: TempDir,
    pub channel: SharedChannelConfig,
    pub backend: Arc<dyn SignalBackend>,
}

impl Rig {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let channel = SharedChannelConfig::in_dir(dir.path());
        fs::create_dir_all(&channel.temp_dir).unwrap();
        let backend: Arc<dyn SignalBackend> =
            Arc::new(FileSignalBackend::new(dir.path().join("signals")));
        Self {
            dir,
            channel,
            backend,
        }
    }

    pub fn signals(&self) -> SignalChannel {
        SignalChannel::new(self.backend.clone(), &self.channel)
    }

    pub fn write_inputs(&self, points: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let coeffs = self.dir.path().join("poly.coeffs");
        let pts = self.dir.path().join("range.points");
        fs::write(&coeffs, "1\n-0.5\n0.25\n").unwrap();
        fs::write(&pts, points).unwrap();
        (coeffs, pts)
    }
}

/// What the simulated worker does after it consumed "start".
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub progress: Vec<u8>,
    pub step_delay: Duration,
    /// Content of the completion-time file; nothing is written when `None`.
    pub time: Option<String>,
    pub values: Option<Vec<f64>>,
    pub signal_completion: bool,
}

impl Reply {
    pub fn completed(time: &str) -> Self {
        Self {
            time: Some(time.to_string()),
            signal_completion: true,
            ..Default::default()
        }
    }

    /// Consume "start" and never answer.
    pub fn silent() -> Self {
        Self::default()
    }
}

pub struct FakeWorker {
    stop: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<Vec<RunConfig>>,
}

impl FakeWorker {
    /// Create both signal objects, then serve runs until stopped.
    ///
    /// `respond` gets each config as read back from the config file and the
    /// zero-based index of the run.
    pub fn spawn<F>(rig: &Rig, mut respond: F) -> Self
    where
        F: FnMut(&RunConfig, usize) -> Reply + Send + 'static,
    {
        let start = rig.backend.create(&rig.channel.start_signal).unwrap();
        let done = rig.backend.create(&rig.channel.completion_signal).unwrap();
        let config_file = rig.channel.config_file.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();

        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            while !stop2.load(Ordering::Relaxed) {
                let outcome = wait_for(start.as_ref(), Duration::from_millis(10)).await.unwrap();
                if outcome != WaitOutcome::Signaled {
                    continue;
                }
                let cfg = read_config(&config_file).unwrap();
                let reply = respond(&cfg, seen.len());

                for p in &reply.progress {
                    write_atomically(&cfg.progress_path, &p.to_string());
                    tokio::time::sleep(reply.step_delay).await;
                }
                if let (Some(values), Some(out)) = (&reply.values, cfg.output_path.as_deref()) {
                    let text: String = values.iter().map(|v| format!("{v}\n")).collect();
                    write_atomically(out, &text);
                }
                if let Some(time) = &reply.time {
                    write_atomically(&cfg.completion_time_path, time);
                }
                if reply.signal_completion {
                    done.post().unwrap();
                }
                seen.push(cfg);
            }
            seen
        });

        Self { stop, handle }
    }

    /// Stop serving and return every config the worker received.
    pub async fn stop(self) -> Vec<RunConfig> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.await.unwrap()
    }
}

fn write_atomically(path: &Path, content: &str) {
    let tmp = path.with_extension("partial");
    fs::write(&tmp, content).unwrap();
    fs::rename(&tmp, path).unwrap();
}
