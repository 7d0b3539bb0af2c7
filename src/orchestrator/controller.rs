//! Run lifecycle controller.
//!
//! Owns start/cancel orchestration and emits events for presentation layers.

use crate::engine::{EngineControl, RunEngine};
use crate::error::ProtocolError;
use crate::model::{RunConfig, RunEvent, RunResult, RunState};
use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;

/// Commands emitted by presentation layers to control runs.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start(Box<RunConfig>),
    Cancel,
    Quit,
}

/// Internal handle for a running protocol task.
struct RunCtx {
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<tokio::task::JoinHandle<Result<RunResult, ProtocolError>>>,
}

/// Spawn a new run and return its control handle.
fn start_run(engine: &RunEngine, cfg: RunConfig, event_tx: UnboundedSender<RunEvent>) -> RunCtx {
    let (ctrl_tx, ctrl_rx) = tokio::sync::mpsc::unbounded_channel::<EngineControl>();
    let engine = engine.clone();
    let handle = tokio::spawn(async move { engine.run(cfg, event_tx, ctrl_rx).await });
    RunCtx {
        ctrl_tx,
        handle: Some(handle),
    }
}

fn cancel_run(ctx: &RunCtx, event_tx: &UnboundedSender<RunEvent>) {
    let _ = ctx.ctrl_tx.send(EngineControl::Cancel);
    let _ = event_tx.send(RunEvent::Info("Cancelling…".into()));
}

/// Orchestrate runs based on commands and emit events back to presentation layers.
///
/// At most one run is outstanding; `Start` while a run is active is refused.
pub(crate) async fn run_controller(
    engine: RunEngine,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut run_ctx: Option<RunCtx> = None;
    let mut quit_pending = false;
    let mut cmd_closed = false;
    // Cancel watchdog: if the engine is slow to notice the cancel flag, keep the user informed.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    let res = loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if !cmd_closed => {
                match cmd {
                    Some(UiCommand::Start(cfg)) => {
                        if run_ctx.is_some() {
                            let _ = event_tx.send(RunEvent::Info(
                                "A run is already in progress".into(),
                            ));
                        } else if !quit_pending {
                            run_ctx = Some(start_run(&engine, *cfg, event_tx.clone()));
                        }
                    }
                    Some(UiCommand::Cancel) => {
                        if let Some(ctx) = &run_ctx {
                            cancel_run(ctx, &event_tx);
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        }
                    }
                    Some(UiCommand::Quit) | None => {
                        // Quit waits for the current run to reach a terminal state.
                        cmd_closed |= cmd.is_none();
                        quit_pending = true;
                        if let Some(ctx) = &run_ctx {
                            cancel_run(ctx, &event_tx);
                            cancel_deadline = Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        } else {
                            break Ok(());
                        }
                    }
                }
            }
            // Do not take the JoinHandle before this branch wins; otherwise it can be dropped
            // if another select branch is chosen, and we'll never observe completion.
            maybe_done = async {
                if let Some(ctx) = &mut run_ctx {
                    if let Some(h) = ctx.handle.as_mut() {
                        return Some(h.await);
                    }
                }
                futures::future::pending().await
            } => {
                if let Some(join_res) = maybe_done {
                    if let Some(ctx) = &mut run_ctx {
                        ctx.handle.take();
                    }
                    let ended = match join_res {
                        Ok(Ok(r)) => RunEvent::RunCompleted { result: Box::new(r) },
                        Ok(Err(e)) => RunEvent::RunEnded {
                            state: e.terminal_state(),
                            message: e.to_string(),
                        },
                        Err(e) => RunEvent::RunEnded {
                            state: RunState::Failed,
                            message: format!("run task failed: {e}"),
                        },
                    };
                    let _ = event_tx.send(ended);
                    run_ctx = None;
                    cancel_deadline = None;
                    if quit_pending {
                        break Ok(());
                    }
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if tokio::time::Instant::now() >= deadline && run_ctx.is_some() {
                        let _ = event_tx.send(RunEvent::Info("Still cancelling…".into()));
                        cancel_deadline = None;
                    }
                }
            }
        }
    };

    res
}
