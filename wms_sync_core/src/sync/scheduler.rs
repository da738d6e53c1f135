use super::cycle::{CycleSummary, SyncCycle};
use crate::config::ServeConfig;
use crate::{Error, Result};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// One cycle, then exit.
    Once,
    /// Cycles back to back with a fixed sleep between completions.
    Loop { interval: Duration },
    /// Periodic cycles in the background while the served process runs in
    /// the foreground.
    Serve { interval: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Init,
    Syncing,
    IdleWaiting,
    Serving,
    Done,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub cycles: u64,
    pub last: Option<CycleSummary>,
    /// Exit status of the served process, in serve mode.
    pub served_exit: Option<ExitStatus>,
}

/// Drives [`SyncCycle`] according to a [`SyncMode`].
///
/// A started cycle always runs to completion; shutdown is only observed
/// while idle between cycles.
pub struct SyncScheduler {
    cycle: Arc<SyncCycle>,
    mode: SyncMode,
    serve: ServeConfig,
    state: Arc<watch::Sender<SchedulerState>>,
}

impl SyncScheduler {
    #[tracing::instrument(level = "debug", skip(cycle, serve))]
    pub fn new(cycle: Arc<SyncCycle>, mode: SyncMode, serve: ServeConfig) -> Result<Self> {
        if let SyncMode::Loop { interval } | SyncMode::Serve { interval } = mode
            && interval.is_zero()
        {
            return Err(Error::InvalidInput("sync interval must be > 0".to_string()));
        }
        let (state, _) = watch::channel(SchedulerState::Init);
        Ok(Self {
            cycle,
            mode,
            serve,
            state: Arc::new(state),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Run until the mode completes or `shutdown` flips to true.
    #[tracing::instrument(level = "info", name = "sync.scheduler", skip(self, shutdown))]
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunOutcome> {
        self.state.send_replace(SchedulerState::Syncing);
        let first = self.cycle.run().await;

        let outcome = match self.mode {
            SyncMode::Once => RunOutcome {
                cycles: 1,
                last: Some(first),
                served_exit: None,
            },
            SyncMode::Loop { interval } => {
                tracing::info!(interval_secs = interval.as_secs(), "periodic sync started");
                let (cycles, last) = periodic(
                    self.cycle.clone(),
                    interval,
                    Some(self.state.clone()),
                    shutdown,
                    first,
                )
                .await;
                RunOutcome {
                    cycles,
                    last: Some(last),
                    served_exit: None,
                }
            }
            SyncMode::Serve { interval } => {
                tracing::info!(interval_secs = interval.as_secs(), "periodic sync started in background");
                let (stop_tx, stop_rx) = watch::channel(false);
                let background = tokio::spawn(periodic(
                    self.cycle.clone(),
                    interval,
                    None,
                    stop_rx,
                    first,
                ));

                self.state.send_replace(SchedulerState::Serving);
                let served = run_served(&self.serve, shutdown).await;

                let _ = stop_tx.send(true);
                let (cycles, last) = background
                    .await
                    .map_err(|e| Error::backend("periodic sync task", e))?;
                RunOutcome {
                    cycles,
                    last: Some(last),
                    served_exit: Some(served?),
                }
            }
        };

        self.state.send_replace(SchedulerState::Done);
        Ok(outcome)
    }
}

async fn periodic(
    cycle: Arc<SyncCycle>,
    interval: Duration,
    state: Option<Arc<watch::Sender<SchedulerState>>>,
    mut shutdown: watch::Receiver<bool>,
    first: CycleSummary,
) -> (u64, CycleSummary) {
    let publish = |s: SchedulerState| {
        if let Some(tx) = &state {
            tx.send_replace(s);
        }
    };

    let mut cycles = 1u64;
    let mut last = first;
    loop {
        publish(SchedulerState::IdleWaiting);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_requested(&mut shutdown) => break,
        }
        publish(SchedulerState::Syncing);
        last = cycle.run().await;
        cycles += 1;
    }
    tracing::info!(cycles, "periodic sync stopped");
    (cycles, last)
}

/// Resolves once the flag reads true. A dropped sender never resolves.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[tracing::instrument(level = "info", skip(cfg, shutdown), fields(command = %cfg.command, port = cfg.port))]
async fn run_served(cfg: &ServeConfig, mut shutdown: watch::Receiver<bool>) -> Result<ExitStatus> {
    let mut parts = cfg.command.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| Error::InvalidInput("serve command must be non-empty".to_string()))?;

    let mut child = tokio::process::Command::new(program)
        .args(parts)
        .current_dir(&cfg.working_dir)
        .env("PORT", cfg.port.to_string())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::backend(format!("spawn served process '{}'", cfg.command), e))?;
    tracing::info!("served process started");

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| Error::backend("served process", e))?,
        _ = shutdown_requested(&mut shutdown) => {
            tracing::info!("shutdown requested; stopping served process");
            child
                .kill()
                .await
                .map_err(|e| Error::backend("stop served process", e))?;
            child
                .wait()
                .await
                .map_err(|e| Error::backend("served process", e))?
        }
    };
    tracing::info!(%status, "served process exited");
    Ok(status)
}
