//! Runs one evaluation per device, all devices in parallel.
//!
//! Each device gets its own task that owns its session; nothing is shared
//! between tasks. Outcomes are returned in input order, one per device,
//! whatever the completion order was. A failing device is reported in its
//! own slot and never stops the others.
//!
//! Cancelling the coordinator's token, hitting the run deadline or dropping
//! the `run` future drops every unfinished session, which closes its
//! connection.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, error, info, info_span};

use crate::error::DeviceError;
use crate::session::{DeviceSession, Evaluation, SessionOptions};


/// A device to connect to.
#[derive(Debug, Clone)]
pub struct DeviceTarget {
    pub name: String,
    /// `host:port`
    pub address: String,
    pub options: SessionOptions,
}

/// What happened to one device during a run.
#[derive(Debug)]
pub struct DeviceOutcome {
    pub device: String,
    pub result: Result<Evaluation, DeviceError>,
}

impl DeviceOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Default)]
pub struct FleetCoordinator {
    cancel: CancellationToken,
    deadline: Option<Duration>,
}

impl FleetCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give up on devices still running after `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Token that stops every running device when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Evaluate already connected sessions.
    pub async fn run<S>(&self, sessions: Vec<DeviceSession<S>>) -> Vec<DeviceOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        info!(devices = sessions.len(), "starting fleet run");
        let run = self.start_run();
        let workers = sessions
            .into_iter()
            .map(|mut session| {
                let name = session.name().to_string();
                let worker = run.spawn_worker(&name, async move { session.evaluate().await });
                (name, worker)
            })
            .collect();
        collect(workers).await
    }

    /// Connect to every target and evaluate it. Connection and handshake
    /// failures are reported per device like any other failure.
    pub async fn connect_and_run(&self, targets: Vec<DeviceTarget>) -> Vec<DeviceOutcome> {
        info!(devices = targets.len(), "starting fleet run");
        let run = self.start_run();
        let workers = targets
            .into_iter()
            .map(|target| {
                let name = target.name.clone();
                let worker = run.spawn_worker(&name, async move {
                    let mut session =
                        DeviceSession::connect(target.name, &target.address, target.options)
                            .await?;
                    session.evaluate().await
                });
                (name, worker)
            })
            .collect();
        collect(workers).await
    }

    fn start_run(&self) -> Run {
        let cancel = self.cancel.child_token();
        Run {
            _guard: cancel.clone().drop_guard(),
            cancel,
            limit: self.deadline,
            deadline: self.deadline.map(|d| Instant::now() + d),
        }
    }
}

/// State shared by the workers of one `run` call.
///
/// Dropping it cancels the run's token, so workers stop when the caller
/// stops awaiting the run, and a finished run leaves no task behind.
struct Run {
    cancel: CancellationToken,
    _guard: DropGuard,
    limit: Option<Duration>,
    deadline: Option<Instant>,
}

impl Run {
    fn spawn_worker<F>(&self, name: &str, work: F) -> JoinHandle<Result<Evaluation, DeviceError>>
    where
        F: Future<Output = Result<Evaluation, DeviceError>> + Send + 'static,
    {
        let cancel = self.cancel.child_token();
        let limit = self.limit;
        let deadline = self.deadline;
        let task = async move {
            tokio::select! {
                result = work => result,
                _ = cancel.cancelled() => Err(DeviceError::Cancelled),
                _ = wait_until(deadline) => {
                    Err(DeviceError::Timeout(limit.unwrap_or_default()))
                }
            }
        };
        tokio::spawn(task.instrument(info_span!("device", device = %name)))
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Await every worker in input order.
async fn collect(
    workers: Vec<(String, JoinHandle<Result<Evaluation, DeviceError>>)>,
) -> Vec<DeviceOutcome> {
    let mut outcomes = Vec::with_capacity(workers.len());
    for (device, worker) in workers {
        let result = match worker.await {
            Ok(result) => result,
            Err(e) => Err(DeviceError::Worker(e.to_string())),
        };
        match &result {
            Ok(evaluation) => info!(
                %device,
                verdict = ?evaluation.result.verdict,
                attempts = evaluation.attempts,
                "device finished"
            ),
            Err(e) => error!(%device, error = %e, "device failed"),
        }
        outcomes.push(DeviceOutcome { device, result });
    }
    outcomes
}
