//! One device connection and the operations built on it.
//!
//! A session owns its stream and its ticket state exclusively. Commands are
//! sent one at a time: write the frame, then wait for the frame carrying the
//! same ticket.
//!
//! # Evaluation
//!
//! [`DeviceSession::evaluate`] walks
//!
//! ```text
//! Idle -> ApplicationSelected -> OutputEnabled -> Triggered
//!      -> Evaluated(PASS | FAIL) -> ImageFetched -> Idle
//! ```
//!
//! A `!` from any step restarts the sequence, up to `max_attempts` times.
//! When every attempt was busy the result is a forced `FAIL`, and the last
//! bad image is still fetched once. Transport and decoding errors are never
//! retried.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument, warn};

use crate::decoder::{
    ApplicationList, DeviceInfo, ErrorCodeInfo, EvaluationResult, ImageChunk, ProtocolVersions,
    Statistics, Status, StatusResult, Verdict, decode_applications, decode_device_info,
    decode_error_code, decode_evaluation, decode_image_response, decode_protocol_version,
    decode_statistics, decode_status,
};
use crate::error::{DeviceError, ProtocolError};
use crate::protocol::{
    Command, HANDSHAKE_REPLY, HANDSHAKE_REQUEST, Ticket, TicketRouter, write_command,
};

/// Upper bound on the handshake reply we are willing to buffer.
const HANDSHAKE_REPLY_LIMIT: u64 = 64;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Application activated before each evaluation.
    pub application: u8,
    pub max_attempts: u32,
    /// Per-response limit. `None` waits for as long as the connection lives.
    pub read_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl SessionOptions {
    pub fn new(application: u8) -> Self {
        SessionOptions {
            application,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            read_timeout: None,
            connect_timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    ApplicationSelected,
    OutputEnabled,
    Triggered,
    Evaluated(Verdict),
    ImageFetched,
}

/// Outcome of [`DeviceSession::evaluate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub result: EvaluationResult,
    /// `None` only when the best-effort fetch after a forced `FAIL` was
    /// refused by the device.
    pub image: Option<ImageChunk>,
    pub attempts: u32,
}

pub struct DeviceSession<S> {
    name: String,
    stream: BufReader<S>,
    ticket: Ticket,
    router: TicketRouter,
    options: SessionOptions,
    state: SessionState,
    application: Option<u8>,
    last_verdict: Option<Verdict>,
    retries: u32,
    /// Set once a request left the stream at an unknown position.
    desynchronized: bool,
}

impl<S> std::fmt::Debug for DeviceSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("name", &self.name)
            .field("ticket", &self.ticket)
            .field("state", &self.state)
            .field("application", &self.application)
            .field("last_verdict", &self.last_verdict)
            .field("retries", &self.retries)
            .field("desynchronized", &self.desynchronized)
            .finish()
    }
}

async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> Result<T, DeviceError>
where
    F: Future<Output = Result<T, DeviceError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| DeviceError::Timeout(limit))?,
        None => fut.await,
    }
}

impl DeviceSession<TcpStream> {
    /// Connect over TCP and switch the device to protocol version 3.
    pub async fn connect(
        name: impl Into<String>,
        address: &str,
        options: SessionOptions,
    ) -> Result<Self, DeviceError> {
        let connect = async {
            TcpStream::connect(address)
                .await
                .map_err(|source| DeviceError::Connect {
                    address: address.to_string(),
                    source,
                })
        };
        let stream = bounded(options.connect_timeout, connect).await?;
        stream.set_nodelay(true).map_err(ProtocolError::from)?;
        DeviceSession::open(name, stream, options).await
    }
}

impl<S> DeviceSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already connected stream and perform the handshake.
    pub async fn open(
        name: impl Into<String>,
        stream: S,
        options: SessionOptions,
    ) -> Result<Self, DeviceError> {
        let mut session = DeviceSession {
            name: name.into(),
            stream: BufReader::new(stream),
            ticket: Ticket::default(),
            router: TicketRouter::new(),
            options,
            state: SessionState::Idle,
            application: None,
            last_verdict: None,
            retries: 0,
            desynchronized: false,
        };
        let limit = session.options.read_timeout;
        bounded(limit, session.handshake()).await?;
        info!(device = %session.name, "protocol v3 active");
        Ok(session)
    }

    async fn handshake(&mut self) -> Result<(), DeviceError> {
        self.stream
            .get_mut()
            .write_all(HANDSHAKE_REQUEST)
            .await
            .map_err(ProtocolError::from)?;
        self.stream.get_mut().flush().await.map_err(ProtocolError::from)?;

        let mut reply = Vec::new();
        (&mut self.stream)
            .take(HANDSHAKE_REPLY_LIMIT)
            .read_until(b'\n', &mut reply)
            .await
            .map_err(ProtocolError::from)?;
        if reply != HANDSHAKE_REPLY {
            return Err(DeviceError::HandshakeFailed {
                reply: String::from_utf8_lossy(&reply).into_owned(),
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last application successfully activated on the device.
    pub fn application(&self) -> Option<u8> {
        self.application
    }

    pub fn last_verdict(&self) -> Option<Verdict> {
        self.last_verdict
    }

    /// Busy retries spent by the last call to `evaluate`. The first try
    /// is not a retry, so this stays below `max_attempts`.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// True once a timeout or framing error made the session unusable.
    pub fn is_desynchronized(&self) -> bool {
        self.desynchronized
    }

    /// Send one command and wait for its response payload.
    ///
    /// Every request reuses the same ticket, so a late answer can not be
    /// told apart from the next one. After a timeout or a framing error the
    /// session refuses further requests.
    async fn request(&mut self, command: &Command) -> Result<Vec<u8>, DeviceError> {
        if self.desynchronized {
            return Err(DeviceError::Desynchronized);
        }
        let ticket = self.ticket;
        let limit = self.options.read_timeout;
        let stream = &mut self.stream;
        let router = &mut self.router;

        let result = bounded(limit, async move {
            router.register(ticket);
            write_command(stream.get_mut(), ticket, command).await?;
            let payload = router.await_response(stream, ticket).await?;
            Ok::<_, DeviceError>(payload)
        })
        .await;

        match &result {
            Ok(payload) => {
                debug!(device = %self.name, %command, len = payload.len(), "response")
            }
            Err(e) if loses_position(e) => {
                warn!(device = %self.name, %command, error = %e, "session desynchronized");
                self.desynchronized = true;
            }
            Err(_) => {}
        }
        result
    }

    async fn expect_success(&mut self, command: Command) -> Result<(), DeviceError> {
        let payload = self.request(&command).await?;
        match decode_status(&payload) {
            StatusResult::Status(Status::Success) => Ok(()),
            StatusResult::Status(status) => Err(DeviceError::DeviceRejected {
                command: command.to_string(),
                status,
            }),
            StatusResult::Payload(other) => Err(ProtocolError::malformed(format!(
                "expected a status marker for `{}`, got {:?}",
                command,
                String::from_utf8_lossy(other)
            ))
            .into()),
        }
    }

    async fn query<T>(
        &mut self,
        command: Command,
        decode: fn(&[u8]) -> Result<T, ProtocolError>,
    ) -> Result<T, DeviceError> {
        let payload = self.request(&command).await?;
        match decode_status(&payload) {
            StatusResult::Status(status) => Err(DeviceError::DeviceRejected {
                command: command.to_string(),
                status,
            }),
            StatusResult::Payload(body) => Ok(decode(body)?),
        }
    }

    pub async fn select_application(&mut self, id: u8) -> Result<(), DeviceError> {
        self.expect_success(Command::SelectApplication(id)).await?;
        self.application = Some(id);
        self.state = SessionState::ApplicationSelected;
        Ok(())
    }

    pub async fn set_output_enabled(&mut self, enabled: bool) -> Result<(), DeviceError> {
        self.expect_success(Command::SetOutput(enabled)).await?;
        if enabled {
            self.state = SessionState::OutputEnabled;
        }
        Ok(())
    }

    /// Release the trigger without result output.
    pub async fn trigger(&mut self) -> Result<(), DeviceError> {
        self.expect_success(Command::Trigger).await
    }

    /// Trigger, evaluate and decode the result in one round trip.
    pub async fn trigger_evaluation(&mut self) -> Result<EvaluationResult, DeviceError> {
        self.state = SessionState::Triggered;
        let result = self.query(Command::Evaluate, decode_evaluation).await?;
        self.last_verdict = Some(result.verdict);
        self.state = SessionState::Evaluated(result.verdict);
        Ok(result)
    }

    pub async fn last_result(&mut self) -> Result<EvaluationResult, DeviceError> {
        self.query(Command::LastResult, decode_evaluation).await
    }

    pub async fn last_image(&mut self) -> Result<ImageChunk, DeviceError> {
        self.query(Command::LastImage, decode_image_response).await
    }

    pub async fn last_bad_image(&mut self) -> Result<ImageChunk, DeviceError> {
        self.query(Command::LastBadImage, decode_image_response).await
    }

    pub async fn error_code(&mut self) -> Result<ErrorCodeInfo, DeviceError> {
        self.query(Command::ErrorCode, decode_error_code).await
    }

    pub async fn device_info(&mut self) -> Result<DeviceInfo, DeviceError> {
        self.query(Command::DeviceInfo, decode_device_info).await
    }

    pub async fn protocol_version(&mut self) -> Result<ProtocolVersions, DeviceError> {
        self.query(Command::ProtocolVersion, decode_protocol_version)
            .await
    }

    pub async fn set_protocol_version(&mut self, version: u8) -> Result<(), DeviceError> {
        self.expect_success(Command::SetProtocolVersion(version))
            .await
    }

    pub async fn applications(&mut self) -> Result<ApplicationList, DeviceError> {
        self.query(Command::Applications, decode_applications).await
    }

    pub async fn statistics(&mut self) -> Result<Statistics, DeviceError> {
        self.query(Command::Statistics, decode_statistics).await
    }

    /// Transmit an image for the active application to evaluate.
    pub async fn upload_image(&mut self, image: Vec<u8>) -> Result<(), DeviceError> {
        self.expect_success(Command::UploadImage(image)).await
    }

    /// Run the evaluation sequence with the configured attempt budget.
    ///
    /// A `FAIL` verdict is a valid outcome, not an error.
    #[instrument(skip(self), fields(device = %self.name, application = self.options.application))]
    pub async fn evaluate(&mut self) -> Result<Evaluation, DeviceError> {
        let max_attempts = self.options.max_attempts.max(1);
        self.retries = 0;

        for attempt in 1..=max_attempts {
            match self.attempt().await {
                Ok((result, image)) => {
                    info!(verdict = ?result.verdict, attempt, "evaluation complete");
                    self.state = SessionState::Idle;
                    return Ok(Evaluation {
                        result,
                        image: Some(image),
                        attempts: attempt,
                    });
                }
                Err(DeviceError::TransientBusy { command }) => {
                    self.state = SessionState::Idle;
                    if attempt < max_attempts {
                        warn!(%command, attempt, max_attempts, "device busy, retrying");
                        self.retries += 1;
                    }
                }
                Err(e) => {
                    self.state = SessionState::Idle;
                    return Err(e);
                }
            }
        }

        warn!(max_attempts, "device stayed busy, forcing FAIL");
        let result = EvaluationResult::forced_fail();
        self.last_verdict = Some(result.verdict);
        let image = match self.fetch_image(Verdict::Fail).await {
            Ok(image) => Some(image),
            Err(e @ (DeviceError::TransientBusy { .. } | DeviceError::DeviceRejected { .. })) => {
                warn!(error = %e, "no image after forced FAIL");
                None
            }
            Err(e) => return Err(e),
        };
        self.state = SessionState::Idle;
        Ok(Evaluation {
            result,
            image,
            attempts: max_attempts,
        })
    }

    async fn attempt(&mut self) -> Result<(EvaluationResult, ImageChunk), DeviceError> {
        let application = self.options.application;
        self.select_application(application).await.map_err(busy_is_transient)?;
        self.set_output_enabled(true).await.map_err(busy_is_transient)?;
        let result = self.trigger_evaluation().await.map_err(busy_is_transient)?;
        self.set_output_enabled(false).await.map_err(busy_is_transient)?;
        let image = self.fetch_image(result.verdict).await?;
        Ok((result, image))
    }

    async fn fetch_image(&mut self, verdict: Verdict) -> Result<ImageChunk, DeviceError> {
        let image = match verdict {
            Verdict::Pass => self.last_image().await,
            Verdict::Fail => self.last_bad_image().await,
        }
        .map_err(busy_is_transient)?;
        self.state = SessionState::ImageFetched;
        Ok(image)
    }

    /// Shut down the write half; dropping the session closes the stream.
    pub async fn close(mut self) -> Result<(), DeviceError> {
        self.stream
            .get_mut()
            .shutdown()
            .await
            .map_err(ProtocolError::from)?;
        Ok(())
    }
}

/// Errors after which the next frame on the stream may belong to an
/// earlier command.
fn loses_position(err: &DeviceError) -> bool {
    matches!(
        err,
        DeviceError::Timeout(_)
            | DeviceError::Protocol(
                ProtocolError::ConnectionClosed { .. }
                    | ProtocolError::MalformedResponse(_)
                    | ProtocolError::Io(_)
            )
    )
}

/// `!` inside the evaluation sequence is retried, `?` is not.
fn busy_is_transient(err: DeviceError) -> DeviceError {
    match err {
        DeviceError::DeviceRejected {
            command,
            status: Status::Busy,
        } => DeviceError::TransientBusy { command },
        other => other,
    }
}
