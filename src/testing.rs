//! Scripted fake device for session and fleet tests.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use crate::decoder::build_chunk;
use crate::protocol::{HANDSHAKE_REPLY, HANDSHAKE_REQUEST, Ticket, encode_command, read_frame};
use crate::session::{DeviceSession, SessionOptions};

pub(crate) enum Reply {
    /// Single status marker
    Status(u8),
    Payload(Vec<u8>),
    /// Answer after a pause
    Delayed(Duration, Vec<u8>),
    /// Read the command but never answer
    Silent,
    /// Drop the connection
    Close,
}

pub(crate) fn pass_payload() -> Vec<u8> {
    b"startPASS#0.95#1#3#120#240#1.5#0.98stop".to_vec()
}

pub(crate) fn fail_payload() -> Vec<u8> {
    b"startFAIL#0.10#0stop".to_vec()
}

/// An image answer with its 9-digit length prefix.
pub(crate) fn image_payload(image: &[u8]) -> Vec<u8> {
    let chunk = build_chunk(3, 64, image);
    let mut payload = format!("{:09}", chunk.len()).into_bytes();
    payload.extend_from_slice(&chunk);
    payload
}

/// Spawn a device on an in-memory stream. See [`serve`].
pub(crate) fn spawn_device<F>(respond: F) -> (DuplexStream, JoinHandle<Vec<String>>)
where
    F: FnMut(&str) -> Reply + Send + 'static,
{
    let (client, server) = tokio::io::duplex(64 * 1024);
    (client, serve(server, respond))
}

/// Accept the handshake on `server` and answer each command with `respond`.
/// The task resolves to every command it received, in order, once the
/// client side goes away.
pub(crate) fn serve<S, F>(mut server: S, mut respond: F) -> JoinHandle<Vec<String>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: FnMut(&str) -> Reply + Send + 'static,
{
    tokio::spawn(async move {
        let mut commands = Vec::new();
        let mut hello = vec![0u8; HANDSHAKE_REQUEST.len()];
        if server.read_exact(&mut hello).await.is_err() || hello != HANDSHAKE_REQUEST {
            return commands;
        }
        if server.write_all(HANDSHAKE_REPLY).await.is_err() {
            return commands;
        }

        while let Ok(frame) = read_frame(&mut server).await {
            let command = String::from_utf8_lossy(&frame.payload).into_owned();
            let reply = respond(command.as_str());
            commands.push(command);
            let payload = match reply {
                Reply::Status(marker) => vec![marker],
                Reply::Payload(payload) => payload,
                Reply::Delayed(pause, payload) => {
                    tokio::time::sleep(pause).await;
                    payload
                }
                Reply::Silent => continue,
                Reply::Close => break,
            };
            let bytes = encode_command(Ticket::default(), &payload).unwrap();
            if server.write_all(&bytes).await.is_err() {
                break;
            }
        }
        commands
    })
}

pub(crate) async fn open_session<F>(
    application: u8,
    respond: F,
) -> (DeviceSession<DuplexStream>, JoinHandle<Vec<String>>)
where
    F: FnMut(&str) -> Reply + Send + 'static,
{
    let (stream, device) = spawn_device(respond);
    let session = DeviceSession::open("cam", stream, SessionOptions::new(application))
        .await
        .unwrap();
    (session, device)
}
