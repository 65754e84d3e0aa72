//! Ticket correlation.
//!
//! Responses carry the ticket of the command that caused them. The router
//! keeps a set of outstanding tickets and a queue of early frames per ticket:
//! a frame for another outstanding ticket is queued until someone awaits it,
//! a frame for a ticket nobody is waiting on is discarded.
//!
//! Sessions in this crate issue one command at a time with the default
//! ticket, so in practice the queues stay empty.

use std::collections::{HashMap, VecDeque};

use tokio::io::AsyncRead;
use tracing::warn;

use super::frame::read_frame;
use super::ticket::Ticket;
use crate::error::ProtocolError;

#[derive(Debug, Default)]
pub struct TicketRouter {
    outstanding: HashMap<Ticket, VecDeque<Vec<u8>>>,
}

impl TicketRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a ticket as having a command in flight.
    pub fn register(&mut self, ticket: Ticket) {
        self.outstanding.entry(ticket).or_default();
    }

    pub fn is_outstanding(&self, ticket: &Ticket) -> bool {
        self.outstanding.contains_key(ticket)
    }

    /// Number of frames queued for tickets other than the one being awaited.
    pub fn queued(&self) -> usize {
        self.outstanding.values().map(VecDeque::len).sum()
    }

    /// Read frames until one carries `ticket`, and return its payload.
    ///
    /// Blocks until the matching frame arrives or the connection fails. The
    /// ticket is released once its response has been handed out.
    pub async fn await_response<R>(
        &mut self,
        reader: &mut R,
        ticket: Ticket,
    ) -> Result<Vec<u8>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        if let Some(payload) = self.take_queued(&ticket) {
            return Ok(payload);
        }

        loop {
            let frame = read_frame(reader).await?;
            if frame.ticket == ticket {
                self.release(&ticket);
                return Ok(frame.payload);
            }

            match self.outstanding.get_mut(&frame.ticket) {
                Some(queue) => queue.push_back(frame.payload),
                None => warn!(
                    awaited = %ticket,
                    received = %frame.ticket,
                    len = frame.payload.len(),
                    "discarding frame for unknown ticket"
                ),
            }
        }
    }

    fn take_queued(&mut self, ticket: &Ticket) -> Option<Vec<u8>> {
        let payload = self.outstanding.get_mut(ticket)?.pop_front()?;
        if self.outstanding.get(ticket).is_some_and(VecDeque::is_empty) {
            self.release(ticket);
        }
        Some(payload)
    }

    fn release(&mut self, ticket: &Ticket) {
        if self
            .outstanding
            .get(ticket)
            .is_some_and(VecDeque::is_empty)
        {
            self.outstanding.remove(ticket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::encode_command;

    fn frames(items: &[(&str, &[u8])]) -> Vec<u8> {
        items
            .iter()
            .flat_map(|(ticket, payload)| {
                encode_command(Ticket::try_from(*ticket).unwrap(), payload).unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_returns_matching_frame() {
        let bytes = frames(&[("1000", b"*")]);
        let mut stream = bytes.as_slice();
        let mut router = TicketRouter::new();
        router.register(Ticket::default());

        let payload = router
            .await_response(&mut stream, Ticket::default())
            .await
            .unwrap();
        assert_eq!(payload, b"*");
        assert!(!router.is_outstanding(&Ticket::default()));
    }

    #[tokio::test]
    async fn test_discards_unknown_tickets() {
        let bytes = frames(&[("0042", b"stale"), ("7777", b"noise"), ("1000", b"!")]);
        let mut stream = bytes.as_slice();
        let mut router = TicketRouter::new();
        router.register(Ticket::default());

        let payload = router
            .await_response(&mut stream, Ticket::default())
            .await
            .unwrap();
        assert_eq!(payload, b"!");
        assert_eq!(router.queued(), 0);
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn test_queues_frames_for_other_outstanding_tickets() {
        let first = Ticket::try_from("0001").unwrap();
        let second = Ticket::try_from("0002").unwrap();
        let bytes = frames(&[("0002", b"second"), ("0001", b"first")]);
        let mut stream = bytes.as_slice();
        let mut router = TicketRouter::new();
        router.register(first);
        router.register(second);

        let payload = router.await_response(&mut stream, first).await.unwrap();
        assert_eq!(payload, b"first");
        assert_eq!(router.queued(), 1);

        // Served from the queue, the stream is already drained.
        let payload = router.await_response(&mut stream, second).await.unwrap();
        assert_eq!(payload, b"second");
        assert_eq!(router.queued(), 0);
        assert!(!router.is_outstanding(&second));
    }

    #[tokio::test]
    async fn test_connection_closed_while_waiting() {
        let bytes = frames(&[("0042", b"stale")]);
        let mut stream = bytes.as_slice();
        let mut router = TicketRouter::new();
        router.register(Ticket::default());

        let err = router
            .await_response(&mut stream, Ticket::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed { read: 0, .. }));
    }
}
