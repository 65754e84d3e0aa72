//! Frame encoding and decoding.
//!
//! Every unit on the wire is a 16-byte header frame followed by a data frame:
//!
//! ```text
//! +--------+-----+-------------+------+    +--------+-----------+------+
//! | Ticket | 'L' | Length      | CRLF |    | Ticket | Payload   | CRLF |
//! | (4)    | (1) | (9 digits)  | (2)  |    | (4)    | (n)       | (2)  |
//! +--------+-----+-------------+------+    +--------+-----------+------+
//! ```
//!
//! The decimal length is the size of the whole data frame, ticket and CRLF
//! included.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::command::Command;
use super::constants::*;
use super::ticket::Ticket;
use crate::error::ProtocolError;

/// Ticket(4) + CRLF(2) wrapped around every payload.
const DATA_FRAME_OVERHEAD: usize = 6;

/// Most bytes buffered ahead of what the peer has actually sent.
const READ_CHUNK: usize = 64 * 1024;

/// A decoded data frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ticket: Ticket,
    pub payload: Vec<u8>,
}

fn data_frame_len(command_len: usize) -> Result<usize, ProtocolError> {
    let len = DATA_FRAME_OVERHEAD + command_len;
    if len > MAX_DATA_FRAME_LEN {
        return Err(ProtocolError::EncodingError { len });
    }
    Ok(len)
}

/// Encode a raw command into a header frame followed by its data frame.
pub fn encode_command(ticket: Ticket, command: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let data_len = data_frame_len(command.len())?;

    let mut out = Vec::with_capacity(HEADER_FRAME_LEN + data_len);
    out.extend_from_slice(ticket.as_bytes());
    out.push(LENGTH_MARKER);
    out.extend_from_slice(format!("{:09}", data_len).as_bytes());
    out.extend_from_slice(CRLF);

    out.extend_from_slice(ticket.as_bytes());
    out.extend_from_slice(command);
    out.extend_from_slice(CRLF);
    Ok(out)
}

/// Encode a [`Command`] and write it to the stream.
pub async fn write_command<W>(
    writer: &mut W,
    ticket: Ticket,
    command: &Command,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_command(ticket, &command.to_bytes()?)?;
    trace!(%ticket, %command, frame = %hex::encode(&bytes[..bytes.len().min(64)]), "send");
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly `len` bytes, accumulating partial reads.
///
/// A zero-byte read before the buffer is full means the peer closed the
/// connection; that is reported, never retried. The buffer grows with the
/// bytes actually received, so a bogus length costs nothing up front.
pub async fn read_exact<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(len.min(READ_CHUNK));
    let mut filled = 0;
    while filled < len {
        let want = (len - filled).min(READ_CHUNK);
        buf.resize(filled + want, 0);
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed {
                read: filled,
                expected: len,
            });
        }
        filled += n;
        buf.truncate(filled);
    }
    Ok(buf)
}

/// Parse a 16-byte header frame into its ticket and declared data length.
pub fn parse_header(header: &[u8]) -> Result<(Ticket, usize), ProtocolError> {
    if header.len() != HEADER_FRAME_LEN {
        return Err(ProtocolError::malformed(format!(
            "header frame is {} bytes, expected {}",
            header.len(),
            HEADER_FRAME_LEN
        )));
    }
    let ticket = Ticket::try_from(&header[0..4])
        .map_err(|_| ProtocolError::malformed("header ticket is not ASCII"))?;
    if header[4] != LENGTH_MARKER {
        return Err(ProtocolError::malformed(format!(
            "expected length marker 'L', got 0x{:02x}",
            header[4]
        )));
    }
    let digits = &header[5..5 + LENGTH_DIGITS];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::malformed(format!(
            "length field {:?} is not decimal",
            String::from_utf8_lossy(digits)
        )));
    }
    if &header[14..16] != CRLF {
        return Err(ProtocolError::malformed("header frame is not CRLF terminated"));
    }

    // Nine ASCII digits always fit in usize.
    let len = digits
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0'));
    Ok((ticket, len))
}

/// Read one header frame and the data frame it announces.
///
/// Consumes exactly `16 + L` bytes, where `L` is the declared length.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let header = read_exact(reader, HEADER_FRAME_LEN).await?;
    let (ticket, len) = parse_header(&header)?;
    if len < DATA_FRAME_OVERHEAD {
        return Err(ProtocolError::malformed(format!(
            "declared data frame length {} is shorter than ticket + CRLF",
            len
        )));
    }

    let data = read_exact(reader, len).await?;
    trace!(%ticket, len, frame = %hex::encode(&data[..data.len().min(64)]), "recv");

    if &data[0..4] != ticket.as_bytes() {
        return Err(ProtocolError::malformed(format!(
            "data frame ticket {:?} does not match header ticket {}",
            String::from_utf8_lossy(&data[0..4]),
            ticket
        )));
    }
    if &data[len - 2..] != CRLF {
        return Err(ProtocolError::malformed(
            "data frame does not end at the declared length",
        ));
    }

    Ok(Frame {
        ticket,
        payload: data[4..len - 2].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_trigger() {
        let bytes = encode_command(Ticket::default(), b"T?").unwrap();
        assert_eq!(bytes, b"1000L000000008\r\n1000T?\r\n");
    }

    #[test]
    fn test_data_frame_len_bound() {
        let largest = MAX_DATA_FRAME_LEN - DATA_FRAME_OVERHEAD;
        assert_eq!(data_frame_len(largest).unwrap(), MAX_DATA_FRAME_LEN);
        assert!(matches!(
            data_frame_len(largest + 1),
            Err(ProtocolError::EncodingError { len: 1_000_000_000 })
        ));
    }

    #[tokio::test]
    async fn test_round_trip() {
        for (ticket, command) in [
            ("1000", b"c004".to_vec()),
            ("abcd", b"T?".to_vec()),
            ("0001", vec![0u8, 1, 2, 255, b'\r', b'\n']),
            ("9999", Vec::new()),
        ] {
            let ticket = Ticket::try_from(ticket).unwrap();
            let bytes = encode_command(ticket, &command).unwrap();
            let mut stream = bytes.as_slice();
            let frame = read_frame(&mut stream).await.unwrap();
            assert_eq!(frame.ticket, ticket);
            assert_eq!(frame.payload, command);
            assert!(stream.is_empty());
        }
    }

    #[tokio::test]
    async fn test_read_frame_consumes_exactly_one_frame() {
        let mut bytes = encode_command(Ticket::default(), b"*").unwrap();
        bytes.extend_from_slice(b"trailing");
        let mut stream = bytes.as_slice();

        let frame = read_frame(&mut stream).await.unwrap();
        assert_eq!(frame.payload, b"*");
        assert_eq!(stream, b"trailing");
    }

    #[tokio::test]
    async fn test_read_frame_accumulates_partial_reads() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"1000L0000")
            .read(b"00007\r\n")
            .read(b"10")
            .read(b"00*\r\n")
            .build();

        let frame = read_frame(&mut stream).await.unwrap();
        assert_eq!(frame.ticket, Ticket::default());
        assert_eq!(frame.payload, b"*");
    }

    #[tokio::test]
    async fn test_closed_during_header() {
        let mut stream = tokio_test::io::Builder::new().read(b"1000L00").build();
        let err = read_frame(&mut stream).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ConnectionClosed {
                read: 7,
                expected: 16
            }
        ));
    }

    #[tokio::test]
    async fn test_closed_during_data_frame() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"1000L000000020\r\n")
            .read(b"1000start")
            .build();
        let err = read_frame(&mut stream).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ConnectionClosed {
                read: 9,
                expected: 20
            }
        ));
    }

    #[tokio::test]
    async fn test_huge_declared_length_with_short_stream() {
        let mut stream: &[u8] = b"1000L999999999\r\n1000";
        let err = read_frame(&mut stream).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::ConnectionClosed {
                read: 4,
                expected: MAX_DATA_FRAME_LEN
            }
        ));
    }

    #[tokio::test]
    async fn test_read_exact_spans_several_chunks() {
        let data: Vec<u8> = (0..READ_CHUNK * 2 + 5).map(|i| i as u8).collect();
        let mut stream = data.as_slice();
        let buf = read_exact(&mut stream, data.len()).await.unwrap();
        assert_eq!(buf, data);
        assert!(stream.is_empty());
    }

    #[tokio::test]
    async fn test_length_mismatch_is_malformed() {
        // Declares 8 bytes but the data frame is 7 long, so the CRLF lands
        // one byte early.
        let mut stream: &[u8] = b"1000L000000008\r\n1000*\r\nX";
        let err = read_frame(&mut stream).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_bad_header() {
        for header in [
            &b"1000X000000007\r\n1000*\r\n"[..],
            &b"1000L00000000a\r\n1000*\r\n"[..],
            &b"1000L000000007\n\n1000*\r\n"[..],
            &b"1000L000000003\r\n100"[..],
        ] {
            let mut stream = header;
            let err = read_frame(&mut stream).await.unwrap_err();
            assert!(matches!(err, ProtocolError::MalformedResponse(_)), "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_ticket_mismatch_between_header_and_data() {
        let mut stream: &[u8] = b"1000L000000007\r\n2000*\r\n";
        let err = read_frame(&mut stream).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_write_command() {
        let mut stream = tokio_test::io::Builder::new()
            .write(b"1000L000000010\r\n1000c004\r\n")
            .build();
        write_command(&mut stream, Ticket::default(), &Command::SelectApplication(4))
            .await
            .unwrap();
    }
}
