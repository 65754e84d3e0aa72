//! Wire constants for the line protocol (version 3).
//!
//! Every command and every response travels as a header frame followed by a
//! data frame. Both start with the 4-character ticket.

/// Ticket used for every command this client sends.
pub const DEFAULT_TICKET: &[u8; 4] = b"1000";

/// Frame terminator.
pub const CRLF: &[u8; 2] = b"\r\n";

/// Marker between the ticket and the decimal length in a header frame.
pub const LENGTH_MARKER: u8 = b'L';

/// Ticket(4) + 'L' + length(9) + CRLF(2).
pub const HEADER_FRAME_LEN: usize = 16;

/// Number of decimal digits in the header length field.
pub const LENGTH_DIGITS: usize = 9;

/// Largest value the length field can carry.
pub const MAX_DATA_FRAME_LEN: usize = 999_999_999;

/// Sent right after connecting to switch the device to protocol version 3.
pub const HANDSHAKE_REQUEST: &[u8] = b"1000v03\r\n";

/// The only acceptable reply to [`HANDSHAKE_REQUEST`].
pub const HANDSHAKE_REPLY: &[u8] = b"1000*\r\n";

/// Default TCP port of the process interface.
pub const DEFAULT_PORT: u16 = 50010;

// Status markers

/// Command executed
pub const STATUS_SUCCESS: u8 = b'*';

/// Device busy or in an invalid state for the command
pub const STATUS_BUSY: u8 = b'!';

/// Invalid argument or length
pub const STATUS_INVALID_ARGUMENT: u8 = b'?';
