use std::fmt;

use super::constants::DEFAULT_TICKET;

/// 4-character identifier correlating a command with its response.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket([u8; 4]);

impl Ticket {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Ticket(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl Default for Ticket {
    fn default() -> Self {
        Ticket(*DEFAULT_TICKET)
    }
}

impl From<[u8; 4]> for Ticket {
    fn from(bytes: [u8; 4]) -> Self {
        Ticket(bytes)
    }
}

impl TryFrom<&[u8]> for Ticket {
    type Error = InvalidTicket;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 4] = bytes.try_into().map_err(|_| InvalidTicket)?;
        if !bytes.is_ascii() {
            return Err(InvalidTicket);
        }
        Ok(Ticket(bytes))
    }
}

impl TryFrom<&str> for Ticket {
    type Error = InvalidTicket;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Ticket::try_from(s.as_bytes())
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ticket({})", self)
    }
}

/// A ticket must be exactly four ASCII bytes.
#[derive(Debug, PartialEq, Eq)]
pub struct InvalidTicket;

impl fmt::Display for InvalidTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ticket must be exactly 4 ASCII characters")
    }
}

impl std::error::Error for InvalidTicket {}
