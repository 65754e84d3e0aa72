//! Line protocol: framing, tickets, commands and response correlation.

mod command;
mod constants;
mod frame;
mod router;
mod ticket;

pub use command::Command;
pub use constants::*;
pub use frame::{Frame, encode_command, parse_header, read_exact, read_frame, write_command};
pub use router::TicketRouter;
pub use ticket::{InvalidTicket, Ticket};
