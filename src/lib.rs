//! Client for a fleet of optical sensors speaking the line protocol
//! (version 3) over TCP.
//!
//! - [`protocol`] frames commands and correlates responses by ticket.
//! - [`decoder`] turns response payloads into typed values.
//! - [`session`] drives one device, including the evaluation retry loop.
//! - [`fleet`] evaluates every device in parallel and collects the outcomes.

pub mod config;
pub mod decoder;
pub mod error;
pub mod fleet;
pub mod protocol;
pub mod session;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use decoder::{EvaluationResult, ImageChunk, Verdict};
pub use error::{DeviceError, ProtocolError};
pub use fleet::{DeviceOutcome, DeviceTarget, FleetCoordinator};
pub use session::{DeviceSession, Evaluation, SessionOptions};
