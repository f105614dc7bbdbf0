//! # vdlink-controller
//!
//! The signal-controller end of the detector link.
//!
//! This crate provides:
//! - TCP accept loop with a bounded session table
//! - Per-connection stream reassembly and frame dispatch
//! - Heartbeat issue and timeout-driven disconnect
//! - Error-response synthesis for malformed frames

pub mod config;
pub mod error;
pub mod handler;
pub mod server;
pub mod session;

pub use config::ControllerConfig;
pub use error::ControllerError;
pub use handler::FrameHandler;
pub use server::{Server, ServerStats};
pub use session::Session;
