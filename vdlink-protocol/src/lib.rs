//! # vdlink-protocol
//!
//! GB/T 43229-2023 application-level wire protocol between a traffic
//! signal controller and its vehicle detectors.
//!
//! This crate provides:
//! - Byte-stuffing escape codec and CRC-16 checksum
//! - Data-table serialization and frame encode/decode
//! - A buffering stream decoder that reassembles frames from a TCP
//!   byte stream
//! - Operation codes, object identifiers and the message classifier

pub mod codec;
pub mod crc;
pub mod error;
pub mod escape;
pub mod frame;
pub mod message;

pub use codec::{Decoder, RX_CAP};
pub use error::ProtocolError;
pub use frame::{DataTable, CRC_SIZE, HEADER_SIZE, MIN_FRAME_SIZE};
pub use message::{DeviceId, DeviceType, FrameErrorCode, MessageKind, Operation};

/// Protocol version byte carried by every frame.
pub const PROTOCOL_VERSION: u8 = 0x10;

/// Frame start and end delimiter.
pub const FRAME_DELIMITER: u8 = 0xC0;

/// Escape character.
pub const ESCAPE: u8 = 0xDB;

/// Second escape byte standing in for an escaped delimiter.
pub const ESCAPE_DELIMITER: u8 = 0xDC;

/// Second escape byte standing in for an escaped escape character.
pub const ESCAPE_ESCAPE: u8 = 0xDD;

/// Maximum unescaped frame size.
pub const MAX_FRAME_SIZE: usize = 2048;

/// Maximum content length carried by one data table.
pub const MAX_CONTENT_SIZE: usize = 1500;

/// Default controller listen port.
pub const DEFAULT_PORT: u16 = 40000;
