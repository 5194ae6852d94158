//! Error types for the DNS relay.
//!
//! Decoding, encoding and forwarding each have their own error type so the
//! datagram handler can tell malformed input apart from upstream trouble.
//! `DnsError` wraps all of them for the server and bootstrap paths.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Represents errors that can occur in the DNS relay.
#[derive(Error, Debug)]
pub enum DnsError {
    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A datagram could not be decoded.
    #[error("Invalid DNS packet: {0}")]
    Decode(#[from] DecodeError),

    /// A message could not be written to the wire.
    #[error("Cannot encode DNS packet: {0}")]
    Encode(#[from] EncodeError),

    /// The upstream exchange failed.
    #[error("Forwarding failed: {0}")]
    Forward(#[from] ForwardError),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The metrics exporter could not be installed.
    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Malformed wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer of {len} bytes is shorter than the 12 byte header")]
    HeaderTooShort { len: usize },

    #[error("need {needed} bytes at offset {offset} but buffer holds {len}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        len: usize,
    },

    /// Compression pointers may only point backwards, before the start of
    /// the name currently being read.
    #[error("compression pointer to {pointer} from a name starting at {start}")]
    BadPointer { pointer: usize, start: usize },

    #[error("label at offset {offset} is not valid UTF-8")]
    InvalidLabel { offset: usize },
}

/// Values that cannot be represented on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("label of {len} bytes does not fit a one byte length prefix")]
    LabelTooLong { len: usize },

    #[error("empty label in name {name:?}")]
    EmptyLabel { name: String },

    #[error("record data of {len} bytes exceeds the 16 bit length prefix")]
    DataTooLong { len: usize },

    #[error("header declares {declared} {section} but message carries {actual}")]
    CountMismatch {
        section: &'static str,
        declared: u16,
        actual: usize,
    },
}

/// Failures of a single upstream exchange.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("malformed reply: {0}")]
    Decode(#[from] DecodeError),

    #[error("cannot encode query: {0}")]
    Encode(#[from] EncodeError),

    #[error("reply id {actual:#06x} does not match query id {expected:#06x}")]
    IdMismatch { expected: u16, actual: u16 },

    #[error("reply does not have the response flag set")]
    NotAResponse,

    #[error("reply is for {actual:?} instead of {expected:?}")]
    QuestionMismatch { expected: String, actual: String },
}
