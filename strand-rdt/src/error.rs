use thiserror::Error;

/// All errors produced by the `strand-rdt` crate.
///
/// Per-datagram network anomalies (corruption, duplication, malformed
/// framing, stale ACKs) are never surfaced through this enum — they are
/// absorbed into the sender/receiver state machines and only visible via
/// their statistics. `RdtError` covers programming errors and the
/// supplementary file-transfer framing.
#[derive(Debug, Error)]
pub enum RdtError {
    #[error("window size must be greater than zero")]
    InvalidWindowSize,

    #[error("max packet size must be in 1..={max}, got {actual}")]
    InvalidMaxPacketSize { actual: usize, max: usize },

    #[error("socket is closed")]
    SocketClosed,

    #[error("file-transfer framing is missing its filename separator")]
    MissingSeparator,

    #[error("filename {len} bytes exceeds the maximum of {max}")]
    FilenameTooLong { len: usize, max: usize },

    #[error("payload is empty")]
    PayloadEmpty,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RdtError>;
