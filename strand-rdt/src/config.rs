//! Tunables for the sender and receiver, with sensible defaults for a
//! loopback-scale transfer.

use std::time::Duration;

use crate::error::{RdtError, Result};

/// Default maximum payload bytes per packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024;
/// Default sliding window size (max unacknowledged packets in flight).
pub const DEFAULT_WINDOW_SIZE: u16 = 5;
/// Default per-packet retransmission timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// `data_length` is a 16-bit wire field, so no packet may carry more than
/// `u16::MAX` payload bytes.
const MAX_MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Sender-side configuration. Constant for the lifetime of one transfer.
#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
    /// `W`: maximum count of unacknowledged in-flight packets.
    pub window_size: u16,
    /// `T`: per-packet retransmission timeout.
    pub timeout: Duration,
    /// `MSS`: maximum payload bytes per packet.
    pub max_packet_size: usize,
}

impl SenderConfig {
    pub fn new(window_size: u16, timeout: Duration, max_packet_size: usize) -> Result<Self> {
        if window_size == 0 {
            return Err(RdtError::InvalidWindowSize);
        }
        if max_packet_size == 0 || max_packet_size > MAX_MAX_PACKET_SIZE {
            return Err(RdtError::InvalidMaxPacketSize {
                actual: max_packet_size,
                max: MAX_MAX_PACKET_SIZE,
            });
        }
        Ok(Self {
            window_size,
            timeout,
            max_packet_size,
        })
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            timeout: DEFAULT_TIMEOUT,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

/// Receiver-side configuration.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverConfig {
    /// Advertised window size, carried in outgoing ACKs' `window_size` field.
    pub window_size: u16,
}

impl ReceiverConfig {
    pub fn new(window_size: u16) -> Result<Self> {
        if window_size == 0 {
            return Err(RdtError::InvalidWindowSize);
        }
        Ok(Self { window_size })
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_window() {
        assert!(SenderConfig::new(0, DEFAULT_TIMEOUT, 1024).is_err());
        assert!(ReceiverConfig::new(0).is_err());
    }

    #[test]
    fn rejects_oversized_mss() {
        assert!(SenderConfig::new(5, DEFAULT_TIMEOUT, MAX_MAX_PACKET_SIZE + 1).is_err());
        assert!(SenderConfig::new(5, DEFAULT_TIMEOUT, 0).is_err());
    }

    #[test]
    fn defaults_match_spec() {
        let cfg = SenderConfig::default();
        assert_eq!(cfg.window_size, 5);
        assert_eq!(cfg.max_packet_size, 1024);
        assert_eq!(cfg.timeout, Duration::from_secs_f64(2.0));
    }
}
