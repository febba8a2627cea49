//! Lifecycle statistics reported by `stop()`.
//!
//! Counters are incremented under the component's own mutex while running;
//! they are only meant to be read after `stop()` has joined every worker, so
//! the structs themselves carry no synchronization.

/// Statistics accumulated over a [`crate::sender::Sender`]'s lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub acks_received: u64,
}

/// Statistics accumulated over a [`crate::receiver::Receiver`]'s lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub acks_sent: u64,
    pub duplicates_received: u64,
}
