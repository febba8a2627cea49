//! The RDT wire packet and its codec.
//!
//! Binary layout (all multi-byte fields big-endian), 15-byte header:
//!
//! ```text
//! +----------+----------+-------+-------------+-------------+----------+----------------+
//! | seq_num  | ack_num  | flags | window_size | data_length | checksum |     data        |
//! |   (4B)   |   (4B)   | (1B)  |    (2B)     |    (2B)     |   (2B)   | data_length (B) |
//! +----------+----------+-------+-------------+-------------+----------+----------------+
//! ```
//!
//! The checksum is the first two bytes (big-endian) of the MD5 digest taken
//! over every other header field (in wire order, excluding `checksum`)
//! concatenated with `data`. MD5 is used purely for corruption detection —
//! collision resistance is irrelevant here.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};

/// Size of the fixed packet header, in bytes.
pub const HEADER_SIZE: usize = 15;

/// DATA bit of [`Packet::flags`].
pub const FLAG_DATA: u8 = 0x01;
/// ACK bit of [`Packet::flags`].
pub const FLAG_ACK: u8 = 0x02;
/// FIN bit of [`Packet::flags`]. Reserved: never set by this engine.
pub const FLAG_FIN: u8 = 0x04;
/// SYN bit of [`Packet::flags`]. Reserved: never set by this engine.
pub const FLAG_SYN: u8 = 0x08;

/// A single RDT wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sender's position index (0-based packet counter).
    pub seq_num: u32,
    /// Highest contiguous `seq_num` the receiver has delivered.
    pub ack_num: u32,
    /// Bitmask over `FLAG_DATA`/`FLAG_ACK`/`FLAG_FIN`/`FLAG_SYN`.
    pub flags: u8,
    /// Advertised window size. Carried but never consulted by this engine
    /// (see the sender/receiver modules' design notes).
    pub window_size: u16,
    /// Payload byte count.
    pub data_length: u16,
    /// Checksum as carried on the wire (not recomputed by `decode`).
    pub checksum: u16,
    /// Opaque payload.
    pub data: Bytes,
}

impl Packet {
    /// Build a DATA packet.
    pub fn data(seq_num: u32, window_size: u16, data: Bytes) -> Self {
        Self {
            seq_num,
            ack_num: 0,
            flags: FLAG_DATA,
            window_size,
            data_length: data.len() as u16,
            checksum: 0,
            data,
        }
    }

    /// Build an ACK packet (no payload).
    pub fn ack(ack_num: u32, window_size: u16) -> Self {
        Self {
            seq_num: 0,
            ack_num,
            flags: FLAG_ACK,
            window_size,
            data_length: 0,
            checksum: 0,
            data: Bytes::new(),
        }
    }

    pub fn is_data(&self) -> bool {
        self.flags & FLAG_DATA != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & FLAG_ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & FLAG_FIN != 0
    }

    pub fn is_syn(&self) -> bool {
        self.flags & FLAG_SYN != 0
    }

    /// Recompute the checksum over the header (minus checksum) + payload.
    fn compute_checksum(&self) -> u16 {
        let mut hasher = Md5::new();
        hasher.update(self.seq_num.to_be_bytes());
        hasher.update(self.ack_num.to_be_bytes());
        hasher.update([self.flags]);
        hasher.update(self.window_size.to_be_bytes());
        hasher.update(self.data_length.to_be_bytes());
        hasher.update(&self.data);
        let digest = hasher.finalize();
        u16::from_be_bytes([digest[0], digest[1]])
    }

    /// Returns `true` if the carried checksum does not match the recomputed
    /// one — i.e. the packet was corrupted in transit.
    pub fn is_corrupt(&self) -> bool {
        self.compute_checksum() != self.checksum
    }

    /// Encode this packet into a fresh byte buffer, filling in the checksum.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Encode into a pre-allocated `BytesMut`, filling in the checksum.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        let checksum = self.compute_checksum();
        buf.put_u32(self.seq_num);
        buf.put_u32(self.ack_num);
        buf.put_u8(self.flags);
        buf.put_u16(self.window_size);
        buf.put_u16(self.data_length);
        buf.put_u16(checksum);
        buf.put_slice(&self.data);
    }

    /// Decode a packet from `bytes`.
    ///
    /// Returns `None` if the buffer is shorter than [`HEADER_SIZE`] or the
    /// carried `data_length` does not match the remainder of the buffer.
    /// The checksum is carried verbatim, not recomputed — call
    /// [`Packet::is_corrupt`] to check it. A bit-flip anywhere in the buffer
    /// never causes `decode` itself to fail; only framing malformation does.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }

        let mut header = &bytes[..HEADER_SIZE];
        let seq_num = header.get_u32();
        let ack_num = header.get_u32();
        let flags = header.get_u8();
        let window_size = header.get_u16();
        let data_length = header.get_u16();
        let checksum = header.get_u16();

        let rest = &bytes[HEADER_SIZE..];
        if rest.len() != data_length as usize {
            return None;
        }

        Some(Self {
            seq_num,
            ack_num,
            flags,
            window_size,
            data_length,
            checksum,
            data: Bytes::copy_from_slice(rest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_data_packet() {
        let p = Packet::data(42, 5, Bytes::from_static(b"hello"));
        let encoded = p.encode();
        assert_eq!(encoded.len(), HEADER_SIZE + 5);

        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded.seq_num, 42);
        assert_eq!(decoded.data_length, 5);
        assert_eq!(&decoded.data[..], b"hello");
        assert!(decoded.is_data());
        assert!(!decoded.is_corrupt());
    }

    #[test]
    fn round_trip_ack_packet() {
        let p = Packet::ack(7, 5);
        let encoded = p.encode();
        assert_eq!(encoded.len(), HEADER_SIZE);

        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded.ack_num, 7);
        assert!(decoded.is_ack());
        assert!(!decoded.is_data());
        assert!(!decoded.is_corrupt());
    }

    #[test]
    fn decode_rejects_short_buffer() {
        assert!(Packet::decode(&[0u8; HEADER_SIZE - 1]).is_none());
    }

    #[test]
    fn decode_rejects_inconsistent_length() {
        let p = Packet::data(0, 5, Bytes::from_static(b"abcd"));
        let mut encoded = BytesMut::from(&p.encode()[..]);
        // Truncate the payload without fixing data_length.
        encoded.truncate(encoded.len() - 1);
        assert!(Packet::decode(&encoded).is_none());
    }

    #[test]
    fn bit_flip_in_payload_detected_as_corrupt_not_rejected() {
        let p = Packet::data(0, 5, Bytes::from_static(b"abcd"));
        let mut encoded = BytesMut::from(&p.encode()[..]);
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;

        let decoded = Packet::decode(&encoded).expect("framing still valid");
        assert!(decoded.is_corrupt());
    }

    #[test]
    fn bit_flip_in_header_detected_as_corrupt() {
        let p = Packet::data(0, 5, Bytes::from_static(b"abcd"));
        let mut encoded = BytesMut::from(&p.encode()[..]);
        encoded[0] ^= 0x01; // flip a bit in seq_num

        let decoded = Packet::decode(&encoded).unwrap();
        assert!(decoded.is_corrupt());
    }

    #[test]
    fn flags_predicates() {
        let mut p = Packet::data(0, 0, Bytes::new());
        assert!(p.is_data());
        assert!(!p.is_ack());
        p.flags |= FLAG_ACK;
        assert!(p.is_ack());
        assert!(!p.is_fin());
        assert!(!p.is_syn());
    }

    #[test]
    fn checksum_detects_random_single_bit_flips() {
        // Flip every single bit of a moderately sized packet and confirm
        // is_corrupt is true in every case.
        let p = Packet::data(123, 5, Bytes::from_static(b"the quick brown fox"));
        let encoded = p.encode();

        for byte_idx in 0..encoded.len() {
            for bit in 0..8u8 {
                let mut flipped = BytesMut::from(&encoded[..]);
                flipped[byte_idx] ^= 1 << bit;
                let decoded = Packet::decode(&flipped).unwrap();
                assert!(
                    decoded.is_corrupt(),
                    "byte {byte_idx} bit {bit} flip not detected"
                );
            }
        }
    }

    #[test]
    fn empty_payload_round_trips() {
        let p = Packet::data(0, 5, Bytes::new());
        let encoded = p.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(decoded.data_length, 0);
        assert!(decoded.data.is_empty());
        assert!(!decoded.is_corrupt());
    }
}
