//! File-transfer framing: packs a filename and file content into the single
//! byte stream the sender/receiver pair moves, and unpacks it back.
//!
//! Grounded in the reference `FileClient`/`FileServer`: `filename + b'\n' +
//! content`. The receiver side falls back to a fixed name when no separator
//! is found, matching the reference's defensive handling of a malformed or
//! truncated transfer.

use bytes::{Bytes, BytesMut};

use crate::error::{RdtError, Result};

/// Filename byte length beyond which `encode_file` refuses to proceed.
/// Chosen well above any real filename while still bounding the header.
pub const MAX_FILENAME_LEN: usize = 4096;

/// Name substituted when decoded data carries no `\n` separator.
pub const FALLBACK_FILENAME: &str = "received_file.bin";

/// Frame `filename` and `content` into the single buffer a [`crate::sender::Sender`]
/// transmits.
pub fn encode_file(filename: &str, content: &Bytes) -> Result<Bytes> {
    let filename_bytes = filename.as_bytes();
    if filename_bytes.len() > MAX_FILENAME_LEN {
        return Err(RdtError::FilenameTooLong {
            len: filename_bytes.len(),
            max: MAX_FILENAME_LEN,
        });
    }
    if filename_bytes.contains(&b'\n') {
        return Err(RdtError::MissingSeparator);
    }

    let mut buf = BytesMut::with_capacity(filename_bytes.len() + 1 + content.len());
    buf.extend_from_slice(filename_bytes);
    buf.extend_from_slice(b"\n");
    buf.extend_from_slice(content);
    Ok(buf.freeze())
}

/// Split a buffer received by a [`crate::receiver::Receiver`] back into its
/// filename and content.
///
/// If `data` is empty, returns [`RdtError::PayloadEmpty`]. If no `\n`
/// separator is present, the whole buffer is treated as content under
/// [`FALLBACK_FILENAME`], matching the reference server's behavior.
pub fn decode_file(data: &Bytes) -> Result<(String, Bytes)> {
    if data.is_empty() {
        return Err(RdtError::PayloadEmpty);
    }

    match data.iter().position(|&b| b == b'\n') {
        Some(idx) => {
            let filename = String::from_utf8_lossy(&data[..idx]).into_owned();
            let content = data.slice(idx + 1..);
            Ok((filename, content))
        }
        None => Ok((FALLBACK_FILENAME.to_string(), data.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_filename_and_content() {
        let content = Bytes::from_static(b"hello world");
        let framed = encode_file("notes.txt", &content).unwrap();
        let (name, decoded) = decode_file(&framed).unwrap();
        assert_eq!(name, "notes.txt");
        assert_eq!(decoded, content);
    }

    #[test]
    fn missing_separator_falls_back_to_default_name() {
        let data = Bytes::from_static(b"no separator here");
        let (name, content) = decode_file(&data).unwrap();
        assert_eq!(name, FALLBACK_FILENAME);
        assert_eq!(content, data);
    }

    #[test]
    fn empty_payload_rejected() {
        assert!(decode_file(&Bytes::new()).is_err());
    }

    #[test]
    fn filename_with_newline_rejected() {
        let content = Bytes::from_static(b"x");
        assert!(encode_file("bad\nname", &content).is_err());
    }

    #[test]
    fn oversized_filename_rejected() {
        let long_name = "a".repeat(MAX_FILENAME_LEN + 1);
        let content = Bytes::from_static(b"x");
        assert!(encode_file(&long_name, &content).is_err());
    }

    #[test]
    fn empty_content_round_trips() {
        let content = Bytes::new();
        let framed = encode_file("empty.bin", &content).unwrap();
        let (name, decoded) = decode_file(&framed).unwrap();
        assert_eq!(name, "empty.bin");
        assert!(decoded.is_empty());
    }
}
