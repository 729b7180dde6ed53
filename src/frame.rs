//! NETCONF message framing (RFC 6242).
//!
//! Two framings exist on the wire. Until the hello exchange completes a
//! session uses end-of-message (EOM) framing, where each message is
//! terminated by the literal `]]>]]>`. When both peers advertise the
//! `base:1.1` capability the session switches to chunked framing, where a
//! message is one or more length-prefixed chunks followed by `\n##\n`.
//!
//! The decoder is incremental: bytes are fed in as they arrive from the
//! transport and complete messages are produced regardless of where the
//! reads split the stream.

use log::trace;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::error::NetconfError;

/// EOM framing delimiter.
pub const DELIMITER_EOM: &[u8] = b"]]>]]>";

/// Chunked framing end-of-chunks delimiter.
pub const DELIMITER_CHUNKED: &[u8] = b"\n##\n";

/// Longest legal chunk header, `\n#4294967295\n` (RFC 6242).
const CHUNK_HEADER_LEN_MAX: usize = 13;

/// Largest legal chunk size in octets (RFC 6242).
const CHUNK_SIZE_MAX: u64 = 4_294_967_295;

/// Matches a complete chunk header at the start of the buffer.
static CHUNK_HEADER: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\A\n#[0-9]+\n") {
    Ok(re) => re,
    Err(err) => panic!("invalid CHUNK_HEADER regex: {err}"),
});

/// Message delimiting mode negotiated via the hello exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// `]]>]]>`-terminated messages (pre-hello, or peer lacks base:1.1).
    Eom,
    /// Length-prefixed chunks (both peers advertise base:1.1).
    Chunked,
}

impl FrameMode {
    /// Wraps one outgoing payload in this framing.
    pub fn encode(self, payload: &[u8]) -> Vec<u8> {
        match self {
            FrameMode::Eom => {
                let mut out = Vec::with_capacity(payload.len() + DELIMITER_EOM.len());
                out.extend_from_slice(payload);
                out.extend_from_slice(DELIMITER_EOM);
                out
            }
            FrameMode::Chunked => {
                let header = format!("\n#{}\n", payload.len());
                let mut out =
                    Vec::with_capacity(header.len() + payload.len() + DELIMITER_CHUNKED.len());
                out.extend_from_slice(header.as_bytes());
                out.extend_from_slice(payload);
                out.extend_from_slice(DELIMITER_CHUNKED);
                out
            }
        }
    }
}

/// Incremental encoder/decoder for one direction of a NETCONF stream.
///
/// The decode side is only ever touched by the session's dispatch loop,
/// so it carries its buffer without synchronization. The mode switches
/// exactly once, right after the hello exchange, before any follow-up
/// message is sent or parsed.
pub struct Framer {
    mode: FrameMode,

    /// Bytes received but not yet assembled into a message.
    buf: Vec<u8>,

    /// EOM mode: offset from which the next delimiter search resumes,
    /// so already-scanned bytes are not searched again.
    scan_pos: usize,

    /// Chunked mode: chunk data accumulated for the message in progress.
    partial: Vec<u8>,

    /// Chunked mode: octets still expected for the current chunk.
    chunk_remaining: usize,
}

impl Framer {
    /// Creates a framer in EOM mode, the state every session starts in.
    pub fn new() -> Self {
        Self {
            mode: FrameMode::Eom,
            buf: Vec::new(),
            scan_pos: 0,
            partial: Vec::new(),
            chunk_remaining: 0,
        }
    }

    /// Currently active framing mode.
    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    /// Switches the framing mode and resets decode progress.
    ///
    /// Buffered bytes are kept: anything already received belongs to the
    /// new mode, since the peer switches at the same hello boundary.
    pub fn set_mode(&mut self, mode: FrameMode) {
        trace!("framing mode set to {:?}", mode);
        self.mode = mode;
        self.scan_pos = 0;
        self.partial.clear();
        self.chunk_remaining = 0;
    }

    /// Wraps one outgoing payload in the active framing.
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        self.mode.encode(payload)
    }

    /// Feeds received bytes in and returns every message completed by them.
    ///
    /// May return zero messages (more bytes needed) or several (a single
    /// read can carry multiple frames). Framing errors are unrecoverable
    /// for the stream and must fail the session.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>, NetconfError> {
        self.buf.extend_from_slice(data);
        match self.mode {
            FrameMode::Eom => Ok(self.drain_eom()),
            FrameMode::Chunked => self.drain_chunked(),
        }
    }

    fn drain_eom(&mut self) -> Vec<Vec<u8>> {
        let mut msgs = Vec::new();
        loop {
            let window = &self.buf[self.scan_pos..];
            match find_subsequence(window, DELIMITER_EOM) {
                Some(offset) => {
                    let index = self.scan_pos + offset;
                    let msg = self.buf[..index].to_vec();
                    self.buf.drain(..index + DELIMITER_EOM.len());
                    self.scan_pos = 0;
                    msgs.push(msg);
                }
                None => {
                    // A delimiter may straddle the next read; rescan only
                    // the last few bytes next time.
                    self.scan_pos = self.buf.len().saturating_sub(DELIMITER_EOM.len() - 1);
                    break;
                }
            }
        }
        msgs
    }

    fn drain_chunked(&mut self) -> Result<Vec<Vec<u8>>, NetconfError> {
        let mut msgs = Vec::new();
        while !self.buf.is_empty() {
            if self.chunk_remaining == 0 {
                // Expect a chunk header or the end-of-chunks delimiter.
                if let Some(m) = CHUNK_HEADER.find(&self.buf) {
                    let header_len = m.end();
                    if header_len > CHUNK_HEADER_LEN_MAX {
                        return Err(NetconfError::Protocol(format!(
                            "chunk header is too long ({header_len} octets)"
                        )));
                    }
                    let digits = &self.buf[2..header_len - 1];
                    let length = parse_chunk_length(digits)?;
                    self.buf.drain(..header_len);
                    self.chunk_remaining = length;
                } else if self.buf.starts_with(DELIMITER_CHUNKED) {
                    if self.partial.is_empty() {
                        return Err(NetconfError::Protocol(
                            "unexpected end-of-chunks delimiter".to_string(),
                        ));
                    }
                    msgs.push(std::mem::take(&mut self.partial));
                    self.buf.drain(..DELIMITER_CHUNKED.len());
                } else if self.buf.len() >= CHUNK_HEADER_LEN_MAX {
                    // Enough bytes to contain either pattern, yet neither
                    // matched: the frame boundary is corrupt.
                    return Err(NetconfError::Protocol(
                        "expected chunk header or end-of-chunks delimiter".to_string(),
                    ));
                } else {
                    break;
                }
            } else {
                // Chunk data; may span multiple reads.
                let available = self.buf.len().min(self.chunk_remaining);
                self.partial.extend_from_slice(&self.buf[..available]);
                self.buf.drain(..available);
                self.chunk_remaining -= available;
            }
        }
        Ok(msgs)
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_chunk_length(digits: &[u8]) -> Result<usize, NetconfError> {
    let text = std::str::from_utf8(digits)
        .map_err(|_| NetconfError::Protocol("non-numeric chunk length".to_string()))?;
    let length: u64 = text
        .parse()
        .map_err(|_| NetconfError::Protocol(format!("invalid chunk length '{text}'")))?;
    if length == 0 || length > CHUNK_SIZE_MAX {
        return Err(NetconfError::Protocol(format!(
            "chunk length {length} out of range 1..{CHUNK_SIZE_MAX}"
        )));
    }
    Ok(length as usize)
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(framer: &mut Framer, data: &[u8]) -> Vec<Vec<u8>> {
        framer.feed(data).expect("feed")
    }

    #[test]
    fn eom_splits_messages_on_delimiter() {
        let mut framer = Framer::new();
        let msgs = feed_all(&mut framer, b"<hello/>]]>]]><next/>]]>]]>");
        assert_eq!(msgs, vec![b"<hello/>".to_vec(), b"<next/>".to_vec()]);
    }

    #[test]
    fn eom_keeps_partial_message_buffered() {
        let mut framer = Framer::new();
        assert!(feed_all(&mut framer, b"<partial").is_empty());
        assert!(feed_all(&mut framer, b"/>]]>]]").is_empty());
        let msgs = feed_all(&mut framer, b">");
        assert_eq!(msgs, vec![b"<partial/>".to_vec()]);
    }

    #[test]
    fn eom_delimiter_split_across_reads() {
        let mut framer = Framer::new();
        assert!(feed_all(&mut framer, b"<a/>]]>").is_empty());
        let msgs = feed_all(&mut framer, b"]]>");
        assert_eq!(msgs, vec![b"<a/>".to_vec()]);
    }

    #[test]
    fn chunked_decodes_single_chunk_reply() {
        let mut framer = Framer::new();
        framer.set_mode(FrameMode::Chunked);
        let msgs = feed_all(&mut framer, b"\n#5\n<ok/>\n##\n");
        assert_eq!(msgs, vec![b"<ok/>".to_vec()]);
    }

    #[test]
    fn chunked_reassembles_multiple_chunks_into_one_message() {
        let mut framer = Framer::new();
        framer.set_mode(FrameMode::Chunked);
        let msgs = feed_all(&mut framer, b"\n#3\n<ab\n#4\ncd/>\n##\n");
        assert_eq!(msgs, vec![b"<abcd/>".to_vec()]);
    }

    #[test]
    fn chunked_treats_delimiter_inside_chunk_data_as_opaque() {
        let payload = b"<x>\n##\n]]>]]></x>";
        let mut framer = Framer::new();
        framer.set_mode(FrameMode::Chunked);
        let framed = framer.encode(payload);
        let msgs = feed_all(&mut framer, &framed);
        assert_eq!(msgs, vec![payload.to_vec()]);
    }

    #[test]
    fn decoding_is_independent_of_read_boundaries() {
        let payload = b"<rpc-reply message-id=\"3\"><ok/></rpc-reply>";
        for mode in [FrameMode::Eom, FrameMode::Chunked] {
            let mut encoder = Framer::new();
            encoder.set_mode(mode);
            let mut framed = encoder.encode(payload);
            framed.extend_from_slice(&encoder.encode(payload));

            let mut all_at_once = Framer::new();
            all_at_once.set_mode(mode);
            let bulk = all_at_once.feed(&framed).expect("bulk feed");

            let mut byte_at_a_time = Framer::new();
            byte_at_a_time.set_mode(mode);
            let mut split = Vec::new();
            for byte in &framed {
                split.extend(byte_at_a_time.feed(&[*byte]).expect("byte feed"));
            }

            assert_eq!(bulk, split);
            assert_eq!(bulk, vec![payload.to_vec(), payload.to_vec()]);
        }
    }

    #[test]
    fn chunked_rejects_zero_length_chunk() {
        let mut framer = Framer::new();
        framer.set_mode(FrameMode::Chunked);
        let err = framer.feed(b"\n#0\n").expect_err("zero length chunk");
        assert!(matches!(err, NetconfError::Protocol(_)));
    }

    #[test]
    fn chunked_rejects_garbage_where_header_expected() {
        let mut framer = Framer::new();
        framer.set_mode(FrameMode::Chunked);
        let err = framer
            .feed(b"this is not a chunk header at all")
            .expect_err("garbage header");
        assert!(matches!(err, NetconfError::Protocol(_)));
    }

    #[test]
    fn chunked_rejects_unexpected_end_of_chunks() {
        let mut framer = Framer::new();
        framer.set_mode(FrameMode::Chunked);
        let err = framer.feed(b"\n##\n").expect_err("end without chunk");
        assert!(matches!(err, NetconfError::Protocol(_)));
    }

    #[test]
    fn chunked_rejects_oversized_header() {
        let mut framer = Framer::new();
        framer.set_mode(FrameMode::Chunked);
        let err = framer.feed(b"\n#99999999999\n").expect_err("oversized header");
        assert!(matches!(err, NetconfError::Protocol(_)));
    }

    #[test]
    fn encode_eom_appends_delimiter() {
        let framer = Framer::new();
        assert_eq!(framer.encode(b"<rpc/>"), b"<rpc/>]]>]]>".to_vec());
    }

    #[test]
    fn encode_chunked_wraps_payload_with_header_and_terminator() {
        let mut framer = Framer::new();
        framer.set_mode(FrameMode::Chunked);
        assert_eq!(framer.encode(b"<ok/>"), b"\n#5\n<ok/>\n##\n".to_vec());
    }

    #[test]
    fn mode_switch_keeps_buffered_bytes() {
        let mut framer = Framer::new();
        assert!(feed_all(&mut framer, b"<hello/>]]>]]>").len() == 1);
        // Bytes for the next (chunked) message may already sit in the
        // buffer when the hello completes.
        assert!(feed_all(&mut framer, b"\n#5\n").is_empty());
        framer.set_mode(FrameMode::Chunked);
        let msgs = feed_all(&mut framer, b"<ok/>\n##\n");
        assert_eq!(msgs, vec![b"<ok/>".to_vec()]);
    }
}
