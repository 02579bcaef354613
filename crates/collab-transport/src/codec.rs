//! Length-delimited [`Frame`] framing: a 4-byte big-endian length prefix
//! followed by a `serde_json` body, over any duplex byte stream. Grounded
//! in `spark-transport-tcp`'s channel framing shape, generalised from raw
//! bytes to a structured `Frame` item since the multiplexer here frames
//! logical request/reply/event units rather than arbitrary segments.

use bytes::{Buf, BufMut, BytesMut};
use collab_core::protocol::Frame;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Frames larger than this are rejected as a protocol error rather than
/// accepted and left to exhaust memory on a hostile or buggy peer.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Default)]
pub struct FrameCodec {
    /// Length of the frame currently being assembled, once known.
    pending_len: Option<usize>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                if src.len() < 4 {
                    src.reserve(4);
                    return Ok(None);
                }
                let len = src.get_u32() as usize;
                if len > MAX_FRAME_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("frame length {len} exceeds {MAX_FRAME_LEN}"),
                    ));
                }
                self.pending_len = Some(len);
                len
            }
        };

        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let body = src.split_to(len);
        self.pending_len = None;
        let frame: Frame = serde_json::from_slice(&body)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        let body = serde_json::to_vec(&item).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        if body.len() > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {} exceeds {MAX_FRAME_LEN}", body.len()),
            ));
        }
        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_core::protocol::FrameKind;

    fn sample() -> Frame {
        Frame {
            kind: FrameKind::Request,
            service: "content".into(),
            id: 7,
            name: Some("getSnapshot".into()),
            data: Some(serde_json::json!(["rich-text", "doc-1", 0])),
        }
    }

    #[test]
    fn round_trips_a_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().expect("a full frame was buffered");
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.name.as_deref(), Some("getSnapshot"));
    }

    #[test]
    fn decode_waits_for_full_body() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(sample(), &mut buf).unwrap();

        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_LEN + 1) as u32);
        assert!(codec.decode(&mut buf).is_err());
    }
}
