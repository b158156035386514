//! Frame codec for chat streams.
//!
//! Length-prefixed JSON: a 4-byte big-endian length, then one serialized
//! [`Frame`]. Errors come out as [`ChannelError`] so the channel halves can
//! tell a broken transport from a peer speaking garbage.

use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use super::protocol::Frame;
use crate::error::ChannelError;

/// Upper bound on one encoded frame. Chat lines are small; anything larger
/// is treated as a corrupt or hostile peer.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 1024 * 1024;

pub struct FrameCodec {
    inner: LengthDelimitedCodec,
    max_frame_length: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max)
                .new_codec(),
            max_frame_length: max,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ChannelError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ChannelError> {
        let Some(body) = self.inner.decode(src)? else {
            return Ok(None);
        };
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(ChannelError::Malformed)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, ChannelError> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("connection closed inside a frame ({} bytes pending)", buf.len()),
            )
            .into()),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ChannelError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ChannelError> {
        let body = serde_json::to_vec(&frame).map_err(ChannelError::Malformed)?;
        if body.len() > self.max_frame_length {
            return Err(ChannelError::FrameTooLarge {
                len: body.len(),
                max: self.max_frame_length,
            });
        }
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}
