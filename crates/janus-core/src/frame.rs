//! Length-prefixed frame codec.
//!
//! A frame is a native-endian `u64` byte count followed by that many bytes.
//! All decoding goes through [`FrameCursor`], which never reads past the end
//! of the slice it wraps: an oversized length prefix is a [`FlatError::Truncated`].

use thiserror::Error;

/// Width of the frame length prefix.
pub const FRAME_PREFIX_LEN: usize = std::mem::size_of::<u64>();

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlatError {
    #[error("truncated frame at offset {offset}: need {needed} bytes, {remaining} remain")]
    Truncated {
        offset: usize,
        needed: u64,
        remaining: usize,
    },
    #[error("fragment {index} is not stored contiguously")]
    NonContiguous { index: usize },
    #[error("invalid strided fragment: {0}")]
    InvalidStride(String),
}

impl FlatError {
    /// Shift a `Truncated` offset that was reported relative to a sub-buffer at `base`.
    pub(crate) fn offset_by(self, base: usize) -> Self {
        match self {
            Self::Truncated {
                offset,
                needed,
                remaining,
            } => Self::Truncated {
                offset: offset + base,
                needed,
                remaining,
            },
            other => other,
        }
    }
}

/// Encoded size of a frame carrying `payload_len` bytes.
pub fn frame_len(payload_len: usize) -> usize {
    FRAME_PREFIX_LEN.saturating_add(payload_len)
}

/// Append one frame (prefix + payload) to `out`.
pub fn encode_frame(payload: &[u8], out: &mut Vec<u8>) {
    out.reserve(frame_len(payload.len()));
    out.extend_from_slice(&(payload.len() as u64).to_ne_bytes());
    out.extend_from_slice(payload);
}

/// Decode the frame starting at `offset`, returning a borrowed payload and the
/// offset just past it.
pub fn decode_frame(buf: &[u8], offset: usize) -> Result<(&[u8], usize), FlatError> {
    let mut cursor = FrameCursor::at(buf, offset);
    let payload = cursor.decode_frame()?;
    Ok((payload, cursor.position()))
}

/// Forward-only reader over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct FrameCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Cursor starting at `pos`, clamped to the end of `buf`.
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: u64) -> Result<&'a [u8], FlatError> {
        let remaining = self.remaining();
        let len = usize::try_from(n)
            .ok()
            .filter(|&len| len <= remaining)
            .ok_or(FlatError::Truncated {
                offset: self.pos,
                needed: n,
                remaining,
            })?;
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, FlatError> {
        let bytes = self.take(FRAME_PREFIX_LEN as u64)?;
        let mut raw = [0u8; FRAME_PREFIX_LEN];
        raw.copy_from_slice(bytes);
        Ok(u64::from_ne_bytes(raw))
    }

    /// Read one frame. On error the cursor stays where the frame started.
    pub fn decode_frame(&mut self) -> Result<&'a [u8], FlatError> {
        let start = self.pos;
        let result = self.read_u64().and_then(|len| self.take(len));
        if result.is_err() {
            self.pos = start;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_frame_layout() {
        let mut out = Vec::new();
        encode_frame(&[0xAA, 0xBB, 0xCC], &mut out);
        assert_eq!(out.len(), frame_len(3));
        assert_eq!(&out[..8], &3u64.to_ne_bytes());
        assert_eq!(&out[8..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_decode_consecutive_frames() {
        let mut buf = Vec::new();
        encode_frame(b"abc", &mut buf);
        encode_frame(b"", &mut buf);
        encode_frame(b"de", &mut buf);

        let (first, next) = decode_frame(&buf, 0).unwrap();
        assert_eq!(first, b"abc");
        let (second, next) = decode_frame(&buf, next).unwrap();
        assert!(second.is_empty());
        let (third, next) = decode_frame(&buf, next).unwrap();
        assert_eq!(third, b"de");
        assert_eq!(next, buf.len());
    }

    #[test]
    fn test_truncated_prefix() {
        let mut cursor = FrameCursor::new(&[1, 2, 3]);
        let err = cursor.decode_frame().unwrap_err();
        assert_eq!(
            err,
            FlatError::Truncated { offset: 0, needed: 8, remaining: 3 }
        );
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_length_exceeds_remaining() {
        let mut buf = 10u64.to_ne_bytes().to_vec();
        buf.extend_from_slice(&[0; 4]);
        let mut cursor = FrameCursor::new(&buf);
        let err = cursor.decode_frame().unwrap_err();
        assert_eq!(
            err,
            FlatError::Truncated { offset: 8, needed: 10, remaining: 4 }
        );
        // A failed frame leaves the cursor at the frame start.
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn test_huge_length_does_not_overflow() {
        let buf = u64::MAX.to_ne_bytes();
        let mut cursor = FrameCursor::new(&buf);
        assert!(matches!(
            cursor.decode_frame(),
            Err(FlatError::Truncated { needed: u64::MAX, .. })
        ));
    }

    #[test]
    fn test_cursor_at_clamps() {
        let cursor = FrameCursor::at(&[1, 2], 10);
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.remaining(), 0);
    }
}
