//! RESP frame types.
//!
//! The [`Frame`] enum represents a single RESP value in the reply
//! direction. Bulk strings use `Bytes` for reference-counted storage so
//! keys and members can be replied without copying.

use bytes::Bytes;

/// A single RESP protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Frame {
    /// Simple string response, e.g. `+OK\r\n`.
    /// Used for short, non-binary status replies.
    Simple(String),

    /// Error response, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk (binary-safe) string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Ordered array of frames, e.g. `*2\r\n+hello\r\n+world\r\n`.
    Array(Vec<Frame>),

    /// Null bulk string, e.g. `$-1\r\n`.
    Null,

    /// Null array, e.g. `*-1\r\n`. Distinct from an empty array.
    NullArray,
}

impl Frame {
    /// Returns `true` if this frame is a null bulk or null array.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::NullArray)
    }

    /// Builds a bulk frame from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Frame {
        Frame::Bulk(data.into())
    }

    /// The canonical `+OK` status reply.
    pub fn ok() -> Frame {
        Frame::Simple("OK".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_equality() {
        assert_eq!(Frame::Simple("OK".into()), Frame::Simple("OK".into()));
        assert_ne!(Frame::Simple("OK".into()), Frame::Simple("ERR".into()));
        assert_eq!(Frame::Integer(42), Frame::Integer(42));
        assert_eq!(Frame::Null, Frame::Null);
        assert_ne!(Frame::Null, Frame::NullArray);
    }

    #[test]
    fn is_null() {
        assert!(Frame::Null.is_null());
        assert!(Frame::NullArray.is_null());
        assert!(!Frame::Simple("OK".into()).is_null());
        assert!(!Frame::Integer(0).is_null());
        assert!(!Frame::Array(vec![]).is_null());
    }

    #[test]
    fn bulk_helper() {
        assert_eq!(
            Frame::bulk("hello"),
            Frame::Bulk(Bytes::from_static(b"hello"))
        );
    }
}
