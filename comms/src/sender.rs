//! The sending end of the framed protocol.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize};

/// The sending end handle of the communication.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `msg` as a single frame through the inner writer.
    ///
    /// The frame is the big endian length of the body followed by the body itself, the
    /// zero copy part of the serialization is written straight from the message.
    ///
    /// # Arguments
    /// * `msg` - A serializable object.
    ///
    /// # Returns
    /// A result object that returns `io::Error` on failure.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);

        let zero_copy_data = msg.serialize(buf);
        let len = buf.len() - LEN_TYPE_SIZE + zero_copy_data.map(<[_]>::len).unwrap_or_default();
        let header = (len as LenType).to_be_bytes();

        // The header is always buffered, even for an empty body.
        buf[..header.len()].copy_from_slice(&header);
        tx.write_all(buf).await?;

        if let Some(data) = zero_copy_data {
            tx.write_all(data).await?;
        }

        tx.flush().await
    }

    /// Shuts down the writing half of the inner writer.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;

    impl<'a> Serialize<'a> for Empty {
        fn serialize(&'a self, _: &mut Vec<u8>) -> Option<&'a [u8]> {
            None
        }
    }

    struct Split;

    impl<'a> Serialize<'a> for Split {
        fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
            buf.extend_from_slice(b"ab");
            Some(b"cde")
        }
    }

    #[tokio::test]
    async fn empty_body_still_sends_header() {
        let mut tx = OnoSender::new(Vec::new());
        tx.send(&Empty).await.unwrap();

        assert_eq!(tx.tx, 0u64.to_be_bytes());
    }

    #[tokio::test]
    async fn zero_copy_tail_follows_buffered_body() {
        let mut tx = OnoSender::new(Vec::new());
        tx.send(&Split).await.unwrap();

        let mut expected = 5u64.to_be_bytes().to_vec();
        expected.extend_from_slice(b"abcde");
        assert_eq!(tx.tx, expected);
    }
}
