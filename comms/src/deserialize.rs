use std::io;

/// A type that can be read back from a frame.
pub trait Deserialize<'a>: Sized {
    /// Deserializes a whole frame body.
    ///
    /// # Arguments
    /// * `buf` - The frame body, without the length prefix.
    ///
    /// # Returns
    /// The deserialized value or an `io::Error` of kind `InvalidData`.
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
