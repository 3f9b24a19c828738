/// A type that can be written into a frame.
pub trait Serialize<'a> {
    /// Writes the buffered part of `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, the header space has already been reserved.
    ///
    /// # Returns
    /// An optional trailing slice that will be written right after `buf` without copying.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}
