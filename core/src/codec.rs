/// Seam to the external LZ decompressor. Packed streams are end-anchored:
/// the last 4 bytes of the stream hold the unpacked size and the codec
/// walks the stream backward from there.
pub trait Unpacker {
    /// Unpacks into `dst`. `src` always ends at the end of the packed
    /// stream; `src_size` is the stream length when the caller knows it
    /// and 0 when only the end position is known (the stream then
    /// describes its own extent). Returns false on checksum mismatch.
    fn unpack(&self, dst: &mut [u8], src: &[u8], src_size: u32) -> bool;
}
