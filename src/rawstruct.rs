use std::mem::size_of;
use std::ptr;
use std::slice;

/// Marker for the wire layouts in `s11n`.
///
/// Implementors must be `#[repr(C)]`, have alignment 1, contain no padding, and accept every bit
/// pattern. That rules out everything but byte arrays and the `endian` wrappers around them.
pub unsafe trait RawStruct: Copy {}

/// Return a slice of the bytes in the given struct.
pub fn as_bytes<T: RawStruct>(x: &T) -> &[u8] {
    // Safe because `RawStruct` types have no padding, so every byte is initialized.
    unsafe {
        slice::from_raw_parts(
            x as *const T as *const u8,
            size_of::<T>())
    }
}

/// Read a struct out of the front of a byte slice. Returns `None` if the slice is too short.
pub fn from_bytes<T: RawStruct>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < size_of::<T>() {
        None
    } else {
        // Safe because the length was checked and `RawStruct` types accept any bit pattern.
        Some(unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) })
    }
}
