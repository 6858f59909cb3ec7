/// Fixed-width field extraction from raw telemetry buffers
///
/// Every reader takes the buffer and an explicit byte offset and fails with
/// `DecodeError::OutOfRange` when the field would run past the end of the
/// buffer. Multi-byte integers are big-endian, with the scooter's own
/// ordering for 24-bit values (see `u24`).
use crate::error::DecodeError;

fn field<const N: usize>(buf: &[u8], offset: usize) -> Result<[u8; N], DecodeError> {
    offset
        .checked_add(N)
        .and_then(|end| buf.get(offset..end))
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError::OutOfRange {
            offset,
            width: N,
            len: buf.len(),
        })
}

/// Test bit `bit_index` (0 = least significant) of the byte at `byte_offset`
pub fn bit(buf: &[u8], byte_offset: usize, bit_index: u8) -> Result<bool, DecodeError> {
    debug_assert!(bit_index < 8, "bit index {bit_index} out of range");
    let [byte] = field::<1>(buf, byte_offset)?;
    Ok(byte & (1 << bit_index) != 0)
}

pub fn u8(buf: &[u8], offset: usize) -> Result<u8, DecodeError> {
    let [byte] = field::<1>(buf, offset)?;
    Ok(byte)
}

pub fn i8(buf: &[u8], offset: usize) -> Result<i8, DecodeError> {
    Ok(i8::from_be_bytes(field::<1>(buf, offset)?))
}

pub fn u16(buf: &[u8], offset: usize) -> Result<u16, DecodeError> {
    Ok(u16::from_be_bytes(field::<2>(buf, offset)?))
}

/// Read a 24-bit unsigned value as `(b[0] << 16) | (b[1] << 8) | b[2]`
///
/// The scooter firmware composes these explicitly rather than through a
/// wider big-endian read, and this must stay byte-for-byte identical.
pub fn u24(buf: &[u8], offset: usize) -> Result<u32, DecodeError> {
    let [hi, mid, lo] = field::<3>(buf, offset)?;
    Ok((u32::from(hi) << 16) | (u32::from(mid) << 8) | u32::from(lo))
}

pub fn u32(buf: &[u8], offset: usize) -> Result<u32, DecodeError> {
    Ok(u32::from_be_bytes(field::<4>(buf, offset)?))
}

/// Read an unsigned 16-bit fixed-point value with one decimal place
pub fn tenths(buf: &[u8], offset: usize) -> Result<f32, DecodeError> {
    Ok(f32::from(u16(buf, offset)?) / 10.0)
}
