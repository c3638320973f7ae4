//! Simple building-block data that can be read in one go.
//! Also, primitives advance the read pointer when read.

use crate::prelude::*;

pub(crate) trait SplitChecked: Sized {
    fn split_checked(&mut self, at: usize) -> Option<Self>;
}
impl<'a> SplitChecked for &'a [u8] {
    #[inline]
    fn split_checked(&mut self, at: usize) -> Option<&'a [u8]> {
        if at > self.len() {
            None
        } else {
            let (extracted, remainder) = self.split_at(at);
            *self = remainder;
            Some(extracted)
        }
    }
}

/// Implemented on integer types for reading as big-endian.
pub(crate) trait IntRead: Sized {
    /// Reads a big-endian integer.
    fn read(data: &mut &[u8]) -> StdResult<Self, &'static ErrorKind>;
}

/// Implement simple big endian integer reads.
macro_rules! impl_read_int {
    {$( $int:ty ),*} => {
        $(
            impl IntRead for $int {
                #[inline]
                fn read(raw: &mut &[u8]) -> StdResult<$int, &'static ErrorKind> {
                    let bytes = raw.split_checked(mem::size_of::<$int>())
                        .ok_or(err_truncated!("failed to read the expected integer"))?;
                    Ok(bytes.iter().fold(0, |mut acc, byte| {
                        acc = acc.checked_shl(8).unwrap_or(0);
                        acc |= *byte as $int;
                        acc
                    }))
                }
            }
        )*
    }
}
impl_read_int! {u8,u16,u32}

/// Slightly restricted integers.
macro_rules! restricted_int {
    {$(#[$attr:meta])* $name:ident : $inner:tt => $bits:expr} => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
        #[repr(transparent)]
        #[allow(non_camel_case_types)]
        pub struct $name($inner);
        impl From<$name> for $inner {
            #[inline]
            fn from(restricted: $name) -> $inner {
                restricted.0
            }
        }
        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
        impl $name {
            const MASK: $inner = (1 << $bits) - 1;

            /// The maximum value that this restricted integer can hold.
            #[inline]
            pub const fn max_value() -> $name {
                $name(Self::MASK)
            }

            /// Creates a restricted int from its non-restricted counterpart by masking off the
            /// extra bits.
            #[inline]
            pub const fn new(raw: $inner) -> $name {
                $name(raw & Self::MASK)
            }

            /// Returns `Some` if the raw integer is within range of the restricted integer, and
            /// `None` otherwise.
            #[inline]
            pub fn try_from(raw: $inner) -> Option<$name> {
                if raw <= Self::MASK {
                    Some($name(raw))
                } else {
                    None
                }
            }

            /// Get the inner integer out of the wrapper.
            /// The inner integer is guaranteed to be in range of the restricted wrapper.
            #[inline]
            pub fn as_int(self) -> $inner {
                self.0
            }

            /// Like `try_from`, but failing with a `MalformedMessage` error.
            #[inline]
            pub(crate) fn check_int(raw: $inner) -> StdResult<$name, &'static ErrorKind> {
                Self::try_from(raw).ok_or(err_malformed_msg!(
                    concat!("value out of range for ", stringify!($name))
                ))
            }
        }
        impl PartialEq<$inner> for $name {
            fn eq(&self, rhs: &$inner) -> bool {
                self.as_int() == *rhs
            }
        }
        impl PartialOrd<$inner> for $name {
            fn partial_cmp(&self, rhs: &$inner) -> Option<std::cmp::Ordering> {
                Some(self.as_int().cmp(rhs))
            }
        }
    };
}
restricted_int! {
    /// A 24-bit integer type, used for tempo in microseconds per quarter note.
    ///
    /// Wraps the `u32` type and ensures that the top 8 bits are always zero.
    u24: u32 => 24
}
restricted_int! {
    /// A 15-bit integer type, used for the ticks per quarter note of PPQ sequences.
    ///
    /// Wraps the `u16` type and ensures that the top bit is always zero.
    u15: u16 => 15
}
restricted_int! {
    /// A 14-bit integer type, used for pitch bend and song position values.
    ///
    /// Wraps the `u16` type and ensures that the top two bits are always zero.
    u14: u16 => 14
}
restricted_int! {
    /// A 7-bit integer type, the range of a MIDI data byte.
    ///
    /// Wraps the `u8` type and ensures that the top bit is always zero.
    u7: u8 => 7
}
restricted_int! {
    /// A 4-bit integer type, the range of a MIDI channel.
    ///
    /// Wraps the `u8` type and ensures that the top 4 bits are always zero.
    u4: u8 => 4
}

impl IntRead for u24 {
    fn read(raw: &mut &[u8]) -> StdResult<u24, &'static ErrorKind> {
        let bytes = raw
            .split_checked(3)
            .ok_or(err_truncated!("failed to read u24 bytes"))?;
        //Value is guaranteed to be 24 bits (3 bytes)
        Ok(u24::new(
            bytes.iter().fold(0, |acc, byte| acc << 8 | *byte as u32),
        ))
    }
}

/// Most bytes a 32-bit variable-length quantity can take.
const VLQ_MAX_BYTES: usize = 5;

/// Encode a value as a variable-length quantity.
///
/// The output is minimal: leading zero groups are skipped, so `0` encodes as a single zero byte.
pub fn encode_vlq(value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(vlq_len(value));
    push_vlq(value, &mut out);
    out
}

/// The amount of bytes `value` takes when encoded as a variable-length quantity.
pub fn vlq_len(value: u32) -> usize {
    let mut len = 1;
    let mut rest = value >> 7;
    while rest != 0 {
        len += 1;
        rest >>= 7;
    }
    len
}

/// Write a value as a variable-length quantity into an arbitrary writer.
pub fn write_vlq<W: io::Write>(value: u32, out: &mut W) -> io::Result<()> {
    let mut buf = [0; VLQ_MAX_BYTES];
    let len = vlq_len(value);
    for (i, byte) in buf[..len].iter_mut().enumerate() {
        let shift = (len - 1 - i) * 7;
        *byte = ((value >> shift) & 0x7F) as u8;
        if i + 1 < len {
            *byte |= 0x80;
        }
    }
    out.write_all(&buf[..len])
}

pub(crate) fn push_vlq(value: u32, out: &mut Vec<u8>) {
    //Writing into a `Vec` cannot fail
    let _ = write_vlq(value, out);
}

/// Decode a variable-length quantity starting at `offset`.
///
/// Returns the decoded value along with the amount of bytes consumed.
///
/// Fails with `TruncatedData` if the buffer ends before a byte with the top bit clear is found,
/// and with `MalformedMessage` if the value does not fit in 32 bits.
pub fn decode_vlq(bytes: &[u8], offset: usize) -> Result<(u32, usize)> {
    let mut raw = bytes
        .get(offset..)
        .ok_or(err_truncated!("varlen offset beyond the end of the buffer"))?;
    let before = raw.len();
    let value = read_vlq(&mut raw)?;
    Ok((value, before - raw.len()))
}

/// Reads a variable-length quantity, advancing the slice.
pub(crate) fn read_vlq(raw: &mut &[u8]) -> StdResult<u32, &'static ErrorKind> {
    let mut int: u32 = 0;
    for _ in 0..VLQ_MAX_BYTES {
        let byte = raw
            .split_checked(1)
            .ok_or(err_truncated!("unexpected eof while reading varlen int"))?[0];
        ensure!(
            int >> 25 == 0,
            err_malformed_msg!("varlen integer larger than 32 bits")
        );
        int = int << 7 | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            return Ok(int);
        }
    }
    Err(err_malformed_msg!("varlen integer longer than 5 bytes"))
}

/// Reads a slice represented in the input as a varlen `len` followed by `len` bytes.
///
/// Fails with `MalformedMessage` if the declared length does not fit in the remaining input.
pub(crate) fn read_varlen_slice<'a>(raw: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = read_vlq(raw).context(err_malformed_msg!("failed to read varlen slice length"))?;
    let slice = raw
        .split_checked(len as usize)
        .ok_or(err_malformed_msg!("declared length exceeds the available data"))?;
    Ok(slice)
}

/// Write a slice as its varlen length and then the raw bytes.
pub(crate) fn push_varlen_slice(slice: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let len = u32::try_from(slice.len())
        .map_err(|_| err_param!("varlen slice exceeds 32 bits"))?;
    push_vlq(len, out);
    out.extend_from_slice(slice);
    Ok(())
}
