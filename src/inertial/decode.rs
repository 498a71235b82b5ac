//! # Sample Decoding
//!
//! Turns raw register blocks into signed 16-bit readings. Byte order is a
//! property of each device and must match its datasheet exactly.

use crate::error::{RecorderError, Result};

/// Byte order of a 16-bit register pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// High byte at the lower register address
    Big,
    /// Low byte at the lower register address
    Little,
}

/// Decode one signed 16-bit value from two bytes
///
/// # Examples
///
/// ```
/// use mission_recorder::inertial::decode::{decode_i16, Endianness};
///
/// assert_eq!(decode_i16([0x04, 0xD2], Endianness::Big), 1234);
/// assert_eq!(decode_i16([0xD2, 0x04], Endianness::Little), 1234);
/// ```
pub fn decode_i16(bytes: [u8; 2], endianness: Endianness) -> i16 {
    match endianness {
        Endianness::Big => i16::from_be_bytes(bytes),
        Endianness::Little => i16::from_le_bytes(bytes),
    }
}

/// Decode a block of consecutive 16-bit words
///
/// # Arguments
///
/// * `block` - Raw register bytes, exactly `2 * N` long
/// * `endianness` - Byte order of every word in the block
///
/// # Errors
///
/// Returns `MalformedSample` if the block length is not `2 * N`
pub fn decode_words<const N: usize>(block: &[u8], endianness: Endianness) -> Result<[i16; N]> {
    if block.len() != 2 * N {
        return Err(RecorderError::MalformedSample(format!(
            "expected {} bytes, got {}",
            2 * N,
            block.len()
        )));
    }

    let mut words = [0i16; N];
    for (word, pair) in words.iter_mut().zip(block.chunks_exact(2)) {
        *word = decode_i16([pair[0], pair[1]], endianness);
    }
    Ok(words)
}

/// Apply a mounting sign to one axis
///
/// Saturates so that inverting `i16::MIN` yields `i16::MAX` instead of overflowing.
pub fn apply_sign(value: i16, invert: bool) -> i16 {
    if invert {
        value.saturating_neg()
    } else {
        value
    }
}
