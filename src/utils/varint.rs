//! Protocol variable length integers.
//!
//! ```text
//! value < 0xfd          -> 1 byte
//! value <= 0xffff       -> 0xfd + u16 BE
//! value <= 0xffffffff   -> 0xfe + u32 BE
//! otherwise             -> 0xff + u64 BE
//! ```

use crate::error::{BitmessageError, Result};

pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut out = vec![0xfd];
        out.extend((value as u16).to_be_bytes());
        out
    } else if value <= 0xffff_ffff {
        let mut out = vec![0xfe];
        out.extend((value as u32).to_be_bytes());
        out
    } else {
        let mut out = vec![0xff];
        out.extend(value.to_be_bytes());
        out
    }
}

/// Decodes a varint from the start of `data`, returning the value and the
/// number of bytes consumed. Non-minimal encodings are rejected.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let first = *data
        .first()
        .ok_or_else(|| BitmessageError::truncated(1, 0))?;
    let width = match first {
        0xfd => 2,
        0xfe => 4,
        0xff => 8,
        _ => return Ok((first as u64, 1)),
    };
    if data.len() < 1 + width {
        return Err(BitmessageError::truncated(1 + width, data.len()));
    }
    let mut buf = [0u8; 8];
    buf[8 - width..].copy_from_slice(&data[1..1 + width]);
    let value = u64::from_be_bytes(buf);

    let minimum = match width {
        2 => 0xfd,
        4 => 0x1_0000,
        _ => 0x1_0000_0000,
    };
    if value < minimum {
        return Err(BitmessageError::Format(format!(
            "Non-minimal varint encoding of {value}"
        )));
    }
    Ok((value, 1 + width))
}
