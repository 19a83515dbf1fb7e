use crate::error::{BitmessageError, Result};
use crate::utils::varint::decode_varint;

/// Sequential reader over wire bytes. Every read that runs past the end
/// reports `TruncatedObject` instead of panicking.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> ByteReader<'a> {
        ByteReader { data, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(BitmessageError::truncated(count, self.remaining()));
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, used) = decode_varint(&self.data[self.position..])?;
        self.position += used;
        Ok(value)
    }

    /// Reads a varint length followed by that many bytes.
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8]> {
        let length = self.read_varint()?;
        let length = usize::try_from(length)
            .map_err(|_| BitmessageError::Format(format!("Length {length} too large")))?;
        self.read_bytes(length)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.position..];
        self.position = self.data.len();
        slice
    }
}

/// Removes `data[start..end]` and returns what is left.
pub fn remove_bytes(data: &[u8], start: usize, end: usize) -> Result<Vec<u8>> {
    if start > end || end > data.len() {
        return Err(BitmessageError::Format(format!(
            "Cannot remove range {start}..{end} from {} bytes",
            data.len()
        )));
    }
    let mut out = Vec::with_capacity(data.len() - (end - start));
    out.extend_from_slice(&data[..start]);
    out.extend_from_slice(&data[end..]);
    Ok(out)
}

/// Drops at most `limit` leading zero bytes.
pub fn strip_leading_zeros(data: &[u8], limit: usize) -> &[u8] {
    let zeros = data.iter().take(limit).take_while(|b| **b == 0).count();
    &data[zeros..]
}

/// Left-pads `data` with zeros up to `width` bytes.
pub fn pad_left(data: &[u8], width: usize) -> Result<Vec<u8>> {
    if data.len() > width {
        return Err(BitmessageError::Format(format!(
            "{} bytes do not fit in {width}",
            data.len()
        )));
    }
    let mut out = vec![0u8; width - data.len()];
    out.extend_from_slice(data);
    Ok(out)
}
