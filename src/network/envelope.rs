//! Peer network framing.
//!
//! ```text
//! magic u32 ‖ command [u8; 12] ‖ length u32 ‖ checksum [u8; 4] ‖ payload
//! ```

use crate::error::{BitmessageError, Result};
use crate::utils::{sha512_digest, ByteReader};

pub const MAGIC: u32 = 0xE9BE_B4D9;
pub const COMMAND_LEN: usize = 12;
pub const CHECKSUM_LEN: usize = 4;
pub const HEADER_LEN: usize = 4 + COMMAND_LEN + 4 + CHECKSUM_LEN;
pub const OBJECT_COMMAND: &str = "object";

pub fn envelope_checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut checksum = [0u8; CHECKSUM_LEN];
    checksum.copy_from_slice(&sha512_digest(payload)[..CHECKSUM_LEN]);
    checksum
}

pub fn wrap(command: &str, payload: &[u8]) -> Result<Vec<u8>> {
    if command.len() > COMMAND_LEN || !command.is_ascii() {
        return Err(BitmessageError::Format(format!(
            "Command {command:?} does not fit the envelope"
        )));
    }
    let length = u32::try_from(payload.len()).map_err(|_| {
        BitmessageError::Format(format!("Payload of {} bytes is too large", payload.len()))
    })?;
    let mut command_field = [0u8; COMMAND_LEN];
    command_field[..command.len()].copy_from_slice(command.as_bytes());

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend(MAGIC.to_be_bytes());
    out.extend(command_field);
    out.extend(length.to_be_bytes());
    out.extend(envelope_checksum(payload));
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn wrap_object(object_bytes: &[u8]) -> Result<Vec<u8>> {
    wrap(OBJECT_COMMAND, object_bytes)
}

/// Returns the command and payload of one framed message. Bytes after the
/// declared payload length are rejected.
pub fn unwrap(data: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut reader = ByteReader::new(data);
    let magic = reader.read_u32()?;
    if magic != MAGIC {
        return Err(BitmessageError::Format(format!("Bad magic {magic:#010x}")));
    }
    let command_field = reader.read_array::<COMMAND_LEN>()?;
    let end = command_field
        .iter()
        .position(|b| *b == 0)
        .unwrap_or(COMMAND_LEN);
    if command_field[end..].iter().any(|b| *b != 0) {
        return Err(BitmessageError::Format(
            "Command field is not zero padded".to_string(),
        ));
    }
    let command = std::str::from_utf8(&command_field[..end])
        .map_err(|_| BitmessageError::Format("Command is not ASCII".to_string()))?
        .to_string();
    let length = reader.read_u32()? as usize;
    let checksum = reader.read_array::<CHECKSUM_LEN>()?;
    let payload = reader.read_bytes(length)?;
    if !reader.is_empty() {
        return Err(BitmessageError::Format(format!(
            "{} trailing bytes after payload",
            reader.remaining()
        )));
    }
    if envelope_checksum(payload) != checksum {
        return Err(BitmessageError::InvalidChecksum);
    }
    Ok((command, payload.to_vec()))
}

/// Unwraps an `object` message.
pub fn unwrap_object(data: &[u8]) -> Result<Vec<u8>> {
    let (command, payload) = unwrap(data)?;
    if command != OBJECT_COMMAND {
        return Err(BitmessageError::Format(format!(
            "Expected object command, got {command:?}"
        )));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let framed = wrap_object(b"hello").unwrap();
        assert_eq!(&framed[..4], &[0xE9, 0xBE, 0xB4, 0xD9]);
        assert_eq!(&framed[4..16], b"object\0\0\0\0\0\0");
        assert_eq!(&framed[16..20], &[0, 0, 0, 5]);
        assert_eq!(&framed[20..24], &sha512_digest(b"hello")[..4]);
        assert_eq!(&framed[24..], b"hello");
        assert_eq!(unwrap_object(&framed).unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_corruption_detected() {
        let mut framed = wrap_object(&[7u8; 40]).unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 1;
        assert_eq!(unwrap(&framed), Err(BitmessageError::InvalidChecksum));

        let mut bad_magic = wrap_object(&[7u8; 40]).unwrap();
        bad_magic[0] = 0;
        assert!(unwrap(&bad_magic).unwrap_err().is_format_error());

        let short = wrap_object(&[7u8; 40]).unwrap();
        assert!(matches!(
            unwrap(&short[..short.len() - 1]),
            Err(BitmessageError::TruncatedObject { .. })
        ));
    }

    #[test]
    fn test_command_rules() {
        assert!(wrap("thirteen-char", b"").is_err());
        let framed = wrap("getdata", b"").unwrap();
        assert_eq!(unwrap(&framed).unwrap(), ("getdata".to_string(), Vec::new()));
        assert!(unwrap_object(&framed).is_err());
    }
}
