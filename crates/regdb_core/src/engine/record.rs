//! Log record types and serialization.

use crate::error::{RegistryError, RegistryResult};
use crate::types::SequenceNumber;
use bytes::{Buf, BufMut};

/// Magic bytes identifying a log record.
pub const LOG_MAGIC: [u8; 4] = *b"RGLG";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub const HEADER_SIZE: usize = 11;

/// CRC size.
pub const CRC_SIZE: usize = 4;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Store a value under a key.
    Put = 1,
    /// Remove a key.
    Delete = 2,
    /// End of a committed batch.
    Commit = 3,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Put),
            2 => Some(Self::Delete),
            3 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Store (insert or replace) a value.
    Put {
        /// Storage key.
        key: String,
        /// New value bytes.
        value: Vec<u8>,
    },

    /// Delete a key.
    Delete {
        /// Storage key.
        key: String,
    },

    /// Commit the preceding Put/Delete records.
    Commit {
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
    },
}

/// Result of decoding one record from the front of a buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A valid record and its encoded length.
    Record(LogRecord, usize),
    /// The buffer ends inside the record.
    Incomplete,
    /// The bytes are not a valid record.
    Corrupt(String),
    /// The record was written by a newer format version.
    Unsupported(u16),
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Put { .. } => RecordType::Put,
            Self::Delete { .. } => RecordType::Delete,
            Self::Commit { .. } => RecordType::Commit,
        }
    }

    fn payload_len(&self) -> usize {
        match self {
            Self::Put { key, value } => 4 + key.len() + 4 + value.len(),
            Self::Delete { key } => 4 + key.len(),
            Self::Commit { .. } => 8,
        }
    }

    /// Appends the full record (envelope included) to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if a key, value or the payload does not fit a
    /// 32-bit length field.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> RegistryResult<()> {
        let payload_len = u32::try_from(self.payload_len())
            .map_err(|_| RegistryError::invalid_param("log record payload too large"))?;

        let start = out.len();
        out.put_slice(&LOG_MAGIC);
        out.put_u16_le(LOG_VERSION);
        out.put_u8(self.record_type().as_byte());
        out.put_u32_le(payload_len);

        // Key and value lengths are bounded by payload_len, checked above.
        match self {
            Self::Put { key, value } => {
                out.put_u32_le(key.len() as u32);
                out.put_slice(key.as_bytes());
                out.put_u32_le(value.len() as u32);
                out.put_slice(value);
            }
            Self::Delete { key } => {
                out.put_u32_le(key.len() as u32);
                out.put_slice(key.as_bytes());
            }
            Self::Commit { sequence } => out.put_u64_le(sequence.as_u64()),
        }

        let crc = compute_crc32(&out[start..]);
        out.put_u32_le(crc);
        Ok(())
    }

    /// Encodes the record into a fresh buffer.
    ///
    /// # Errors
    ///
    /// See [`LogRecord::encode_into`].
    pub fn encode(&self) -> RegistryResult<Vec<u8>> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload_len() + CRC_SIZE);
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn decode_payload(record_type: RecordType, mut payload: &[u8]) -> Result<Self, String> {
        fn take_string(payload: &mut &[u8]) -> Result<String, String> {
            let bytes = take_bytes(payload)?;
            String::from_utf8(bytes).map_err(|_| "key is not valid UTF-8".to_string())
        }

        fn take_bytes(payload: &mut &[u8]) -> Result<Vec<u8>, String> {
            if payload.remaining() < 4 {
                return Err("unexpected end of payload".into());
            }
            let len = payload.get_u32_le() as usize;
            if payload.remaining() < len {
                return Err("unexpected end of payload".into());
            }
            let bytes = payload[..len].to_vec();
            payload.advance(len);
            Ok(bytes)
        }

        let record = match record_type {
            RecordType::Put => {
                let key = take_string(&mut payload)?;
                let value = take_bytes(&mut payload)?;
                Self::Put { key, value }
            }
            RecordType::Delete => Self::Delete {
                key: take_string(&mut payload)?,
            },
            RecordType::Commit => {
                if payload.remaining() < 8 {
                    return Err("unexpected end of payload".into());
                }
                Self::Commit {
                    sequence: SequenceNumber::new(payload.get_u64_le()),
                }
            }
        };

        if payload.has_remaining() {
            return Err(format!("{} trailing payload bytes", payload.remaining()));
        }
        Ok(record)
    }

    /// Decodes the record at the front of `buf`.
    #[must_use]
    pub fn decode(buf: &[u8]) -> Decoded {
        if buf.len() < HEADER_SIZE {
            return Decoded::Incomplete;
        }

        let mut header = &buf[..HEADER_SIZE];
        let mut magic = [0u8; 4];
        header.copy_to_slice(&mut magic);
        if magic != LOG_MAGIC {
            return Decoded::Corrupt("invalid magic".into());
        }

        let version = header.get_u16_le();
        if version > LOG_VERSION {
            return Decoded::Unsupported(version);
        }

        let type_byte = header.get_u8();
        let len = header.get_u32_le() as usize;

        let total = HEADER_SIZE + len + CRC_SIZE;
        if buf.len() < total {
            return Decoded::Incomplete;
        }

        let body_end = HEADER_SIZE + len;
        let stored_crc = (&buf[body_end..total]).get_u32_le();
        let actual_crc = compute_crc32(&buf[..body_end]);
        if stored_crc != actual_crc {
            return Decoded::Corrupt(format!(
                "checksum mismatch: expected {stored_crc:08x}, got {actual_crc:08x}"
            ));
        }

        let Some(record_type) = RecordType::from_byte(type_byte) else {
            return Decoded::Corrupt(format!("unknown record type {type_byte}"));
        };

        match Self::decode_payload(record_type, &buf[HEADER_SIZE..body_end]) {
            Ok(record) => Decoded::Record(record, total),
            Err(message) => Decoded::Corrupt(message),
        }
    }
}

/// Computes the CRC32 checksum used by log records.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
