//! State log record format.
//!
//! Every record is framed as `{kind:2}{length:4}{payload}{previous_offset:8}`
//! (little endian). `previous_offset` holds the record's own start offset, so
//! the final 8 bytes of the log always point at the start of the last record
//! and the log can be walked backwards.

use crate::core::Block;
use crate::error::{ChainError, Result};
use crate::utils::{deserialize, serialize, Digest, PublicKey};
use serde::Serialize;

pub const RECORD_HEADER_LEN: usize = 6;
pub const RECORD_TRAILER_LEN: usize = 8;
/// Anything bigger is treated as a torn or garbage header.
pub const MAX_RECORD_PAYLOAD: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RecordKind {
    DefineName = 1,
    UpdateName = 2,
    TransferLog = 3,
    StartTransaction = 4,
    EndBlock = 5,
}

impl TryFrom<u16> for RecordKind {
    type Error = ChainError;

    fn try_from(value: u16) -> Result<RecordKind> {
        match value {
            1 => Ok(RecordKind::DefineName),
            2 => Ok(RecordKind::UpdateName),
            3 => Ok(RecordKind::TransferLog),
            4 => Ok(RecordKind::StartTransaction),
            5 => Ok(RecordKind::EndBlock),
            other => Err(ChainError::Corruption(format!("Unknown record kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, bincode::Encode, bincode::Decode)]
pub struct DefineName {
    pub name: String,
    pub key: PublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, bincode::Encode, bincode::Decode)]
pub struct UpdateName {
    pub name_record_offset: u64,
    pub key: PublicKey,
    pub last_update_offset: u64,
}

/// One balance change. `type_idx`, `from_idx` and `to_idx` are offsets of
/// the `DefineName` records for the stock and the two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, bincode::Encode, bincode::Decode)]
pub struct TransferLog {
    pub amount: u64,
    pub type_idx: u64,
    pub from_idx: u64,
    pub to_idx: u64,
    pub new_from_balance: u64,
    pub new_to_balance: u64,
    pub last_from_offset: Option<u64>,
    pub last_to_offset: Option<u64>,
    pub owning_transaction_offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, bincode::Encode, bincode::Decode)]
pub struct StartTransaction {
    pub trx_digest: Digest,
    pub utc_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, bincode::Encode, bincode::Decode)]
pub struct EndBlock {
    pub block: Block,
    pub generator: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum StateRecord {
    DefineName(DefineName),
    UpdateName(UpdateName),
    TransferLog(TransferLog),
    StartTransaction(StartTransaction),
    EndBlock(EndBlock),
}

impl StateRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            StateRecord::DefineName(_) => RecordKind::DefineName,
            StateRecord::UpdateName(_) => RecordKind::UpdateName,
            StateRecord::TransferLog(_) => RecordKind::TransferLog,
            StateRecord::StartTransaction(_) => RecordKind::StartTransaction,
            StateRecord::EndBlock(_) => RecordKind::EndBlock,
        }
    }

    pub fn to_raw(&self, previous_offset: u64) -> Result<RawRecord> {
        let payload = match self {
            StateRecord::DefineName(r) => serialize(r)?,
            StateRecord::UpdateName(r) => serialize(r)?,
            StateRecord::TransferLog(r) => serialize(r)?,
            StateRecord::StartTransaction(r) => serialize(r)?,
            StateRecord::EndBlock(r) => serialize(r)?,
        };
        Ok(RawRecord {
            kind: self.kind() as u16,
            payload,
            previous_offset,
        })
    }

    pub fn from_raw(raw: &RawRecord) -> Result<StateRecord> {
        let record = match RecordKind::try_from(raw.kind)? {
            RecordKind::DefineName => StateRecord::DefineName(deserialize(&raw.payload)?),
            RecordKind::UpdateName => StateRecord::UpdateName(deserialize(&raw.payload)?),
            RecordKind::TransferLog => StateRecord::TransferLog(deserialize(&raw.payload)?),
            RecordKind::StartTransaction => {
                StateRecord::StartTransaction(deserialize(&raw.payload)?)
            }
            RecordKind::EndBlock => StateRecord::EndBlock(deserialize(&raw.payload)?),
        };
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub kind: u16,
    pub payload: Vec<u8>,
    pub previous_offset: u64,
}

impl RawRecord {
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.payload.len() + RECORD_TRAILER_LEN
    }

    /// Fails for payloads that `parse_header` would refuse to read back.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.payload.len() > MAX_RECORD_PAYLOAD {
            return Err(ChainError::Transaction(format!(
                "Record payload of {} bytes exceeds the {MAX_RECORD_PAYLOAD} byte limit",
                self.payload.len()
            )));
        }
        let len = self.payload.len() as u32;
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.previous_offset.to_le_bytes());
        Ok(out)
    }

    /// Splits a header into `(kind, payload_len)`.
    pub fn parse_header(header: &[u8; RECORD_HEADER_LEN]) -> Result<(u16, usize)> {
        let kind = u16::from_le_bytes([header[0], header[1]]);
        let len = u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
        RecordKind::try_from(kind)?;
        if len > MAX_RECORD_PAYLOAD {
            return Err(ChainError::Corruption(format!(
                "Record payload length {len} exceeds limit"
            )));
        }
        Ok((kind, len))
    }

    /// Parses a record that starts at the beginning of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<RawRecord> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(ChainError::Corruption("Truncated record header".to_string()));
        }
        let mut header = [0u8; RECORD_HEADER_LEN];
        header.copy_from_slice(&bytes[..RECORD_HEADER_LEN]);
        let (kind, len) = Self::parse_header(&header)?;

        let end = RECORD_HEADER_LEN + len + RECORD_TRAILER_LEN;
        if bytes.len() < end {
            return Err(ChainError::Corruption("Truncated record body".to_string()));
        }
        let payload = bytes[RECORD_HEADER_LEN..RECORD_HEADER_LEN + len].to_vec();
        let mut trailer = [0u8; RECORD_TRAILER_LEN];
        trailer.copy_from_slice(&bytes[end - RECORD_TRAILER_LEN..end]);
        Ok(RawRecord {
            kind,
            payload,
            previous_offset: u64::from_le_bytes(trailer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::hash;

    fn samples() -> Vec<StateRecord> {
        vec![
            StateRecord::DefineName(DefineName {
                name: "alice".to_string(),
                key: PublicKey(vec![1, 2, 3]),
            }),
            StateRecord::UpdateName(UpdateName {
                name_record_offset: 0,
                key: PublicKey(vec![4, 5]),
                last_update_offset: 40,
            }),
            StateRecord::TransferLog(TransferLog {
                amount: 100,
                type_idx: 0,
                from_idx: 0,
                to_idx: 77,
                new_from_balance: u64::MAX - 100,
                new_to_balance: 100,
                last_from_offset: Some(120),
                last_to_offset: None,
                owning_transaction_offset: Some(90),
            }),
            StateRecord::StartTransaction(StartTransaction {
                trx_digest: hash(b"trx"),
                utc_time: 1_700_000_000_000,
            }),
            StateRecord::EndBlock(EndBlock {
                block: Block::new(hash(b"prev"), 1_700_000_000, hash(b"state")),
                generator: "miner".to_string(),
            }),
        ]
    }

    #[test]
    fn test_record_round_trip() {
        for (offset, record) in samples().into_iter().enumerate() {
            let raw = record.to_raw(offset as u64 * 10).unwrap();
            let bytes = raw.to_bytes().unwrap();
            assert_eq!(bytes.len(), raw.encoded_len());

            let parsed = RawRecord::from_bytes(&bytes).unwrap();
            assert_eq!(parsed, raw);
            assert_eq!(StateRecord::from_raw(&parsed).unwrap(), record);
        }
    }

    #[test]
    fn test_trailer_holds_previous_offset() {
        let raw = samples()[0].to_raw(4096).unwrap();
        let bytes = raw.to_bytes().unwrap();
        let tail: [u8; 8] = bytes[bytes.len() - 8..].try_into().unwrap();
        assert_eq!(u64::from_le_bytes(tail), 4096);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let bytes = samples()[2].to_raw(0).unwrap().to_bytes().unwrap();
        assert!(RawRecord::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(RawRecord::from_bytes(&bytes[..3]).is_err());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut bytes = samples()[0].to_raw(0).unwrap().to_bytes().unwrap();
        bytes[0] = 9;
        assert!(matches!(
            RawRecord::from_bytes(&bytes),
            Err(ChainError::Corruption(_))
        ));
    }

    #[test]
    fn test_oversized_payload_is_not_written() {
        let raw = RawRecord {
            kind: RecordKind::DefineName as u16,
            payload: vec![0; MAX_RECORD_PAYLOAD + 1],
            previous_offset: 0,
        };
        assert!(matches!(raw.to_bytes(), Err(ChainError::Transaction(_))));

        let at_limit = RawRecord {
            payload: vec![0; MAX_RECORD_PAYLOAD],
            ..raw
        };
        let bytes = at_limit.to_bytes().unwrap();
        assert_eq!(RawRecord::from_bytes(&bytes).unwrap().payload.len(), MAX_RECORD_PAYLOAD);
    }
}
