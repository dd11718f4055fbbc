//! On-disk pipeline-cache blob: a version byte, then a sequence of
//! (descriptor-hash, backend binary) records. A version mismatch drops
//! the whole blob rather than attempting a partial read.

const CURRENT_VERSION: u8 = 1;

pub struct CachedPipelineRecord {
    pub descriptor_hash: u64,
    pub backend_blob: Vec<u8>,
}

pub fn encode(records: &[CachedPipelineRecord]) -> Vec<u8> {
    let mut out = vec![CURRENT_VERSION];
    for record in records {
        out.extend_from_slice(&record.descriptor_hash.to_le_bytes());
        out.extend_from_slice(&(record.backend_blob.len() as u32).to_le_bytes());
        out.extend_from_slice(&record.backend_blob);
    }
    out
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("pipeline cache blob is empty")]
    Empty,
    #[error("pipeline cache blob version {found} does not match {expected}, regenerating")]
    VersionMismatch { found: u8, expected: u8 },
    #[error("pipeline cache blob is truncated")]
    Truncated,
}

pub fn decode(bytes: &[u8]) -> Result<Vec<CachedPipelineRecord>, DecodeError> {
    let (&version, mut rest) = bytes.split_first().ok_or(DecodeError::Empty)?;
    if version != CURRENT_VERSION {
        return Err(DecodeError::VersionMismatch {
            found: version,
            expected: CURRENT_VERSION,
        });
    }
    let mut records = Vec::new();
    while !rest.is_empty() {
        if rest.len() < 12 {
            return Err(DecodeError::Truncated);
        }
        let descriptor_hash = u64::from_le_bytes(rest[0..8].try_into().unwrap());
        let len = u32::from_le_bytes(rest[8..12].try_into().unwrap()) as usize;
        rest = &rest[12..];
        if rest.len() < len {
            return Err(DecodeError::Truncated);
        }
        let backend_blob = rest[..len].to_vec();
        rest = &rest[len..];
        records.push(CachedPipelineRecord {
            descriptor_hash,
            backend_blob,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let records = vec![
            CachedPipelineRecord {
                descriptor_hash: 0xdead_beef,
                backend_blob: vec![1, 2, 3],
            },
            CachedPipelineRecord {
                descriptor_hash: 0xfeed_face,
                backend_blob: vec![],
            },
        ];
        let bytes = encode(&records);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].descriptor_hash, 0xdead_beef);
        assert_eq!(decoded[1].backend_blob, Vec::<u8>::new());
    }

    #[test]
    fn version_mismatch_is_reported_not_panicked() {
        let mut bytes = encode(&[]);
        bytes[0] = CURRENT_VERSION + 1;
        assert!(matches!(decode(&bytes), Err(DecodeError::VersionMismatch { .. })));
    }
}
