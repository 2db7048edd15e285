//! Filesystem evidence sink.
//!
//! Layout under the root directory:
//! - `<yyyy-mm-dd>/<txn>-in.jpg` and `<txn>-out.jpg` for committed events
//! - `failed/<employee>/<yyyymmddThhmmss.ffffff>.jpg` for rejected attempts

use attend_core::store::{EvidenceError, EvidenceKey, EvidenceSink};
use attend_core::types::{Direction, EvidenceRef};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub struct FsEvidenceSink {
    root: PathBuf,
}

impl FsEvidenceSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to its file path. Employee ids that could escape the
    /// root directory are rejected.
    pub fn path_for(&self, key: &EvidenceKey) -> Result<PathBuf, EvidenceError> {
        match key {
            EvidenceKey::Transaction {
                id,
                work_date,
                direction,
            } => {
                let suffix = match direction {
                    Direction::CheckIn => "in",
                    Direction::CheckOut => "out",
                };
                Ok(self
                    .root
                    .join(work_date.format("%Y-%m-%d").to_string())
                    .join(format!("{id}-{suffix}.jpg")))
            }
            EvidenceKey::Failure { employee_id, at } => {
                if !is_safe_component(employee_id) {
                    return Err(EvidenceError::InvalidKey(format!(
                        "employee id {employee_id:?} is not a valid path component"
                    )));
                }
                Ok(self
                    .root
                    .join("failed")
                    .join(employee_id)
                    .join(format!("{}.jpg", at.format("%Y%m%dT%H%M%S%.6f"))))
            }
        }
    }
}

#[async_trait]
impl EvidenceSink for FsEvidenceSink {
    async fn store(&self, key: &EvidenceKey, bytes: &[u8]) -> Result<EvidenceRef, EvidenceError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        let sha256 = hex_digest(bytes);
        tracing::debug!(
            key = %key,
            path = %path.display(),
            bytes = bytes.len(),
            sha256 = %sha256,
            "evidence stored"
        );

        Ok(EvidenceRef {
            location: path.to_string_lossy().into_owned(),
            sha256,
        })
    }
}

fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\', '\0'])
}

fn hex_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_core::types::TransactionId;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_transaction_paths_are_grouped_by_date() {
        let sink = FsEvidenceSink::new("/var/lib/attend/evidence");
        let key = EvidenceKey::Transaction {
            id: TransactionId(42),
            work_date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            direction: Direction::CheckOut,
        };
        assert_eq!(
            sink.path_for(&key).unwrap(),
            PathBuf::from("/var/lib/attend/evidence/2024-05-06/42-out.jpg")
        );
    }

    #[test]
    fn test_failure_paths_are_grouped_by_employee() {
        let sink = FsEvidenceSink::new("/evidence");
        let key = EvidenceKey::Failure {
            employee_id: "E100".into(),
            at: Utc.with_ymd_and_hms(2024, 5, 6, 9, 15, 30).unwrap(),
        };
        assert_eq!(
            sink.path_for(&key).unwrap(),
            PathBuf::from("/evidence/failed/E100/20240506T091530.000000.jpg")
        );
    }

    #[test]
    fn test_path_traversal_is_rejected() {
        let sink = FsEvidenceSink::new("/evidence");
        for bad in ["../etc", "..", "", "a/b"] {
            let key = EvidenceKey::Failure {
                employee_id: bad.into(),
                at: Utc::now(),
            };
            assert!(matches!(sink.path_for(&key), Err(EvidenceError::InvalidKey(_))), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_store_writes_bytes_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsEvidenceSink::new(dir.path());
        let key = EvidenceKey::Transaction {
            id: TransactionId(1),
            work_date: NaiveDate::from_ymd_opt(2024, 5, 6).unwrap(),
            direction: Direction::CheckIn,
        };

        let evidence = sink.store(&key, b"abc").await.unwrap();
        assert_eq!(std::fs::read(&evidence.location).unwrap(), b"abc");
        assert_eq!(
            evidence.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
