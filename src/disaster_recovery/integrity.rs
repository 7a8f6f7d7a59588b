//! Snapshot integrity checks
//!
//! Checksums are always taken over the serialized plaintext snapshot, so a
//! backup verifies the same way whether or not it was stored encrypted.

use super::*;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of `bytes`
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compare `bytes` against an expected hex checksum
pub fn verify_checksum(bytes: &[u8], expected: &str) -> bool {
    !expected.is_empty() && compute_checksum(bytes).eq_ignore_ascii_case(expected.trim())
}

/// Serialize a snapshot and return the bytes with their checksum
pub fn serialize_snapshot(snapshot: &SnapshotDocument) -> BackupResult<(Vec<u8>, String)> {
    let bytes = serde_json::to_vec(snapshot)?;
    let checksum = compute_checksum(&bytes);
    Ok((bytes, checksum))
}

/// Check that a decoded document has the shape of a snapshot
///
/// Domain payloads may be any JSON value. Unknown domain names and an empty
/// domain map are rejected.
pub fn validate_snapshot_structure(document: &Value) -> BackupResult<()> {
    let object = document.as_object().ok_or_else(|| BackupError::Integrity {
        message: "Snapshot is not a JSON object".to_string(),
    })?;

    for field in ["timestamp", "schema_version", "app_version", "domains"] {
        if !object.contains_key(field) {
            return Err(BackupError::Integrity {
                message: format!("Snapshot is missing required field '{}'", field),
            });
        }
    }

    let domains = object
        .get("domains")
        .and_then(Value::as_object)
        .ok_or_else(|| BackupError::Integrity {
            message: "Snapshot 'domains' is not an object".to_string(),
        })?;

    let mut issues = Vec::new();
    for name in domains.keys() {
        if DataDomain::from_name(name).is_none() {
            issues.push(format!("unknown domain '{}'", name));
        }
    }

    if domains.is_empty() {
        issues.push("snapshot contains no domains".to_string());
    }

    if !issues.is_empty() {
        return Err(BackupError::Integrity {
            message: issues.join("; "),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> SnapshotDocument {
        let mut snapshot = SnapshotDocument::new();
        snapshot.domains.insert(
            "user_data".to_string(),
            serde_json::json!({ "name": "Sam", "preferred_voice": "en-GB" }),
        );
        snapshot.domains.insert(
            "communication_data".to_string(),
            serde_json::json!({ "boards": [{ "id": 1, "tiles": ["yes", "no"] }] }),
        );
        snapshot
    }

    #[test]
    fn test_checksum_is_stable_for_identical_snapshots() {
        let snapshot = sample_snapshot();
        let (bytes, checksum) = serialize_snapshot(&snapshot).unwrap();
        let (_, again) = serialize_snapshot(&snapshot.clone()).unwrap();

        assert_eq!(checksum.len(), 64);
        assert_eq!(checksum, again);
        assert!(verify_checksum(&bytes, &checksum));
        assert!(verify_checksum(&bytes, &checksum.to_uppercase()));
    }

    #[test]
    fn test_checksum_survives_reload() {
        let mut snapshot = sample_snapshot();
        let accuracy: Vec<f64> = (0..2_000)
            .map(|i| i as f64 * 0.049_993_1 + (i as f64).sqrt() / 7.0)
            .chain([12.874560591713891, 0.1 + 0.2, 1.0 / 3.0])
            .collect();
        snapshot.domains.insert(
            "progress_data".to_string(),
            serde_json::json!({ "accuracy": accuracy, "streak": 12 }),
        );

        let (bytes, checksum) = serialize_snapshot(&snapshot).unwrap();
        let reloaded: SnapshotDocument = serde_json::from_slice(&bytes).unwrap();
        let (again, reloaded_checksum) = serialize_snapshot(&reloaded).unwrap();

        assert_eq!(reloaded, snapshot);
        assert_eq!(again, bytes);
        assert_eq!(reloaded_checksum, checksum);
    }

    #[test]
    fn test_checksum_detects_modification() {
        let (mut bytes, checksum) = serialize_snapshot(&sample_snapshot()).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x01;
        assert!(!verify_checksum(&bytes, &checksum));
        assert!(!verify_checksum(b"anything", ""));
    }

    #[test]
    fn test_structure_validation() {
        let document = serde_json::to_value(sample_snapshot()).unwrap();
        assert!(validate_snapshot_structure(&document).is_ok());

        let missing = serde_json::json!({ "timestamp": "x", "domains": {} });
        assert!(validate_snapshot_structure(&missing).is_err());

        let mut unknown = document.clone();
        unknown["domains"]["mystery"] = serde_json::json!({});
        let err = validate_snapshot_structure(&unknown).unwrap_err();
        assert!(err.to_string().contains("mystery"));

        assert!(validate_snapshot_structure(&serde_json::json!([1, 2])).is_err());

        let mut scalars = document.clone();
        scalars["domains"]["user_data"] = serde_json::json!("plain string profile");
        scalars["domains"]["settings_data"] = serde_json::json!(42);
        assert!(validate_snapshot_structure(&scalars).is_ok());

        let mut empty = document;
        empty["domains"] = serde_json::json!({});
        assert!(validate_snapshot_structure(&empty).is_err());
    }
}
