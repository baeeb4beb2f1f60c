use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("checksum mismatch for key {key}")]
    ChecksumMismatch { key: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_failures_become_serialization_errors() {
        let err: StorageError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, StorageError::Serialization(_)));
        let tampered = StorageError::ChecksumMismatch { key: "incidents".into() };
        assert_eq!(tampered.to_string(), "checksum mismatch for key incidents");
    }
}
