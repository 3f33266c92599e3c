//! Error types shared by both tiers

use thiserror::Error;

/// Errors raised by core building blocks
#[derive(Debug, Error)]
pub enum CoreError {
    /// A job UUID could not be parsed
    #[error("Invalid job UUID: {0}")]
    InvalidJobUuid(String),

    /// The product setup file could not be read
    #[error("Failed to read product setup {path}: {source}")]
    ProductSetupIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The product setup file is not valid JSON or has the wrong shape
    #[error("Invalid product setup: {0}")]
    InvalidProductSetup(#[from] serde_json::Error),

    /// A supported data types value could not be parsed
    #[error("Unsupported data type: {0}")]
    UnsupportedDataType(String),
}

/// Parses a job UUID given as text
///
/// Used by every operation that receives job identifiers from outside.
pub fn parse_job_uuid(value: &str) -> Result<uuid::Uuid, CoreError> {
    uuid::Uuid::parse_str(value.trim()).map_err(|_| CoreError::InvalidJobUuid(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_uuid() {
        let id = uuid::Uuid::new_v4();
        assert_eq!(parse_job_uuid(&id.to_string()).unwrap(), id);
        assert_eq!(parse_job_uuid(&format!(" {} ", id)).unwrap(), id);
    }

    #[test]
    fn test_parse_job_uuid_invalid() {
        let err = parse_job_uuid("not-a-uuid").unwrap_err();
        assert!(matches!(err, CoreError::InvalidJobUuid(ref v) if v == "not-a-uuid"));
    }
}
