// Error taxonomy for feed ingestion and queries.

/// Failures surfaced by the feed cache. Queries downgrade these to a
/// well-formed "Fetch error" response at the HTTP boundary; they are only
/// propagated when no snapshot has ever loaded.
#[derive(thiserror::Error, Debug)]
pub enum TransitError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("missing data: {0}")]
    PartialData(String),
}

impl From<reqwest::Error> for TransitError {
    fn from(e: reqwest::Error) -> Self {
        TransitError::Transport(e.to_string())
    }
}

impl From<zip::result::ZipError> for TransitError {
    fn from(e: zip::result::ZipError) -> Self {
        TransitError::Decode(format!("zip: {}", e))
    }
}

impl From<prost::DecodeError> for TransitError {
    fn from(e: prost::DecodeError) -> Self {
        TransitError::Decode(format!("protobuf: {}", e))
    }
}

impl From<csv::Error> for TransitError {
    fn from(e: csv::Error) -> Self {
        TransitError::Decode(format!("csv: {}", e))
    }
}

impl From<std::io::Error> for TransitError {
    fn from(e: std::io::Error) -> Self {
        TransitError::Transport(format!("io: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, TransitError>;
