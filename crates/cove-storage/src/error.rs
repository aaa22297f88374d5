use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to replace lane file: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("unsupported lane file format version {found}, expected {supported}")]
    UnsupportedFormat { found: u32, supported: u32 },
    #[error("data error: {0}")]
    Data(String),
}
