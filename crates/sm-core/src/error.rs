use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmError {
    #[error("invalid recovery phrase: {0}")]
    InvalidPhrase(String),

    #[error("invalid share token: {0}")]
    InvalidToken(String),

    #[error("decryption failed: {0}")]
    DecryptFailed(String),

    #[error("signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("blob too large: {size} bytes exceeds cap of {cap}")]
    BlobTooLarge { size: usize, cap: usize },

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("all gateways failed: {0}")]
    GatewayError(String),

    #[error("pagination limit exceeded after {0} pages")]
    PaginationBlown(usize),

    #[error("store corruption: {0}")]
    StoreCorruption(String),

    #[error("not initialized: {0}")]
    NotInitialized(String),

    #[error("share already imported: {0}")]
    DuplicateImport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("upload error: {0}")]
    Upload(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type SmResult<T> = Result<T, SmError>;
