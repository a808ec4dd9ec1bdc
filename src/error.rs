use thiserror::Error;

/// Errors raised while fetching an original image from a source.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The identifier does not name an existing image
    #[error("Source not found: {0}")]
    NotFound(String),

    /// The origin could not be read (I/O, network, bad upstream status)
    #[error("Source fetch failed: {0}")]
    Fetch(String),

    /// The fetched bytes are not in a recognized image format
    #[error("Unknown image format for source {0}")]
    UnknownFormat(String),

    /// The identifier is malformed (absolute path, parent traversal, empty)
    #[error("Invalid source identifier: {0}")]
    InvalidIdentifier(String),
}

/// Errors raised by a cache backing store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Local filesystem failure
    #[error("Store I/O error: {0}")]
    Io(String),

    /// Network or connection failure talking to a remote store
    #[error("Store connection error: {0}")]
    Connection(String),

    /// The remote store answered with something unexpected
    #[error("Store protocol error: {0}")]
    Protocol(String),

    /// A stored entry could not be deserialized
    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Errors raised while transforming an image.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// A parameter has the wrong type or an out-of-range value
    #[error("Invalid parameter {param}: {message}")]
    InvalidParam { param: String, message: String },

    /// The image bytes could not be decoded
    #[error("Failed to decode image: {message}")]
    Decode { message: String },

    /// The processed image could not be encoded
    #[error("Failed to encode image: {message}")]
    Encode { message: String },

    /// The requested format cannot be produced
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The external compression tool could not be run or failed
    #[error("External tool failed: {0}")]
    ExternalTool(String),
}

impl ProcessError {
    /// Shorthand for an invalid parameter error.
    pub fn invalid_param(param: impl Into<String>, message: impl Into<String>) -> Self {
        ProcessError::InvalidParam {
            param: param.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by a node of the serving chain.
///
/// This is the error every chain node returns and the one the HTTP layer
/// turns into a response.
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// The requested original does not exist
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// The original could not be fetched
    #[error("Source error: {0}")]
    Source(String),

    /// A request parameter is invalid
    #[error("Invalid parameter {param}: {message}")]
    InvalidParam { param: String, message: String },

    /// Decoding, transforming or encoding failed
    #[error("Processing error: {0}")]
    Processing(String),

    /// The external compression tool failed
    #[error("External tool error: {0}")]
    ExternalTool(String),

    /// A local cache store failed
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    /// Anything else (closed limiter, panicked task)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SourceError> for ServerError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound(id) => ServerError::SourceNotFound(id),
            SourceError::InvalidIdentifier(id) => ServerError::InvalidParam {
                param: "source".to_string(),
                message: format!("invalid identifier {:?}", id),
            },
            other => ServerError::Source(other.to_string()),
        }
    }
}

impl From<ProcessError> for ServerError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::InvalidParam { param, message } => {
                ServerError::InvalidParam { param, message }
            }
            ProcessError::ExternalTool(message) => ServerError::ExternalTool(message),
            other => ServerError::Processing(other.to_string()),
        }
    }
}
