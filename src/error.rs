/// Broad category of a store failure, decided from the HTTP status or the
/// service error code of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    NotFound,
    AccessDenied,
    RangeNotSatisfiable,
    InvalidRequest,
    Unavailable,
    /// The response covers a different range than the one requested.
    UnexpectedRange,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            code: None,
            message: message.into(),
        }
    }

    /// Build an error from whatever the store told us about a failed request.
    ///
    /// A recognised service error code takes precedence over the status.
    pub fn from_response(
        status: Option<u16>,
        code: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        let kind = code
            .and_then(kind_from_code)
            .or_else(|| status.map(kind_from_status))
            .unwrap_or(StoreErrorKind::Other);

        Self {
            kind,
            status,
            code: code.map(str::to_owned),
            message: message.into(),
        }
    }
}

fn kind_from_code(code: &str) -> Option<StoreErrorKind> {
    match code {
        "NoSuchKey" | "NoSuchBucket" | "NotFound" => Some(StoreErrorKind::NotFound),
        "AccessDenied" | "Forbidden" => Some(StoreErrorKind::AccessDenied),
        "InvalidRange" => Some(StoreErrorKind::RangeNotSatisfiable),
        _ => None,
    }
}

fn kind_from_status(status: u16) -> StoreErrorKind {
    match status {
        404 => StoreErrorKind::NotFound,
        401 | 403 => StoreErrorKind::AccessDenied,
        416 => StoreErrorKind::RangeNotSatisfiable,
        400..=499 => StoreErrorKind::InvalidRequest,
        500..=599 => StoreErrorKind::Unavailable,
        _ => StoreErrorKind::Other,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to read object body: {0}")]
    Body(String),

    #[error("Object body interrupted after {written} bytes were written: {message}")]
    Interrupted { written: u64, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download cancelled")]
    Cancelled,

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// What the coordinator should do about a failed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The body stream broke after the request succeeded; fetch the same
    /// range again.
    Transient,
    /// The requested offset lies past the end of the object.
    RangeExhausted,
    Terminal,
}

impl DownloadError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DownloadError::Body(_) => ErrorClass::Transient,
            DownloadError::Store(e) if e.kind == StoreErrorKind::RangeNotSatisfiable => {
                ErrorClass::RangeExhausted
            }
            _ => ErrorClass::Terminal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// HTTP status a gateway should answer with when a download fails.
    pub fn status_code(&self) -> u16 {
        match self {
            DownloadError::Store(e) => match e.kind {
                StoreErrorKind::NotFound => 404,
                StoreErrorKind::RangeNotSatisfiable => 416,
                _ => 500,
            },
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, DownloadError>;
