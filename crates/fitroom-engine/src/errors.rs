use fitroom_contracts::policy::format_mb;
use thiserror::Error;

/// Rejections raised before any processing of a picked file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("'{name}' is not an image (reported type {media_type})")]
    NotAnImage { name: String, media_type: String },
    #[error("'{name}' is {} which exceeds the {} upload limit", mb(.size), mb(.limit))]
    TooLarge { name: String, size: u64, limit: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompressionError {
    #[error("could not decode the image for compression: {0}")]
    Decode(String),
    #[error("could not re-encode the image: {0}")]
    Encode(String),
    #[error("compression produced an empty file")]
    EmptyOutput,
    #[error("compression finished without producing a result")]
    NoOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("could not read the file: {0}")]
    Read(String),
    #[error("reading the file produced no data")]
    Empty,
    #[error("encoding failed for an unknown reason: {0}")]
    Unknown(String),
}

/// Anything that stops a single ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("compression failed: {0}")]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("no API credential configured (set GEMINI_API_KEY or GOOGLE_API_KEY)")]
    MissingCredential,
    #[error("generation service unreachable: {0}")]
    Unreachable(String),
    #[error("generation service did not answer within {0} seconds")]
    Timeout(u64),
    #[error("generation request was cancelled")]
    Cancelled,
    #[error("generation service returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("generation service returned an unreadable response: {0}")]
    InvalidResponse(String),
    #[error("generation service returned no candidate")]
    NoCandidate,
    #[error("generation service returned no image data{}", text_suffix(.0))]
    NoImage(Option<String>),
    #[error("generation service returned an invalid image: {0}")]
    InvalidImage(String),
    #[error("{0}")]
    Other(String),
}

/// A setting read from the environment that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} must be a whole number of seconds, got '{value}'")]
    InvalidTimeout { key: &'static str, value: String },
}

fn mb(bytes: &u64) -> String {
    format_mb(*bytes)
}

fn text_suffix(text: &Option<String>) -> String {
    match text
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(value) => format!(" (model said: {value})"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error("please provide both images first (missing {missing})")]
    Incomplete { missing: String },
    #[error("a fitting is already being generated")]
    Busy,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
