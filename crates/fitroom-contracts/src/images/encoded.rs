use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataUrlError {
    #[error("image data is missing the 'data:' prefix")]
    MissingPrefix,
    #[error("image data has no ',' separating header and payload")]
    MissingSeparator,
    #[error("image data is not base64 encoded")]
    NotBase64,
    #[error("image data has no media type")]
    MissingMediaType,
    #[error("image payload is not valid base64: {0}")]
    InvalidPayload(String),
    #[error("image payload is empty")]
    EmptyPayload,
}

/// Image bytes in their `data:<media-type>;base64,<payload>` transport form.
///
/// Construction always validates that the payload decodes to at least one
/// byte, so a value of this type is never partial or empty.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    media_type: String,
    payload: String,
}

impl EncodedImage {
    pub fn from_bytes(media_type: &str, bytes: &[u8]) -> Result<Self, DataUrlError> {
        let media_type = media_type.trim();
        if media_type.is_empty() {
            return Err(DataUrlError::MissingMediaType);
        }
        if bytes.is_empty() {
            return Err(DataUrlError::EmptyPayload);
        }
        Ok(Self {
            media_type: media_type.to_ascii_lowercase(),
            payload: BASE64.encode(bytes),
        })
    }

    /// Accepts a bare base64 payload plus its media type, as returned by
    /// generation APIs that ship inline image data.
    pub fn from_base64(media_type: &str, payload: &str) -> Result<Self, DataUrlError> {
        let media_type = media_type.trim();
        if media_type.is_empty() {
            return Err(DataUrlError::MissingMediaType);
        }
        let payload = payload.trim();
        let decoded = BASE64
            .decode(payload.as_bytes())
            .map_err(|err| DataUrlError::InvalidPayload(err.to_string()))?;
        if decoded.is_empty() {
            return Err(DataUrlError::EmptyPayload);
        }
        Ok(Self {
            media_type: media_type.to_ascii_lowercase(),
            payload: payload.to_string(),
        })
    }

    /// Parses the data-URL form, splitting at the first comma.
    pub fn parse(raw: &str) -> Result<Self, DataUrlError> {
        let trimmed = raw.trim();
        let rest = trimmed
            .strip_prefix("data:")
            .ok_or(DataUrlError::MissingPrefix)?;
        let Some((header, payload)) = rest.split_once(',') else {
            return Err(DataUrlError::MissingSeparator);
        };
        let media_type = header
            .strip_suffix(";base64")
            .ok_or(DataUrlError::NotBase64)?;
        Self::from_base64(media_type, payload)
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// The base64 payload without the data-URL header.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, DataUrlError> {
        BASE64
            .decode(self.payload.as_bytes())
            .map_err(|err| DataUrlError::InvalidPayload(err.to_string()))
    }

    /// Size of the decoded bytes, computed from the payload length.
    pub fn decoded_len(&self) -> usize {
        let padding = self
            .payload
            .bytes()
            .rev()
            .take_while(|b| *b == b'=')
            .count();
        (self.payload.len() / 4) * 3 - padding.min(2)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.payload)
    }
}

impl fmt::Display for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.media_type, self.payload)
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("media_type", &self.media_type)
            .field("payload_chars", &self.payload.len())
            .finish()
    }
}

impl FromStr for EncodedImage {
    type Err = DataUrlError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}
