use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One megabyte, as used by every size limit in the pipeline.
pub const MB: u64 = 1024 * 1024;

/// Original files larger than this are rejected before any decoding.
pub const MAX_ORIGINAL_BYTES: u64 = 5 * MB;

pub const DEFAULT_TARGET_MAX_BYTES: u64 = MB;
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_MAX_ITERATIONS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Jpeg,
    Png,
}

impl OutputFormat {
    pub fn media_type(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
        }
    }
}

/// Target shape of a compressed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionPolicy {
    pub target_max_bytes: u64,
    pub max_dimension: u32,
    pub output: OutputFormat,
    /// Run the re-encode loop on a background thread.
    pub allow_worker: bool,
    pub max_iterations: u32,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            target_max_bytes: DEFAULT_TARGET_MAX_BYTES,
            max_dimension: DEFAULT_MAX_DIMENSION,
            output: OutputFormat::Jpeg,
            allow_worker: true,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// What ingestion does when the compression step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Encode the untouched original and tell the user.
    #[default]
    UseOriginal,
    /// Surface the failure and leave the slot empty.
    Reject,
}

impl FallbackPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackPolicy::UseOriginal => "original",
            FallbackPolicy::Reject => "reject",
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "original" | "use_original" | "fallback" => Ok(FallbackPolicy::UseOriginal),
            "reject" | "error" => Ok(FallbackPolicy::Reject),
            other => Err(format!(
                "unknown compression fallback '{other}' (expected original or reject)"
            )),
        }
    }
}

/// Human-readable megabytes, e.g. `5 MB` or `1.5 MB`.
pub fn format_mb(bytes: u64) -> String {
    let value = bytes as f64 / MB as f64;
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{} MB", rounded as u64)
    } else {
        format!("{rounded:.1} MB")
    }
}
