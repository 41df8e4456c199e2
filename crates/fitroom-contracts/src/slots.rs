use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the two required inputs of a fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// The person photo.
    Subject,
    /// The clothing photo.
    Garment,
}

impl SlotKind {
    pub const ALL: [SlotKind; 2] = [SlotKind::Subject, SlotKind::Garment];

    pub fn as_str(self) -> &'static str {
        match self {
            SlotKind::Subject => "subject",
            SlotKind::Garment => "garment",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SlotKind::Subject => "your photo",
            SlotKind::Garment => "the garment photo",
        }
    }
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "subject" | "person" | "me" => Ok(SlotKind::Subject),
            "garment" | "cloth" | "clothes" | "clothing" => Ok(SlotKind::Garment),
            other => Err(format!(
                "unknown slot '{other}' (expected subject or garment)"
            )),
        }
    }
}
