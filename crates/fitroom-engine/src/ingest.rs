use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fitroom_contracts::events::payload_digest;
use fitroom_contracts::images::{guess_media_type, is_image_media_type, EncodedImage};
use fitroom_contracts::policy::{CompressionPolicy, FallbackPolicy, MAX_ORIGINAL_BYTES};
use fitroom_contracts::slots::SlotKind;
use serde_json::json;

use crate::codec::{compress_file, encode_blob, Blob};
use crate::config::FitroomConfig;
use crate::errors::{IngestError, ValidationError};
use crate::notices::NoticeBoard;

/// A file the user picked, as the picker reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name: String,
    pub media_type: String,
    pub size: u64,
}

impl SourceFile {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let metadata = fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            ));
        }
        let media_type = guess_media_type(&path).to_string();
        Ok(Self::new(path, media_type, metadata.len()))
    }

    pub fn new(path: impl Into<PathBuf>, media_type: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            media_type: media_type.into(),
            size,
        }
    }
}

/// The file-input control behind a slot. It only reports a change when the
/// picked path differs from the one it remembers, so it must be reset before
/// the same file can be picked again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInput {
    value: Option<PathBuf>,
}

impl FileInput {
    pub fn value(&self) -> Option<&Path> {
        self.value.as_deref()
    }

    fn pick(&mut self, path: &Path) -> bool {
        if self.value.as_deref() == Some(path) {
            return false;
        }
        self.value = Some(path.to_path_buf());
        true
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Validating,
    Compressing,
    Encoding,
    Filled(EncodedImage),
}

impl SlotState {
    pub fn name(&self) -> &'static str {
        match self {
            SlotState::Empty => "empty",
            SlotState::Validating => "validating",
            SlotState::Compressing => "compressing",
            SlotState::Encoding => "encoding",
            SlotState::Filled(_) => "filled",
        }
    }

    pub fn image(&self) -> Option<&EncodedImage> {
        match self {
            SlotState::Filled(image) => Some(image),
            _ => None,
        }
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, SlotState::Filled(_))
    }
}

/// One upload slot. Every pick or clear advances `epoch`; a pipeline only
/// writes back while the epoch it started with is still current.
#[derive(Debug, Clone)]
pub struct UploadSlot {
    kind: SlotKind,
    state: SlotState,
    input: FileInput,
    epoch: u64,
    last_error: Option<String>,
}

impl UploadSlot {
    pub fn new(kind: SlotKind) -> Self {
        Self {
            kind,
            state: SlotState::Empty,
            input: FileInput::default(),
            epoch: 0,
            last_error: None,
        }
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }

    pub fn state(&self) -> &SlotState {
        &self.state
    }

    pub fn image(&self) -> Option<&EncodedImage> {
        self.state.image()
    }

    pub fn input(&self) -> &FileInput {
        &self.input
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn clear(&mut self) {
        self.epoch += 1;
        self.state = SlotState::Empty;
        self.input.reset();
        self.last_error = None;
    }

    fn start(&mut self) -> u64 {
        self.epoch += 1;
        self.state = SlotState::Validating;
        self.last_error = None;
        self.epoch
    }

    fn advance(&mut self, epoch: u64, state: SlotState) -> bool {
        if self.epoch != epoch {
            return false;
        }
        self.state = state;
        true
    }

    fn fail(&mut self, epoch: u64, message: String) -> bool {
        if self.epoch != epoch {
            return false;
        }
        self.state = SlotState::Empty;
        self.input.reset();
        self.last_error = Some(message);
        true
    }
}

pub type SlotCell = Mutex<UploadSlot>;

pub(crate) fn lock_slot(cell: &SlotCell) -> MutexGuard<'_, UploadSlot> {
    cell.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The picker was cancelled or the remembered file was picked again.
    NoChange,
    /// Not an image; the slot kept whatever it held and the input was reset.
    Ignored,
    Filled { used_fallback: bool },
    Failed(IngestError),
    /// The slot was cleared or re-picked while this attempt was running.
    Superseded,
}

/// Drives one slot from "file picked" to Filled or back to Empty.
#[derive(Debug, Clone)]
pub struct IngestionController {
    policy: CompressionPolicy,
    fallback: FallbackPolicy,
    max_original_bytes: u64,
}

impl Default for IngestionController {
    fn default() -> Self {
        Self::new(
            CompressionPolicy::default(),
            FallbackPolicy::default(),
            MAX_ORIGINAL_BYTES,
        )
    }
}

impl IngestionController {
    pub fn new(
        policy: CompressionPolicy,
        fallback: FallbackPolicy,
        max_original_bytes: u64,
    ) -> Self {
        Self {
            policy,
            fallback,
            max_original_bytes,
        }
    }

    pub fn from_config(config: &FitroomConfig) -> Self {
        Self::new(
            config.compression.clone(),
            config.fallback,
            config.max_original_bytes,
        )
    }

    pub fn policy(&self) -> &CompressionPolicy {
        &self.policy
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    pub fn validate(&self, file: &SourceFile) -> Result<(), ValidationError> {
        if !is_image_media_type(&file.media_type) {
            return Err(ValidationError::NotAnImage {
                name: file.name.clone(),
                media_type: file.media_type.clone(),
            });
        }
        if file.size > self.max_original_bytes {
            return Err(ValidationError::TooLarge {
                name: file.name.clone(),
                size: file.size,
                limit: self.max_original_bytes,
            });
        }
        Ok(())
    }

    pub fn select_file(
        &self,
        cell: &SlotCell,
        file: Option<&SourceFile>,
        board: &NoticeBoard,
    ) -> IngestOutcome {
        let Some(file) = file else {
            return IngestOutcome::NoChange;
        };
        let validation = self.validate(file);

        let (kind, epoch) = {
            let mut slot = lock_slot(cell);
            if !slot.input.pick(&file.path) {
                return IngestOutcome::NoChange;
            }
            if let Err(err @ ValidationError::NotAnImage { .. }) = &validation {
                slot.input.reset();
                let kind = slot.kind;
                drop(slot);
                board.info(Some(kind), format!("{err} and was ignored."));
                return IngestOutcome::Ignored;
            }
            (slot.kind, slot.start())
        };
        emit_slot_state(board, kind, epoch, "validating");

        if let Err(err) = validation {
            return self.fail(cell, board, kind, epoch, err.into());
        }

        if !self.transition(cell, board, kind, epoch, SlotState::Compressing) {
            return IngestOutcome::Superseded;
        }
        let compressed = compress_file(&file.path, &file.media_type, &self.policy);
        let (blob, used_fallback) = match compressed {
            Ok(compressed) => {
                board.emit(
                    "compression",
                    json!({
                        "slot": kind.as_str(),
                        "original_bytes": file.size,
                        "output_bytes": compressed.bytes.len(),
                        "media_type": compressed.media_type,
                        "width": compressed.width,
                        "height": compressed.height,
                        "iterations": compressed.iterations,
                        "kept_original": compressed.kept_original,
                        "fallback": false,
                    }),
                );
                (Blob::from(compressed), false)
            }
            Err(err) => match self.fallback {
                FallbackPolicy::UseOriginal => {
                    board.emit(
                        "compression",
                        json!({
                            "slot": kind.as_str(),
                            "original_bytes": file.size,
                            "fallback": true,
                            "error": err.to_string(),
                        }),
                    );
                    let message = format!(
                        "Could not compress '{}' ({err}); uploading the original file instead.",
                        file.name
                    );
                    board.info(Some(kind), message);
                    (
                        Blob::File {
                            path: file.path.clone(),
                            media_type: file.media_type.clone(),
                        },
                        true,
                    )
                }
                FallbackPolicy::Reject => {
                    return self.fail(cell, board, kind, epoch, err.into());
                }
            },
        };

        if !self.transition(cell, board, kind, epoch, SlotState::Encoding) {
            return IngestOutcome::Superseded;
        }
        let image = match encode_blob(blob) {
            Ok(image) => image,
            Err(err) => return self.fail(cell, board, kind, epoch, err.into()),
        };
        let digest = payload_digest(image.payload());
        let bytes = image.decoded_len();
        if !self.transition(cell, board, kind, epoch, SlotState::Filled(image)) {
            return IngestOutcome::Superseded;
        }
        board.emit(
            "slot_filled",
            json!({
                "slot": kind.as_str(),
                "epoch": epoch,
                "bytes": bytes,
                "sha256": digest,
                "fallback": used_fallback,
            }),
        );
        IngestOutcome::Filled { used_fallback }
    }

    /// Empties the slot and resets its file input. Idempotent.
    pub fn clear(&self, cell: &SlotCell, board: &NoticeBoard) {
        let (kind, epoch) = {
            let mut slot = lock_slot(cell);
            slot.clear();
            (slot.kind, slot.epoch)
        };
        emit_slot_state(board, kind, epoch, "empty");
    }

    fn transition(
        &self,
        cell: &SlotCell,
        board: &NoticeBoard,
        kind: SlotKind,
        epoch: u64,
        state: SlotState,
    ) -> bool {
        let name = state.name();
        if !lock_slot(cell).advance(epoch, state) {
            return false;
        }
        emit_slot_state(board, kind, epoch, name);
        true
    }

    fn fail(
        &self,
        cell: &SlotCell,
        board: &NoticeBoard,
        kind: SlotKind,
        epoch: u64,
        err: IngestError,
    ) -> IngestOutcome {
        let message = format!("Could not load {}: {err}", kind.label());
        if !lock_slot(cell).fail(epoch, message.clone()) {
            return IngestOutcome::Superseded;
        }
        emit_slot_state(board, kind, epoch, "empty");
        board.blocking(Some(kind), message);
        IngestOutcome::Failed(err)
    }
}

fn emit_slot_state(board: &NoticeBoard, kind: SlotKind, epoch: u64, state: &str) {
    board.emit(
        "slot_state",
        json!({
            "slot": kind.as_str(),
            "epoch": epoch,
            "state": state,
        }),
    );
}
