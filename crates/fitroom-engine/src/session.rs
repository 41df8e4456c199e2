use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use fitroom_contracts::events::{now_utc_iso, payload_digest, EventWriter};
use fitroom_contracts::images::{extension_for_media_type, EncodedImage};
use fitroom_contracts::runs::summary::{write_summary, SessionSummary};
use fitroom_contracts::slots::SlotKind;
use serde_json::json;
use uuid::Uuid;

use crate::errors::{EncodingError, GenerateError, IngestError};
use crate::gateway::{CancelToken, GenerationGateway, GenerationRequest};
use crate::ingest::{
    lock_slot, IngestOutcome, IngestionController, SlotCell, SourceFile, UploadSlot,
};
use crate::notices::{Notice, NoticeBoard};

pub const DEFAULT_RESULT_STEM: &str = "virtual-fitting";

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// The two upload slots, the latest result, and the busy flag.
#[derive(Debug)]
struct FittingSession {
    subject: SlotCell,
    garment: SlotCell,
    result: Mutex<Option<EncodedImage>>,
    busy: AtomicBool,
    /// Bumped by `start_over`; a generation only stores its result while the
    /// generation it started under is still current.
    generation: AtomicU64,
}

impl FittingSession {
    fn new() -> Self {
        Self {
            subject: Mutex::new(UploadSlot::new(SlotKind::Subject)),
            garment: Mutex::new(UploadSlot::new(SlotKind::Garment)),
            result: Mutex::new(None),
            busy: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    fn slot(&self, kind: SlotKind) -> &SlotCell {
        match kind {
            SlotKind::Subject => &self.subject,
            SlotKind::Garment => &self.garment,
        }
    }

    fn result(&self) -> MutexGuard<'_, Option<EncodedImage>> {
        self.result.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds the busy flag for the lifetime of one generation.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct SessionStats {
    ingestions: AtomicU64,
    fallbacks: AtomicU64,
    generations: AtomicU64,
    failures: AtomicU64,
}

impl SessionStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotStatus {
    pub kind: SlotKind,
    pub state: &'static str,
    pub file: Option<PathBuf>,
    pub last_error: Option<String>,
}

impl SlotStatus {
    fn of(slot: &UploadSlot) -> Self {
        Self {
            kind: slot.kind(),
            state: slot.state().name(),
            file: slot.input().value().map(Path::to_path_buf),
            last_error: slot.last_error().map(str::to_string),
        }
    }

    pub fn is_filled(&self) -> bool {
        self.state == "filled"
    }
}

/// Snapshot for the surface: which of empty / filled / loading / result to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub subject: SlotStatus,
    pub garment: SlotStatus,
    pub has_result: bool,
    pub busy: bool,
}

/// One fitting-room session: two ingestion pipelines feeding one gateway.
pub struct Studio {
    session_id: String,
    started_at: String,
    session: FittingSession,
    ingest: IngestionController,
    gateway: Arc<dyn GenerationGateway>,
    board: NoticeBoard,
    stats: SessionStats,
}

impl Studio {
    pub fn new(
        gateway: Arc<dyn GenerationGateway>,
        ingest: IngestionController,
        events: Option<EventWriter>,
    ) -> Self {
        let session_id = events
            .as_ref()
            .map(|writer| writer.session_id().to_string())
            .unwrap_or_else(new_session_id);
        let studio = Self {
            session_id,
            started_at: now_utc_iso(),
            session: FittingSession::new(),
            ingest,
            gateway,
            board: NoticeBoard::new(events),
            stats: SessionStats::default(),
        };
        studio.board.emit(
            "session_started",
            json!({
                "gateway": studio.gateway.name(),
                "fallback": studio.ingest.fallback().as_str(),
                "target_max_bytes": studio.ingest.policy().target_max_bytes,
                "max_dimension": studio.ingest.policy().max_dimension,
            }),
        );
        studio
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    pub fn select_file(&self, kind: SlotKind, file: Option<SourceFile>) -> IngestOutcome {
        let outcome = self
            .ingest
            .select_file(self.session.slot(kind), file.as_ref(), &self.board);
        match &outcome {
            IngestOutcome::Filled { used_fallback } => {
                SessionStats::bump(&self.stats.ingestions);
                if *used_fallback {
                    SessionStats::bump(&self.stats.fallbacks);
                }
            }
            IngestOutcome::Failed(_) => SessionStats::bump(&self.stats.failures),
            _ => {}
        }
        outcome
    }

    /// Picks a file from disk. A path that cannot be inspected resets the slot
    /// like any other failed load.
    pub fn select_path(&self, kind: SlotKind, path: &Path) -> IngestOutcome {
        match SourceFile::open(path) {
            Ok(file) => self.select_file(kind, Some(file)),
            Err(err) => {
                let detail = format!("{}: {err}", path.display());
                let err = IngestError::Encoding(EncodingError::Read(detail));
                self.ingest.clear(self.session.slot(kind), &self.board);
                let message = format!("Could not load {}: {err}", kind.label());
                self.board.blocking(Some(kind), message);
                SessionStats::bump(&self.stats.failures);
                IngestOutcome::Failed(err)
            }
        }
    }

    /// Runs both slots' pipelines side by side.
    pub fn select_both(&self, subject: &Path, garment: &Path) -> (IngestOutcome, IngestOutcome) {
        thread::scope(|scope| {
            let left = scope.spawn(|| self.select_path(SlotKind::Subject, subject));
            let right = scope.spawn(|| self.select_path(SlotKind::Garment, garment));
            (join_ingest(left), join_ingest(right))
        })
    }

    pub fn clear(&self, kind: SlotKind) {
        self.ingest.clear(self.session.slot(kind), &self.board);
    }

    pub fn generate(&self) -> Result<EncodedImage, GenerateError> {
        self.generate_with_cancel(&CancelToken::new())
    }

    pub fn generate_with_cancel(
        &self,
        cancel: &CancelToken,
    ) -> Result<EncodedImage, GenerateError> {
        let guard = self.acquire("generate")?;
        self.run_generation(&guard, cancel)
    }

    /// Drops the shown result and asks the gateway again with the same images.
    pub fn try_again(&self) -> Result<EncodedImage, GenerateError> {
        self.try_again_with_cancel(&CancelToken::new())
    }

    pub fn try_again_with_cancel(
        &self,
        cancel: &CancelToken,
    ) -> Result<EncodedImage, GenerateError> {
        let guard = self.acquire("try_again")?;
        self.session.result().take();
        self.run_generation(&guard, cancel)
    }

    pub fn start_over(&self) {
        self.session.generation.fetch_add(1, Ordering::SeqCst);
        for kind in SlotKind::ALL {
            self.ingest.clear(self.session.slot(kind), &self.board);
        }
        self.session.result().take();
        self.board.emit("session_reset", json!({}));
    }

    pub fn result(&self) -> Option<EncodedImage> {
        self.session.result().clone()
    }

    pub fn is_busy(&self) -> bool {
        self.session.busy.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            subject: SlotStatus::of(&lock_slot(&self.session.subject)),
            garment: SlotStatus::of(&lock_slot(&self.session.garment)),
            has_result: self.session.result().is_some(),
            busy: self.is_busy(),
        }
    }

    pub fn drain_notices(&self) -> Vec<Notice> {
        self.board.drain()
    }

    /// Writes the result image to `path`, or to `virtual-fitting.<ext>` inside
    /// it when `path` is a directory.
    pub fn save_result(&self, path: &Path) -> Result<PathBuf> {
        let Some(image) = self.result() else {
            self.board
                .blocking(None, "There is no fitting result to save yet.");
            bail!("no fitting result to save");
        };
        let extension = extension_for_media_type(image.media_type());
        let target = if path.is_dir() {
            path.join(format!("{DEFAULT_RESULT_STEM}.{extension}"))
        } else {
            path.to_path_buf()
        };
        let bytes = image
            .decode_bytes()
            .context("fitting result is not valid base64")?;
        if let Some(parent) = target.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&target, &bytes)
            .with_context(|| format!("failed to write {}", target.display()))?;
        self.board.emit(
            "result_saved",
            json!({
                "path": target.to_string_lossy(),
                "bytes": bytes.len(),
                "media_type": image.media_type(),
            }),
        );
        Ok(target)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            ingestions: self.stats.ingestions.load(Ordering::Relaxed),
            fallbacks: self.stats.fallbacks.load(Ordering::Relaxed),
            generations: self.stats.generations.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    pub fn finish(&self, summary_path: &Path) -> Result<SessionSummary> {
        let summary = self.summary();
        let extra = json!({ "gateway": self.gateway.name() });
        write_summary(summary_path, &summary, extra.as_object())?;
        self.board.emit(
            "session_finished",
            json!({
                "summary": summary_path.to_string_lossy(),
                "generations": summary.generations,
                "failures": summary.failures,
            }),
        );
        Ok(summary)
    }

    fn acquire(&self, action: &str) -> Result<BusyGuard<'_>, GenerateError> {
        match BusyGuard::acquire(&self.session.busy) {
            Some(guard) => Ok(guard),
            None => {
                self.board.emit(
                    "generation_rejected",
                    json!({ "action": action, "reason": "busy" }),
                );
                self.board
                    .info(None, "A fitting is already being generated; please wait.");
                Err(GenerateError::Busy)
            }
        }
    }

    fn filled_images(&self) -> Result<(EncodedImage, EncodedImage), GenerateError> {
        let subject = lock_slot(&self.session.subject).image().cloned();
        let garment = lock_slot(&self.session.garment).image().cloned();
        match (subject, garment) {
            (Some(subject), Some(garment)) => Ok((subject, garment)),
            (subject, garment) => {
                let missing = [
                    subject.is_none().then_some(SlotKind::Subject.label()),
                    garment.is_none().then_some(SlotKind::Garment.label()),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" and ");
                Err(GenerateError::Incomplete { missing })
            }
        }
    }

    fn run_generation(
        &self,
        _guard: &BusyGuard<'_>,
        cancel: &CancelToken,
    ) -> Result<EncodedImage, GenerateError> {
        let (subject, garment) = match self.filled_images() {
            Ok(images) => images,
            Err(err) => {
                self.board.emit(
                    "generation_rejected",
                    json!({ "reason": "incomplete", "error": err.to_string() }),
                );
                self.board.blocking(None, capitalize(&err.to_string()));
                return Err(err);
            }
        };

        let generation = self.session.generation.load(Ordering::SeqCst);
        SessionStats::bump(&self.stats.generations);
        self.board.emit(
            "generation_started",
            json!({
                "gateway": self.gateway.name(),
                "subject_sha256": payload_digest(subject.payload()),
                "garment_sha256": payload_digest(garment.payload()),
            }),
        );
        let started = Instant::now();
        let request = GenerationRequest::new(subject, garment);
        match self.gateway.generate(&request, cancel) {
            Ok(image) => {
                let current = self.session.generation.load(Ordering::SeqCst) == generation;
                if current {
                    *self.session.result() = Some(image.clone());
                }
                self.board.emit(
                    "generation_finished",
                    json!({
                        "gateway": self.gateway.name(),
                        "media_type": image.media_type(),
                        "bytes": image.decoded_len(),
                        "sha256": payload_digest(image.payload()),
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                        "discarded": !current,
                    }),
                );
                Ok(image)
            }
            Err(err) => {
                SessionStats::bump(&self.stats.failures);
                self.board.emit(
                    "generation_failed",
                    json!({
                        "gateway": self.gateway.name(),
                        "error": err.to_string(),
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }),
                );
                self.board
                    .blocking(None, format!("Could not generate the fitting: {err}"));
                Err(err.into())
            }
        }
    }
}

fn join_ingest(handle: thread::ScopedJoinHandle<'_, IngestOutcome>) -> IngestOutcome {
    match handle.join() {
        Ok(outcome) => outcome,
        Err(_) => {
            let detail = "ingest worker panicked".to_string();
            IngestOutcome::Failed(IngestError::Encoding(EncodingError::Unknown(detail)))
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::panic::{self, AssertUnwindSafe};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use fitroom_contracts::events::EventWriter;
    use fitroom_contracts::images::EncodedImage;
    use fitroom_contracts::policy::MB;
    use fitroom_contracts::slots::SlotKind;
    use image::ImageFormat;
    use serde_json::Value;

    use super::*;
    use crate::codec::tests::{encode_fixture, gradient_image, noise_image};
    use crate::errors::{GatewayError, ValidationError};
    use crate::gateway::DryrunGateway;
    use crate::notices::NoticeLevel;

    fn result_image() -> EncodedImage {
        let bytes = encode_fixture(&gradient_image(32, 48), ImageFormat::Png);
        EncodedImage::from_bytes("image/png", &bytes).expect("fixture image")
    }

    struct FixedGateway {
        calls: AtomicUsize,
    }

    impl FixedGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl GenerationGateway for FixedGateway {
        fn name(&self) -> &str {
            "fixed"
        }

        fn generate(
            &self,
            request: &GenerationRequest,
            _cancel: &CancelToken,
        ) -> Result<EncodedImage, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_ne!(request.subject, request.garment);
            Ok(result_image())
        }
    }

    /// Unreachable on the first call, fine afterwards.
    struct FlakyGateway {
        calls: AtomicUsize,
    }

    impl GenerationGateway for FlakyGateway {
        fn name(&self) -> &str {
            "flaky"
        }

        fn generate(
            &self,
            _request: &GenerationRequest,
            _cancel: &CancelToken,
        ) -> Result<EncodedImage, GatewayError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(GatewayError::Unreachable("connection refused".to_string()));
            }
            Ok(result_image())
        }
    }

    /// Signals when it is entered and waits until released.
    struct GatedGateway {
        calls: AtomicUsize,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl GenerationGateway for GatedGateway {
        fn name(&self) -> &str {
            "gated"
        }

        fn generate(
            &self,
            _request: &GenerationRequest,
            _cancel: &CancelToken,
        ) -> Result<EncodedImage, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _ = self.entered.lock().map(|tx| tx.send(()));
            let _ = self
                .release
                .lock()
                .map(|rx| rx.recv_timeout(Duration::from_secs(10)));
            Ok(result_image())
        }
    }

    struct PanickingGateway;

    impl GenerationGateway for PanickingGateway {
        fn name(&self) -> &str {
            "panicking"
        }

        fn generate(
            &self,
            _request: &GenerationRequest,
            _cancel: &CancelToken,
        ) -> Result<EncodedImage, GatewayError> {
            panic!("gateway exploded")
        }
    }

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> anyhow::Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn fixture_pair(dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
        let subject = encode_fixture(&noise_image(1400, 1000, 11), ImageFormat::Jpeg);
        let garment = encode_fixture(&noise_image(600, 500, 5), ImageFormat::Png);
        let subject = write_file(dir, "me.jpg", &subject)?;
        let garment = write_file(dir, "shirt.png", &garment)?;
        Ok((subject, garment))
    }

    fn filled_studio(gateway: Arc<dyn GenerationGateway>, dir: &Path) -> anyhow::Result<Studio> {
        let studio = Studio::new(gateway, IngestionController::default(), None);
        let (subject, garment) = fixture_pair(dir)?;
        let subject = studio.select_path(SlotKind::Subject, &subject);
        let garment = studio.select_path(SlotKind::Garment, &garment);
        assert!(matches!(subject, IngestOutcome::Filled { .. }));
        assert!(matches!(garment, IngestOutcome::Filled { .. }));
        Ok(studio)
    }

    fn messages_at(notices: &[Notice], level: NoticeLevel) -> Vec<String> {
        notices
            .iter()
            .filter(|notice| notice.level == level)
            .map(|notice| notice.message.clone())
            .collect()
    }

    #[test]
    fn both_slots_filled_then_generation_stores_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let gateway = FixedGateway::new();
        let studio = filled_studio(gateway.clone(), temp.path())?;

        let status = studio.status();
        assert!(status.subject.is_filled());
        assert!(status.garment.is_filled());

        let image = studio.generate()?;
        assert_eq!(studio.result(), Some(image));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        let status = studio.status();
        assert!(status.has_result);
        assert!(!status.busy);
        Ok(())
    }

    #[test]
    fn oversized_subject_stays_empty_and_names_the_cap() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = write_file(temp.path(), "huge.jpg", &vec![0u8; (10 * MB) as usize])?;
        let studio = Studio::new(FixedGateway::new(), IngestionController::default(), None);

        let outcome = studio.select_path(SlotKind::Subject, &path);
        let IngestOutcome::Failed(IngestError::Validation(err)) = &outcome else {
            anyhow::bail!("expected a validation failure");
        };
        assert!(matches!(err, ValidationError::TooLarge { .. }));
        assert_eq!(studio.status().subject.state, "empty");
        let blocking = messages_at(&studio.drain_notices(), NoticeLevel::Blocking);
        assert!(blocking.iter().any(|message| message.contains("5 MB")));
        Ok(())
    }

    #[test]
    fn unreachable_gateway_keeps_slots_and_try_again_recovers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let gateway = Arc::new(FlakyGateway {
            calls: AtomicUsize::new(0),
        });
        let studio = filled_studio(gateway.clone(), temp.path())?;
        studio.drain_notices();

        let err = studio.generate().err();
        let refused = GatewayError::Unreachable("connection refused".to_string());
        assert_eq!(err, Some(GenerateError::Gateway(refused)));
        let notices = studio.drain_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, NoticeLevel::Blocking);
        assert!(notices[0].message.contains("connection refused"));

        let status = studio.status();
        assert!(status.subject.is_filled());
        assert!(status.garment.is_filled());
        assert!(!status.busy);
        assert!(!status.has_result);

        studio.try_again()?;
        assert!(studio.result().is_some());
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn start_over_resets_slots_and_result() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let studio = filled_studio(FixedGateway::new(), temp.path())?;
        studio.generate()?;

        studio.start_over();
        let status = studio.status();
        assert_eq!(status.subject.state, "empty");
        assert_eq!(status.garment.state, "empty");
        assert_eq!(status.subject.file, None);
        assert!(!status.has_result);
        assert_eq!(studio.result(), None);
        Ok(())
    }

    #[test]
    fn incomplete_session_never_reaches_gateway() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (subject, _) = fixture_pair(temp.path())?;
        let gateway = FixedGateway::new();
        let studio = Studio::new(gateway.clone(), IngestionController::default(), None);
        studio.select_path(SlotKind::Subject, &subject);
        studio.drain_notices();

        let err = studio.generate().err();
        let expected = GenerateError::Incomplete {
            missing: "the garment photo".to_string(),
        };
        assert_eq!(err, Some(expected));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        let notices = studio.drain_notices();
        assert_eq!(notices.len(), 1);
        let message = &notices[0].message;
        assert!(message.starts_with("Please provide both images"));
        assert!(!studio.is_busy());

        let empty = Studio::new(FixedGateway::new(), IngestionController::default(), None);
        let err = empty.generate().err();
        let expected = GenerateError::Incomplete {
            missing: "your photo and the garment photo".to_string(),
        };
        assert_eq!(err, Some(expected));
        Ok(())
    }

    #[test]
    fn concurrent_generate_is_rejected_while_busy() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gateway = Arc::new(GatedGateway {
            calls: AtomicUsize::new(0),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let studio = filled_studio(gateway.clone(), temp.path())?;

        thread::scope(|scope| -> anyhow::Result<()> {
            let first = scope.spawn(|| studio.generate());
            entered_rx.recv_timeout(Duration::from_secs(10))?;
            assert!(studio.is_busy());

            assert_eq!(studio.generate().err(), Some(GenerateError::Busy));
            assert_eq!(studio.try_again().err(), Some(GenerateError::Busy));

            release_tx.send(())?;
            let first = first
                .join()
                .map_err(|_| anyhow::anyhow!("generation thread panicked"))?;
            assert!(first.is_ok());
            Ok(())
        })?;

        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
        assert!(!studio.is_busy());
        let info = messages_at(&studio.drain_notices(), NoticeLevel::Info);
        assert!(info.iter().any(|message| message.contains("already")));
        Ok(())
    }

    #[test]
    fn result_arriving_after_start_over_is_discarded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gateway = Arc::new(GatedGateway {
            calls: AtomicUsize::new(0),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let studio = filled_studio(gateway, temp.path())?;

        thread::scope(|scope| -> anyhow::Result<()> {
            let pending = scope.spawn(|| studio.generate());
            entered_rx.recv_timeout(Duration::from_secs(10))?;
            studio.start_over();
            release_tx.send(())?;
            let outcome = pending
                .join()
                .map_err(|_| anyhow::anyhow!("generation thread panicked"))?;
            assert!(outcome.is_ok());
            Ok(())
        })?;

        assert_eq!(studio.result(), None);
        assert!(!studio.status().has_result);
        Ok(())
    }

    #[test]
    fn panicking_gateway_releases_busy_flag() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let studio = filled_studio(Arc::new(PanickingGateway), temp.path())?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| studio.generate()));
        assert!(outcome.is_err());
        assert!(!studio.is_busy());
        Ok(())
    }

    #[test]
    fn select_both_fills_slots_concurrently() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let (subject, garment) = fixture_pair(temp.path())?;
        let studio = Studio::new(FixedGateway::new(), IngestionController::default(), None);

        let (left, right) = studio.select_both(&subject, &garment);
        assert!(matches!(left, IngestOutcome::Filled { .. }));
        assert!(matches!(right, IngestOutcome::Filled { .. }));
        assert_eq!(studio.summary().ingestions, 2);
        Ok(())
    }

    #[test]
    fn missing_path_resets_the_slot_with_a_notice() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let studio = Studio::new(FixedGateway::new(), IngestionController::default(), None);
        let missing = temp.path().join("nope.png");
        let outcome = studio.select_path(SlotKind::Garment, &missing);
        let IngestOutcome::Failed(IngestError::Encoding(err)) = &outcome else {
            anyhow::bail!("expected an encoding failure");
        };
        assert!(matches!(err, EncodingError::Read(_)));
        let notices = studio.drain_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].slot, Some(SlotKind::Garment));
        let message = &notices[0].message;
        assert!(message.starts_with("Could not load the garment photo"));
        Ok(())
    }

    #[test]
    fn save_result_uses_default_name_inside_directories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let studio = filled_studio(FixedGateway::new(), temp.path())?;

        assert!(studio.save_result(temp.path()).is_err());
        let blocking = messages_at(&studio.drain_notices(), NoticeLevel::Blocking);
        assert!(blocking.iter().any(|message| message.contains("no fitting result")));

        let image = studio.generate()?;
        let out_dir = temp.path().join("out");
        fs::create_dir_all(&out_dir)?;
        let saved = studio.save_result(&out_dir)?;
        assert_eq!(saved, out_dir.join("virtual-fitting.png"));
        assert_eq!(fs::read(&saved)?, image.decode_bytes()?);

        let nested = temp.path().join("nested/look.png");
        let explicit = studio.save_result(&nested)?;
        assert!(explicit.is_file());
        Ok(())
    }

    #[test]
    fn dryrun_gateway_completes_a_session() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let studio = filled_studio(Arc::new(DryrunGateway), temp.path())?;
        let image = studio.generate()?;
        assert_eq!(image.media_type(), "image/png");
        assert!(image::load_from_memory(&image.decode_bytes()?).is_ok());
        Ok(())
    }

    #[test]
    fn finish_writes_summary_and_events() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&events_path, "session-test");
        let gateway = Arc::new(FlakyGateway {
            calls: AtomicUsize::new(0),
        });
        let studio = Studio::new(gateway, IngestionController::default(), Some(writer));
        assert_eq!(studio.session_id(), "session-test");
        let (subject, garment) = fixture_pair(temp.path())?;
        studio.select_both(&subject, &garment);
        let _ = studio.generate();
        studio.try_again()?;
        studio.save_result(temp.path())?;
        studio.start_over();
        let err = studio.generate().err();
        assert!(matches!(err, Some(GenerateError::Incomplete { .. })));

        let summary_path = temp.path().join("summary.json");
        let summary = studio.finish(&summary_path)?;
        assert_eq!(summary.session_id, "session-test");
        assert_eq!(summary.ingestions, 2);
        assert_eq!(summary.generations, 2);
        assert_eq!(summary.failures, 1);

        let written: Value = serde_json::from_str(&fs::read_to_string(&summary_path)?)?;
        assert_eq!(written["gateway"], "flaky");
        assert_eq!(written["generations"], Value::from(2));

        let types = fs::read_to_string(&events_path)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect::<Vec<_>>();
        assert_eq!(types[0], "session_started");
        assert_eq!(types[types.len() - 1], "session_finished");
        for expected in [
            "slot_state",
            "compression",
            "slot_filled",
            "notice",
            "generation_started",
            "generation_failed",
            "generation_finished",
            "result_saved",
            "session_reset",
            "generation_rejected",
        ] {
            let seen = types.iter().any(|kind| kind == expected);
            assert!(seen, "missing {expected}");
        }
        Ok(())
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
        assert_eq!(new_session_id().len(), 36);
    }
}
