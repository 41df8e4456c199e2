mod dryrun;
mod gemini;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use fitroom_contracts::images::EncodedImage;

use crate::config::FitroomConfig;
use crate::errors::GatewayError;

pub use dryrun::DryrunGateway;
pub use gemini::GeminiGateway;

pub const FITTING_INSTRUCTION: &str = concat!(
    "Combine the two provided images. The person from the first image should be ",
    "realistically wearing the clothing shown in the second image. Make the fit, lighting, ",
    "and perspective look natural and seamless, as if the person is truly wearing the ",
    "outfit in a real-world fitting room. Do not alter the person's face, body shape, or ",
    "pose; only apply the clothing so it looks genuinely worn. The clothing should drape ",
    "and conform to the person's body photorealistically, keeping fabric textures and ",
    "wrinkles. Return a high-quality, photorealistic image suitable for a virtual fitting ",
    "room preview, with a clean background.",
);

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub subject: EncodedImage,
    pub garment: EncodedImage,
    pub instruction: String,
}

impl GenerationRequest {
    pub fn new(subject: EncodedImage, garment: EncodedImage) -> Self {
        Self {
            subject,
            garment,
            instruction: FITTING_INSTRUCTION.to_string(),
        }
    }
}

/// Shared flag that asks an in-flight generation to give up.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The external service that dresses the subject in the garment.
pub trait GenerationGateway: Send + Sync {
    fn name(&self) -> &str;
    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<EncodedImage, GatewayError>;
}

#[derive(Default)]
pub struct GatewayRegistry {
    gateways: BTreeMap<String, Arc<dyn GenerationGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: GenerationGateway + 'static>(&mut self, gateway: G) {
        let name = gateway.name().to_string();
        self.gateways.insert(name, Arc::new(gateway));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationGateway>> {
        self.gateways.get(name.trim()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.gateways.keys().cloned().collect()
    }
}

pub fn default_gateway_registry(config: &FitroomConfig) -> GatewayRegistry {
    let mut gateways = GatewayRegistry::new();
    gateways.register(DryrunGateway);
    gateways.register(GeminiGateway::new(config));
    gateways
}

/// Runs `job` on a worker thread and waits for it, returning
/// [`GatewayError::Cancelled`] as soon as `cancel` fires. A cancelled job's
/// eventual result is dropped.
pub(crate) fn run_cancellable<T, F>(
    cancel: &CancelToken,
    thread_name: &str,
    job: F,
) -> Result<T, GatewayError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, GatewayError> + Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(GatewayError::Cancelled);
    }
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let _ = tx.send(job());
        });
    if let Err(err) = spawned {
        let message = format!("could not start request worker: {err}");
        return Err(GatewayError::Other(message));
    }

    loop {
        match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(result) => return result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    return Err(GatewayError::Cancelled);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let message = "request worker stopped without a result".to_string();
                return Err(GatewayError::Other(message));
            }
        }
    }
}
