use std::fmt;
use std::io::Cursor;

use fitroom_contracts::images::EncodedImage;
use image::{imageops, DynamicImage, ImageFormat};

use super::{CancelToken, GenerationGateway, GenerationRequest};
use crate::errors::GatewayError;

/// Offline stand-in: pastes a shrunken garment onto the middle of the
/// subject photo.
pub struct DryrunGateway;

impl GenerationGateway for DryrunGateway {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
    ) -> Result<EncodedImage, GatewayError> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }
        let mut canvas = decode(&request.subject, "subject")?.to_rgba8();
        let garment = decode(&request.garment, "garment")?;

        let (width, height) = canvas.dimensions();
        let patch = garment
            .thumbnail((width / 2).max(1), (height / 2).max(1))
            .to_rgba8();
        let x = i64::from(width.saturating_sub(patch.width()) / 2);
        let y = i64::from(height.saturating_sub(patch.height()) / 2);
        imageops::overlay(&mut canvas, &patch, x, y);

        let mut out = Cursor::new(Vec::new());
        let rgba = DynamicImage::ImageRgba8(canvas);
        if let Err(err) = rgba.write_to(&mut out, ImageFormat::Png) {
            let message = format!("dryrun encode failed: {err}");
            return Err(GatewayError::Other(message));
        }
        EncodedImage::from_bytes("image/png", out.get_ref())
            .map_err(|err| GatewayError::InvalidImage(err.to_string()))
    }
}

fn decode(image: &EncodedImage, which: &str) -> Result<DynamicImage, GatewayError> {
    let bytes = image.decode_bytes().map_err(|err| invalid(which, err))?;
    image::load_from_memory(&bytes)
        .map_err(|err| invalid(which, err))
}

fn invalid(which: &str, err: impl fmt::Display) -> GatewayError {
    GatewayError::InvalidImage(format!("{which}: {err}"))
}
