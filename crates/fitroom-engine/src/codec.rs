use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use fitroom_contracts::images::{DataUrlError, EncodedImage};
use fitroom_contracts::policy::{CompressionPolicy, OutputFormat};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};

use crate::errors::{CompressionError, EncodingError};

const START_QUALITY: u8 = 90;
const QUALITY_STEP: u8 = 10;
const MIN_QUALITY: u8 = 40;
const EDGE_SHRINK: f64 = 0.85;
const MIN_EDGE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub width: u32,
    pub height: u32,
    pub iterations: u32,
    /// Re-encoding could not beat the original, so its bytes were kept.
    pub kept_original: bool,
}

/// A finished blob waiting to be turned into an [`EncodedImage`].
#[derive(Debug, Clone)]
pub enum Blob {
    Memory { bytes: Vec<u8>, media_type: String },
    File { path: PathBuf, media_type: String },
}

impl From<CompressedImage> for Blob {
    fn from(image: CompressedImage) -> Self {
        Blob::Memory {
            bytes: image.bytes,
            media_type: image.media_type,
        }
    }
}

/// Reads the file at `path` and re-encodes it under `policy`.
pub fn compress_file(
    path: &Path,
    source_media_type: &str,
    policy: &CompressionPolicy,
) -> Result<CompressedImage, CompressionError> {
    let original = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            let message = format!("could not read {}: {err}", path.display());
            return Err(CompressionError::Decode(message));
        }
    };
    compress(&original, source_media_type, policy)
}

/// Re-encodes `original` until it fits `policy.target_max_bytes` or the
/// iteration budget runs out. The smallest attempt wins.
pub fn compress(
    original: &[u8],
    source_media_type: &str,
    policy: &CompressionPolicy,
) -> Result<CompressedImage, CompressionError> {
    let work = || compress_blocking(original, source_media_type, policy);
    if !policy.allow_worker {
        return work();
    }
    thread::scope(|scope| {
        let worker = thread::Builder::new()
            .name("fitroom-compress".to_string())
            .spawn_scoped(scope, work);
        match worker {
            Ok(handle) => handle.join().unwrap_or(Err(CompressionError::NoOutput)),
            // No thread to spare; do the work here instead.
            Err(_) => work(),
        }
    })
}

fn compress_blocking(
    original: &[u8],
    source_media_type: &str,
    policy: &CompressionPolicy,
) -> Result<CompressedImage, CompressionError> {
    let decoded = image::load_from_memory(original)
        .map_err(|err| CompressionError::Decode(err.to_string()))?;
    let (orig_width, orig_height) = decoded.dimensions();
    let prepared = match policy.output {
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(flatten_alpha(&decoded)),
        OutputFormat::Png => decoded,
    };

    let longest = orig_width.max(orig_height);
    let mut edge = policy.max_dimension.max(1).min(longest);
    let mut quality = START_QUALITY;
    let mut best: Option<(Vec<u8>, u32, u32)> = None;
    let mut iterations = 0;

    while iterations < policy.max_iterations.max(1) {
        iterations += 1;
        let resized = fit_within(&prepared, edge);
        let bytes = encode_as(&resized, policy.output, quality)?;
        let size = bytes.len() as u64;
        let smaller = best
            .as_ref()
            .map_or(true, |(current, _, _)| bytes.len() < current.len());
        if smaller {
            best = Some((bytes, resized.width(), resized.height()));
        }
        if size <= policy.target_max_bytes {
            break;
        }
        if policy.output == OutputFormat::Jpeg && quality > MIN_QUALITY {
            quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
            continue;
        }
        let next_edge = (f64::from(edge) * EDGE_SHRINK).floor() as u32;
        if next_edge < MIN_EDGE || next_edge == edge {
            break;
        }
        edge = next_edge;
    }

    let (bytes, width, height) = best.ok_or(CompressionError::NoOutput)?;
    if bytes.is_empty() {
        return Err(CompressionError::EmptyOutput);
    }
    if bytes.len() >= original.len() && original.len() as u64 <= policy.target_max_bytes {
        return Ok(CompressedImage {
            bytes: original.to_vec(),
            media_type: source_media_type.to_string(),
            width: orig_width,
            height: orig_height,
            iterations,
            kept_original: true,
        });
    }
    Ok(CompressedImage {
        bytes,
        media_type: policy.output.media_type().to_string(),
        width,
        height,
        iterations,
        kept_original: false,
    })
}

fn fit_within(image: &DynamicImage, edge: u32) -> DynamicImage {
    if image.width().max(image.height()) <= edge {
        return image.clone();
    }
    image.resize(edge, edge, FilterType::Triangle)
}

/// Composites transparent pixels onto white, since JPEG has no alpha.
fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u16::from(a);
        let rgb = [r, g, b].map(|channel| over_white(channel, alpha));
        flattened.put_pixel(x, y, image::Rgb(rgb));
    }
    flattened
}

fn over_white(channel: u8, alpha: u16) -> u8 {
    ((u16::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
}

fn encode_as(
    image: &DynamicImage,
    output: OutputFormat,
    quality: u8,
) -> Result<Vec<u8>, CompressionError> {
    let mut bytes = Vec::new();
    match output {
        OutputFormat::Jpeg => {
            let rgb = image.to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
            encoder
                .encode_image(&rgb)
                .map_err(|err| CompressionError::Encode(err.to_string()))?;
        }
        OutputFormat::Png => {
            image
                .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
                .map_err(|err| CompressionError::Encode(err.to_string()))?;
        }
    }
    Ok(bytes)
}

/// Reads `blob` to completion on a background thread and encodes it.
///
/// Resolves exactly once: with the whole encoded image, or with an error
/// saying whether the read failed, produced nothing, or never reported back.
pub fn encode_blob(blob: Blob) -> Result<EncodedImage, EncodingError> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("fitroom-encode".to_string())
        .spawn(move || {
            let _ = tx.send(read_and_encode(blob));
        });
    if let Err(err) = spawned {
        let message = format!("could not start the encoder: {err}");
        return Err(EncodingError::Unknown(message));
    }
    match rx.recv() {
        Ok(result) => result,
        Err(_) => {
            let message = "encoder stopped before producing a result".to_string();
            Err(EncodingError::Unknown(message))
        }
    }
}

fn read_and_encode(blob: Blob) -> Result<EncodedImage, EncodingError> {
    let (bytes, media_type) = match blob {
        Blob::Memory { bytes, media_type } => (bytes, media_type),
        Blob::File { path, media_type } => match fs::read(&path) {
            Ok(bytes) => (bytes, media_type),
            Err(err) => {
                let message = format!("{}: {err}", path.display());
                return Err(EncodingError::Read(message));
            }
        },
    };
    match EncodedImage::from_bytes(&media_type, &bytes) {
        Ok(image) => Ok(image),
        Err(DataUrlError::EmptyPayload) => Err(EncodingError::Empty),
        Err(other) => Err(EncodingError::Unknown(other.to_string())),
    }
}
