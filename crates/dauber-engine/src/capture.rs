use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use dauber_contracts::frames::{Frame, FrameStore};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

pub const MAX_DIMENSION: u32 = 1280;
pub const JPEG_QUALITY: u8 = 85;

/// Anything that can hand over the picture currently on a live feed.
pub trait FrameSource {
    /// Pixel size of the feed right now. `(0, 0)` means no picture yet.
    fn dimensions(&self) -> (u32, u32);

    fn grab(&self) -> anyhow::Result<DynamicImage>;
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Camera not ready")]
    NotReady,
    #[error("Failed to capture frame: {0}")]
    Failed(String),
}

/// A fixed picture posing as a feed. Used for one-shot runs on image files.
#[derive(Debug, Clone)]
pub struct StillFrame {
    image: DynamicImage,
}

impl StillFrame {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn open(path: &std::path::Path) -> anyhow::Result<Self> {
        let image =
            image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self::new(image))
    }
}

impl FrameSource for StillFrame {
    fn dimensions(&self) -> (u32, u32) {
        (self.image.width(), self.image.height())
    }

    fn grab(&self) -> anyhow::Result<DynamicImage> {
        Ok(self.image.clone())
    }
}

/// Size after fitting inside `MAX_DIMENSION` on the long side.
pub fn target_dimensions(width: u32, height: u32) -> (u32, u32) {
    if width <= MAX_DIMENSION && height <= MAX_DIMENSION {
        return (width, height);
    }
    let scale = f64::from(MAX_DIMENSION) / f64::from(width.max(height));
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

pub fn encode_jpeg_data_url(image: &DynamicImage) -> anyhow::Result<String> {
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY);
    encoder
        .encode_image(&DynamicImage::ImageRgb8(image.to_rgb8()))
        .context("JPEG encode failed")?;
    Ok(format!("data:image/jpeg;base64,{}", BASE64.encode(bytes)))
}

/// Grabs the feed's current picture, downscales and encodes it, and prepends
/// it to `store`. The store is untouched on failure.
pub fn capture_frame(
    store: &mut FrameStore,
    source: &dyn FrameSource,
) -> Result<Frame, CaptureError> {
    let frame = encode_frame(source, Utc::now())?;
    store.push(frame.clone());
    Ok(frame)
}

/// Builds a frame from the source's current picture without storing it.
pub fn encode_frame(
    source: &dyn FrameSource,
    captured_at: DateTime<Utc>,
) -> Result<Frame, CaptureError> {
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        tracing::warn!("frame source not ready for capture");
        return Err(CaptureError::NotReady);
    }
    let (width, height) = target_dimensions(width, height);

    let grabbed = source
        .grab()
        .map_err(|err| CaptureError::Failed(format!("{err:#}")))?;
    let resized = if grabbed.width() == width && grabbed.height() == height {
        grabbed
    } else {
        grabbed.resize_exact(width, height, FilterType::Triangle)
    };
    let encoded =
        encode_jpeg_data_url(&resized).map_err(|err| CaptureError::Failed(format!("{err:#}")))?;

    Ok(Frame::captured_at(encoded, width, height, captured_at))
}
