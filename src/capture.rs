//! Frame sampling and encoding for the capture loop.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;

use crate::{OurError, OurResult};
use crate::camera_manager::FrameSurface;
use crate::protocol::Domain;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

/// One encoded frame ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePayload {
    /// JPEG data URL
    pub image_b64: String,
    pub domain: Domain,
}

/// Encode a frame at its native resolution as a JPEG data URL.
pub fn encode_frame(frame: &RgbImage, quality: u8) -> OurResult<String> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(frame)?;

    let mut data_url = String::with_capacity(DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    data_url.push_str(DATA_URL_PREFIX);
    STANDARD.encode_string(&jpeg, &mut data_url);
    Ok(data_url)
}

/// Sample the surface's current frame and encode it on the blocking pool.
///
/// Returns `Ok(None)` while the device has not produced a usable frame yet.
pub async fn sample_frame(
    surface: &FrameSurface,
    domain: Domain,
    quality: u8,
) -> OurResult<Option<FramePayload>> {
    let latest = surface.borrow().clone();
    let frame = match latest {
        Some(frame) if frame.width() > 0 && frame.height() > 0 => frame,
        _ => return Ok(None),
    };

    let image_b64 = tokio::task::spawn_blocking(move || encode_frame(&frame, quality))
        .await
        .map_err(|e| OurError::App(format!("Frame encoder task failed: {e}")))??;
    Ok(Some(FramePayload { image_b64, domain }))
}

/// Decode a data URL produced by [`encode_frame`] back into JPEG bytes.
pub fn decode_data_url(data_url: &str) -> Option<Vec<u8>> {
    let encoded = data_url.strip_prefix(DATA_URL_PREFIX)?;
    STANDARD.decode(encoded).ok()
}
