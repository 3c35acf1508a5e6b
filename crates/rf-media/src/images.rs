//! Image normalization helpers.

use std::io::Cursor;

use image::ImageFormat;
use rf_core::{Error, Result};

/// Decode arbitrary image bytes and re-encode them as an RGBA PNG.
///
/// Image-edit endpoints reject reference images without an alpha channel.
pub fn to_rgba_png(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)
        .map_err(|e| Error::Validation(format!("reference image could not be decoded: {e}")))?;

    let rgba = img.to_rgba8();
    let mut buf = Cursor::new(Vec::new());
    rgba.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| Error::Internal(format!("failed to encode PNG: {e}")))?;
    Ok(buf.into_inner())
}

/// File extension for encoded image bytes, defaulting to `png`.
pub fn extension_for(data: &[u8]) -> &'static str {
    match image::guess_format(data) {
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::WebP) => "webp",
        Ok(ImageFormat::Gif) => "gif",
        _ => "png",
    }
}
