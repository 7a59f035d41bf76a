use std::io::Cursor;

use image::{ImageFormat, RgbaImage};
use thiserror::Error;
use tracing::debug;

/// Decoded pixel grid with per-pixel RGBA access.
pub type Raster = RgbaImage;

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("image decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("image encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

pub fn decode(bytes: &[u8]) -> Result<Raster, InspectError> {
    let image = image::load_from_memory(bytes).map_err(InspectError::Decode)?;
    Ok(image.to_rgba8())
}

pub fn dimensions(bytes: &[u8]) -> Result<(u32, u32), InspectError> {
    decode(bytes).map(|raster| raster.dimensions())
}

/// Encodes as PNG so alpha survives exactly.
pub fn encode_png(raster: &Raster) -> Result<Vec<u8>, InspectError> {
    let mut out = Cursor::new(Vec::new());
    raster
        .write_to(&mut out, ImageFormat::Png)
        .map_err(InspectError::Encode)?;
    Ok(out.into_inner())
}

/// MIME type guessed from the magic bytes, falling back to PNG.
pub fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::WebP) => "image/webp",
        Ok(ImageFormat::Bmp) => "image/bmp",
        Ok(ImageFormat::Gif) => "image/gif",
        _ => "image/png",
    }
}

/// Checks exact output size and, optionally, a fully transparent 1px border.
///
/// Undecodable bytes count as invalid output. Interior pixels are never
/// inspected.
pub fn validate_alpha_and_size(
    bytes: &[u8],
    target_width: u32,
    target_height: u32,
    expect_alpha_border: bool,
) -> bool {
    let raster = match decode(bytes) {
        Ok(raster) => raster,
        Err(error) => {
            debug!(error = %error, "validation treated undecodable bytes as invalid");
            return false;
        }
    };
    if raster.dimensions() != (target_width, target_height) {
        return false;
    }
    if !expect_alpha_border {
        return true;
    }
    has_transparent_border(&raster)
}

pub fn has_transparent_border(raster: &Raster) -> bool {
    let (width, height) = raster.dimensions();
    if width == 0 || height == 0 {
        return true;
    }
    let transparent = |x: u32, y: u32| raster.get_pixel(x, y)[3] == 0;
    let rows_clear = (0..width).all(|x| transparent(x, 0) && transparent(x, height - 1));
    let cols_clear = (0..height).all(|y| transparent(0, y) && transparent(width - 1, y));
    rows_clear && cols_clear
}
