use image::{imageops, Rgba, RgbaImage};
use serde_json::Value;

use super::{PostOpError, PostOpParams};

pub(super) const DEFAULT_RESIZE_SCALE: u32 = 2;
pub(super) const DEFAULT_CHROMA_COLOR: [u8; 3] = [255, 255, 255];
pub(super) const DEFAULT_CHROMA_TOLERANCE: f64 = 18.0;
const MAX_OUTPUT_SIDE: u32 = 16_384;

/// Crops to the tightest box holding every pixel with alpha > 0.
///
/// A fully transparent input collapses to a single transparent pixel.
pub(super) fn trim(image: &RgbaImage, _params: &PostOpParams) -> Result<RgbaImage, PostOpError> {
    let Some((left, top, right, bottom)) = opaque_bounds(image) else {
        return Ok(RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0])));
    };
    let width = right - left + 1;
    let height = bottom - top + 1;
    Ok(imageops::crop_imm(image, left, top, width, height).to_image())
}

fn opaque_bounds(image: &RgbaImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
        if pixel[3] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((l, t, r, b)) => (l.min(x), t.min(y), r.max(x), b.max(y)),
        });
    }
    bounds
}

/// Integer nearest-neighbor upscale; every output pixel copies one source pixel.
pub(super) fn resize(image: &RgbaImage, params: &PostOpParams) -> Result<RgbaImage, PostOpError> {
    let scale = positive_int_param(params, "resize", "scale", DEFAULT_RESIZE_SCALE)?;
    let (src_w, src_h) = image.dimensions();
    let (Some(width), Some(height)) = (src_w.checked_mul(scale), src_h.checked_mul(scale)) else {
        return Err(PostOpError::InvalidParams {
            op: String::from("resize"),
            message: format!("scale {scale} overflows a {src_w}x{src_h} image"),
        });
    };
    if width > MAX_OUTPUT_SIDE || height > MAX_OUTPUT_SIDE {
        return Err(PostOpError::InvalidParams {
            op: String::from("resize"),
            message: format!("output {width}x{height} exceeds {MAX_OUTPUT_SIDE}px per side"),
        });
    }
    Ok(RgbaImage::from_fn(width, height, |x, y| {
        *image.get_pixel(x / scale, y / scale)
    }))
}

/// Zeroes alpha for pixels whose RGB Euclidean distance to the key color is
/// at most `tolerance`. Other channels are untouched.
pub(super) fn chroma(image: &RgbaImage, params: &PostOpParams) -> Result<RgbaImage, PostOpError> {
    let key = [
        channel_param(params, "r", DEFAULT_CHROMA_COLOR[0])?,
        channel_param(params, "g", DEFAULT_CHROMA_COLOR[1])?,
        channel_param(params, "b", DEFAULT_CHROMA_COLOR[2])?,
    ];
    let tolerance = number_param(params, "chroma", "tolerance", DEFAULT_CHROMA_TOLERANCE)?;
    if tolerance < 0.0 {
        return Err(PostOpError::InvalidParams {
            op: String::from("chroma"),
            message: format!("tolerance must be >= 0, got {tolerance}"),
        });
    }

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        if rgb_distance(pixel, key) <= tolerance {
            pixel[3] = 0;
        }
    }
    Ok(out)
}

pub(super) fn rgb_distance(pixel: &Rgba<u8>, key: [u8; 3]) -> f64 {
    let dr = f64::from(pixel[0]) - f64::from(key[0]);
    let dg = f64::from(pixel[1]) - f64::from(key[1]);
    let db = f64::from(pixel[2]) - f64::from(key[2]);
    (dr * dr + dg * dg + db * db).sqrt()
}

fn number_param(
    params: &PostOpParams,
    op: &str,
    key: &str,
    default: f64,
) -> Result<f64, PostOpError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => value
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PostOpError::InvalidParams {
                op: op.to_string(),
                message: format!("'{key}' must be a number, got {value}"),
            }),
    }
}

fn positive_int_param(
    params: &PostOpParams,
    op: &str,
    key: &str,
    default: u32,
) -> Result<u32, PostOpError> {
    let raw = number_param(params, op, key, f64::from(default))?;
    if raw < 1.0 || raw.fract() != 0.0 || raw > f64::from(u32::MAX) {
        return Err(PostOpError::InvalidParams {
            op: op.to_string(),
            message: format!("'{key}' must be a positive integer, got {raw}"),
        });
    }
    Ok(raw as u32)
}

fn channel_param(params: &PostOpParams, key: &str, default: u8) -> Result<u8, PostOpError> {
    let raw = number_param(params, "chroma", key, f64::from(default))?;
    if !(0.0..=255.0).contains(&raw) {
        return Err(PostOpError::InvalidParams {
            op: String::from("chroma"),
            message: format!("'{key}' must be within 0..=255, got {raw}"),
        });
    }
    Ok(raw.round() as u8)
}
