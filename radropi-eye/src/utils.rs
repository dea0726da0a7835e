//! Pixel helpers shared by the detector, classifier crops and annotation

use radropi_core::types::rgb_to_luma;
use radropi_core::{BoundingBox, Frame, PixelFormat};

/// Luminance plane of a well-formed frame, row-major
pub(crate) fn luma_plane(frame: &Frame) -> Vec<f32> {
    match frame.format {
        PixelFormat::Gray8 => frame.data.iter().map(|&v| v as f32).collect(),
        PixelFormat::Rgb8 => frame
            .data
            .chunks_exact(3)
            .map(|px| rgb_to_luma(px[0], px[1], px[2]) as f32)
            .collect(),
    }
}

/// 3x3 box blur with edge clamping
pub(crate) fn box_blur3(plane: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; plane.len()];
    for y in 0..height {
        for x in 0..width {
            let mut sum = 0.0;
            let mut count = 0.0;
            for ny in y.saturating_sub(1)..=(y + 1).min(height - 1) {
                let row = ny * width;
                for nx in x.saturating_sub(1)..=(x + 1).min(width - 1) {
                    sum += plane[row + nx];
                    count += 1.0;
                }
            }
            out[y * width + x] = sum / count;
        }
    }
    out
}

/// Integer pixel rectangle covering `bbox` plus padding, clipped to the frame.
/// Returns (x0, y0, x1, y1) with exclusive upper bounds, `None` if empty.
pub(crate) fn pixel_window(
    bbox: &BoundingBox,
    padding: u32,
    width: u32,
    height: u32,
) -> Option<(u32, u32, u32, u32)> {
    if !bbox.x.is_finite() || !bbox.y.is_finite() || !bbox.width.is_finite() || !bbox.height.is_finite() {
        return None;
    }
    let pad = padding as f32;
    let x0 = (bbox.x - pad).floor().max(0.0) as u32;
    let y0 = (bbox.y - pad).floor().max(0.0) as u32;
    let x1 = ((bbox.x + bbox.width + pad).ceil().max(0.0) as u32).min(width);
    let y1 = ((bbox.y + bbox.height + pad).ceil().max(0.0) as u32).min(height);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }
    Some((x0, y0, x1, y1))
}
