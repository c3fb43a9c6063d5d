//! CPU-side pixel conversions for frame uploads and readback.

use crate::types::Frame;

/// Expands a packed RGB565 frame into tightly packed RGBA8 rows.
pub fn expand_rgb565(frame: &Frame<'_>) -> Vec<u8> {
    let width = frame.width as usize;
    let mut out = Vec::with_capacity(width * frame.height as usize * 4);
    for row in 0..frame.height as usize {
        let start = row * frame.pitch;
        let Some(line) = frame.data.get(start..start + width * 2) else {
            break;
        };
        for texel in line.chunks_exact(2) {
            let packed = u16::from_le_bytes([texel[0], texel[1]]);
            let r = ((packed >> 11) & 0x1f) as u8;
            let g = ((packed >> 5) & 0x3f) as u8;
            let b = (packed & 0x1f) as u8;
            out.extend_from_slice(&[(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 0xff]);
        }
    }
    out
}

/// Reorders RGBA8 pixels into the B, G, R, X layout of [`crate::PixelFormat::Xrgb8888`].
pub fn rgba_to_xrgb8888(rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgba.len());
    for px in rgba.chunks_exact(4) {
        out.extend_from_slice(&[px[2], px[1], px[0], 0xff]);
    }
    out
}

/// Packs RGBA8 pixels into little-endian RGB565, dropping alpha.
pub fn rgba_to_rgb565(rgba: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(rgba.len() / 2);
    for px in rgba.chunks_exact(4) {
        let packed = (u16::from(px[0] >> 3) << 11) | (u16::from(px[1] >> 2) << 5) | u16::from(px[2] >> 3);
        out.extend_from_slice(&packed.to_le_bytes());
    }
    out
}

/// Swaps red and blue in place and forces opaque alpha.
pub fn bgra_to_rgba_in_place(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(4) {
        px.swap(0, 2);
        px[3] = 0xff;
    }
}
