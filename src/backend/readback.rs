//! Helpers for turning GPU copy buffers into tightly packed RGBA8 pixels

use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::{TextureFormat, TextureReadback};

/// Row pitch required by buffer copies on both GPU backends
pub const COPY_ROW_ALIGNMENT: u32 = 256;

pub fn padded_bytes_per_row(width: u32, bytes_per_pixel: u32) -> u32 {
    let unpadded = width * bytes_per_pixel;
    unpadded.div_ceil(COPY_ROW_ALIGNMENT) * COPY_ROW_ALIGNMENT
}

/// Strip row padding and reorder channels so the result is always RGBA8.
pub fn pack_rows(
    format: TextureFormat,
    data: &[u8],
    width: u32,
    height: u32,
    padded_row: u32,
) -> BackendResult<TextureReadback> {
    let eight_bit = matches!(
        format,
        TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
    );
    if !eight_bit {
        return Err(BackendError::ReadbackFailed(format!(
            "{:?} cannot be read back as RGBA8",
            format
        )));
    }

    let row = (width * 4) as usize;
    let padded_row = padded_row as usize;
    if data.len() < padded_row * (height as usize).saturating_sub(1) + row {
        return Err(BackendError::ReadbackFailed(format!(
            "{} bytes is too small for {}x{}",
            data.len(),
            width,
            height
        )));
    }

    let mut rgba8 = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * padded_row;
        rgba8.extend_from_slice(&data[start..start + row]);
    }

    if format.is_bgra() {
        for pixel in rgba8.chunks_exact_mut(4) {
            pixel.swap(0, 2);
        }
    }

    Ok(TextureReadback {
        width,
        height,
        rgba8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_padding() {
        assert_eq!(padded_bytes_per_row(64, 4), 256);
        assert_eq!(padded_bytes_per_row(65, 4), 512);
        assert_eq!(padded_bytes_per_row(1, 4), 256);
    }

    #[test]
    fn test_bgra_is_swizzled_and_unpadded() {
        let mut data = vec![0u8; 512];
        data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        data[256..260].copy_from_slice(&[5, 6, 7, 8]);

        let pixels = pack_rows(TextureFormat::Bgra8UnormSrgb, &data, 1, 2, 256).unwrap();
        assert_eq!(pixels.rgba8, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_float_targets_are_rejected() {
        let result = pack_rows(TextureFormat::Rgba16Float, &[0; 256], 1, 1, 256);
        assert!(matches!(result, Err(BackendError::ReadbackFailed(_))));
    }
}
