//! Texture data and GPU textures

use crate::backend::traits::*;
use crate::backend::types::*;
use image::{DynamicImage, GenericImageView};
use std::path::Path;

/// Decoded pixels ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load an image file. HDR images keep their range as `Rgba16Float`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|e| e.to_string())?;
        Ok(Self::from_image(img, &name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        match img {
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
                let rgba = img.to_rgba32f();
                Self::from_rgba32f(name, width, height, rgba.as_raw())
            }
            _ => Self::from_rgba8(name, width, height, img.to_rgba8().into_raw()),
        }
    }

    /// Wrap tightly packed sRGB RGBA8 pixels
    pub fn from_rgba8(name: &str, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: pixels,
            name: name.to_string(),
        }
    }

    /// Linear RGBA8 pixels, for data textures such as normal or roughness maps
    pub fn from_rgba8_linear(name: &str, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            format: TextureFormat::Rgba8Unorm,
            ..Self::from_rgba8(name, width, height, pixels)
        }
    }

    /// Convert RGBA32F pixels to half floats so they stay filterable
    pub fn from_rgba32f(name: &str, width: u32, height: u32, pixels: &[f32]) -> Self {
        let data: Vec<u8> = pixels
            .iter()
            .flat_map(|&v| f32_to_f16_bits(v).to_le_bytes())
            .collect();
        Self {
            width,
            height,
            format: TextureFormat::Rgba16Float,
            data,
            name: name.to_string(),
        }
    }

    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self::from_rgba8(name, 1, 1, color.to_vec())
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// Tangent-space normal pointing straight out of the surface
    pub fn flat_normal() -> Self {
        Self::from_rgba8_linear("flat_normal", 1, 1, vec![128, 128, 255, 255])
    }

    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                data.extend_from_slice(if is_even { &color1 } else { &color2 });
            }
        }
        Self::from_rgba8("checkerboard", size, size, data)
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width * self.height * self.format.bytes_per_pixel()) as usize
    }
}

/// Convert f32 to IEEE 754 half precision bits
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = (bits >> 31) & 1;
    let exp = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x7F_FFFF;

    if exp == 0 {
        (sign << 15) as u16
    } else if exp == 0xFF {
        let nan_bit = if mantissa != 0 { 0x200 } else { 0 };
        ((sign << 15) | 0x7C00 | nan_bit) as u16
    } else {
        let new_exp = exp - 127 + 15;
        if new_exp >= 31 {
            ((sign << 15) | 0x7C00) as u16
        } else if new_exp <= 0 {
            (sign << 15) as u16
        } else {
            ((sign << 15) | ((new_exp as u32) << 10) | (mantissa >> 13)) as u16
        }
    }
}

/// A texture table entry: the GPU image, its default sampling view and the
/// descriptor it was created from
#[derive(Debug, Clone)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
    pub descriptor: TextureDescriptor,
}

impl GpuTexture {
    /// Create a sampled 2D texture and upload `data` into it
    pub fn upload<B: GraphicsBackend>(backend: &mut B, data: &TextureData) -> BackendResult<Self> {
        if !data.is_valid() {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}: {}x{} pixels do not match {} bytes",
                data.name,
                data.width,
                data.height,
                data.data.len()
            )));
        }
        let texture = Self::create(
            backend,
            TextureDescriptor {
                label: Some(data.name.clone()),
                width: data.width,
                height: data.height,
                format: data.format,
                ..Default::default()
            },
        )?;
        backend.write_texture(texture.handle, 0, &data.data, data.width, data.height);
        Ok(texture)
    }

    /// A cube whose six faces are filled with one color
    pub fn solid_cube<B: GraphicsBackend>(backend: &mut B, name: &str, color: [f32; 4]) -> BackendResult<Self> {
        let texture = Self::create(
            backend,
            TextureDescriptor {
                label: Some(name.to_string()),
                dimension: TextureDimension::Cube,
                format: TextureFormat::Rgba16Float,
                ..Default::default()
            },
        )?;
        let pixel: Vec<u8> = color
            .iter()
            .flat_map(|&v| f32_to_f16_bits(v).to_le_bytes())
            .collect();
        for face in 0..6 {
            backend.write_texture(texture.handle, face, &pixel, 1, 1);
        }
        Ok(texture)
    }

    /// Create a texture and a view covering every mip (and all six faces of
    /// a cube)
    pub fn create<B: GraphicsBackend>(backend: &mut B, descriptor: TextureDescriptor) -> BackendResult<Self> {
        let handle = backend.create_texture(&descriptor)?;
        let view_desc = match descriptor.dimension {
            TextureDimension::D2 => TextureViewDescriptor {
                mip_level_count: descriptor.mip_levels,
                ..TextureViewDescriptor::d2()
            },
            TextureDimension::Cube => TextureViewDescriptor::cube(descriptor.mip_levels),
        };
        let view = match backend.create_texture_view(handle, &view_desc) {
            Ok(view) => view,
            Err(e) => {
                backend.destroy_texture(handle);
                return Err(e);
            }
        };
        Ok(Self {
            handle,
            view,
            descriptor,
        })
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn is_cube(&self) -> bool {
        self.descriptor.dimension == TextureDimension::Cube
    }

    pub fn name(&self) -> &str {
        self.descriptor.label.as_deref().unwrap_or("unnamed")
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        backend.destroy_texture_view(self.view);
        backend.destroy_texture(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    #[test]
    fn test_f16_conversion() {
        assert_eq!(f32_to_f16_bits(0.0), 0);
        assert_eq!(f32_to_f16_bits(1.0), 0x3C00);
        assert_eq!(f32_to_f16_bits(-2.0), 0xC000);
        assert_eq!(f32_to_f16_bits(0.5), 0x3800);
        assert_eq!(f32_to_f16_bits(1.0e6), 0x7C00);
    }

    #[test]
    fn test_rgba32f_becomes_half_float() {
        let data = TextureData::from_rgba32f("hdr", 2, 1, &[1.0; 8]);
        assert_eq!(data.format, TextureFormat::Rgba16Float);
        assert_eq!(data.data.len(), 16);
        assert!(data.is_valid());
    }

    #[test]
    fn test_upload_rejects_mismatched_pixels() {
        let mut backend = RecordingBackend::new(64, 64);
        let data = TextureData::from_rgba8("broken", 4, 4, vec![0; 10]);
        assert!(GpuTexture::upload(&mut backend, &data).is_err());
    }

    #[test]
    fn test_solid_cube_writes_every_face() {
        let mut backend = RecordingBackend::new(64, 64);
        let cube = GpuTexture::solid_cube(&mut backend, "black_cube", [0.0; 4]).unwrap();
        assert!(cube.is_cube());
        let writes = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, crate::backend::RecordedCommand::WriteTexture { .. }))
            .count();
        assert_eq!(writes, 6);
    }
}
