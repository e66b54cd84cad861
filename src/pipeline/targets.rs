//! Screen-sized render targets and the shadow map

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::{GpuTexture, SlotTable, TextureID};

pub const GBUFFER_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const LDR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Frame targets live in the texture table so materials can bind them like
/// any other texture. Resizing swaps the GPU texture behind each ID, which
/// keeps the IDs stored in materials valid.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTargets {
    pub width: u32,
    pub height: u32,
    /// position + metallic, normal + roughness, albedo + ao
    pub gbuffer: [TextureID; 3],
    pub gbuffer_depth: TextureID,
    /// Lit HDR color, then tonemapped color ahead of FXAA
    pub offscreen: [TextureID; 2],
    pub offscreen_depth: TextureID,
    pub shadow_map: TextureID,
    pub shadow_map_size: u32,
}

impl FrameTargets {
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        textures: &mut SlotTable<TextureID, GpuTexture>,
        width: u32,
        height: u32,
        shadow_map_size: u32,
    ) -> BackendResult<Self> {
        let (width, height) = (width.max(1), height.max(1));
        let mut create = |label: &str, w: u32, h: u32, format: TextureFormat| -> BackendResult<TextureID> {
            let texture = GpuTexture::create(backend, TextureDescriptor::render_target(label, w, h, format))?;
            Ok(textures.insert_at_lowest_free(texture))
        };

        let gbuffer = [
            create("GBuffer position metallic", width, height, GBUFFER_FORMAT)?,
            create("GBuffer normal roughness", width, height, GBUFFER_FORMAT)?,
            create("GBuffer albedo ao", width, height, GBUFFER_FORMAT)?,
        ];
        let gbuffer_depth = create("GBuffer depth", width, height, DEPTH_FORMAT)?;
        let offscreen = [
            create("Offscreen 0", width, height, HDR_FORMAT)?,
            create("Offscreen 1", width, height, LDR_FORMAT)?,
        ];
        let offscreen_depth = create("Offscreen depth", width, height, DEPTH_FORMAT)?;
        let shadow_map_size = shadow_map_size.max(1);
        let shadow_map = create("Shadow map", shadow_map_size, shadow_map_size, DEPTH_FORMAT)?;

        log::debug!("Created frame targets at {}x{}", width, height);

        Ok(Self {
            width,
            height,
            gbuffer,
            gbuffer_depth,
            offscreen,
            offscreen_depth,
            shadow_map,
            shadow_map_size,
        })
    }

    /// Targets that follow the window size
    pub fn screen_sized(&self) -> [TextureID; 7] {
        [
            self.gbuffer[0],
            self.gbuffer[1],
            self.gbuffer[2],
            self.gbuffer_depth,
            self.offscreen[0],
            self.offscreen[1],
            self.offscreen_depth,
        ]
    }

    /// Recreate every screen-sized target at the new size under its existing
    /// ID. The shadow map and all other textures are left alone. If any
    /// target cannot be created the old ones are all kept.
    pub fn resize<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        textures: &mut SlotTable<TextureID, GpuTexture>,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let (width, height) = (width.max(1), height.max(1));
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }

        let mut created = Vec::with_capacity(7);
        for id in self.screen_sized() {
            let Some(old) = textures.get(id) else {
                log::error!("Frame target {} is missing from the texture table", id);
                continue;
            };
            let descriptor = TextureDescriptor {
                width,
                height,
                ..old.descriptor.clone()
            };
            match GpuTexture::create(backend, descriptor) {
                Ok(texture) => created.push((id, texture)),
                Err(e) => {
                    for (_, texture) in created {
                        texture.destroy(backend);
                    }
                    return Err(e);
                }
            }
        }

        for (id, texture) in created {
            if let Some(old) = textures.insert_at(id, texture) {
                old.destroy(backend);
            }
        }

        log::info!(
            "Resized frame targets from {}x{} to {}x{}",
            self.width,
            self.height,
            width,
            height
        );
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn destroy<B: GraphicsBackend>(&self, backend: &mut B, textures: &mut SlotTable<TextureID, GpuTexture>) {
        for id in self.screen_sized().into_iter().chain(std::iter::once(self.shadow_map)) {
            if let Some(texture) = textures.remove(id) {
                texture.destroy(backend);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    #[test]
    fn test_resize_keeps_ids_and_shadow_map() {
        let mut backend = RecordingBackend::new(800, 600);
        let mut textures = SlotTable::new();
        let mut targets = FrameTargets::create(&mut backend, &mut textures, 800, 600, 1024).unwrap();
        let shadow_handle = textures.get(targets.shadow_map).unwrap().handle;
        let ids = targets.screen_sized();

        targets.resize(&mut backend, &mut textures, 1920, 1080).unwrap();

        assert_eq!(targets.screen_sized(), ids);
        for id in ids {
            let texture = textures.get(id).unwrap();
            assert_eq!((texture.width(), texture.height()), (1920, 1080));
        }
        assert_eq!(textures.get(targets.shadow_map).unwrap().handle, shadow_handle);
        assert_eq!(backend.destroyed_textures().len(), 7);
    }

    #[test]
    fn test_failed_resize_keeps_every_target() {
        let mut backend = RecordingBackend::new(800, 600);
        let mut textures = SlotTable::new();
        let mut targets = FrameTargets::create(&mut backend, &mut textures, 800, 600, 1024).unwrap();
        backend.limit_texture_creations(3);
        let handles: Vec<_> = targets
            .screen_sized()
            .iter()
            .map(|id| textures.get(*id).unwrap().handle)
            .collect();
        let live = backend.live_texture_count();

        assert!(targets.resize(&mut backend, &mut textures, 1920, 1080).is_err());

        assert_eq!((targets.width, targets.height), (800, 600));
        for (id, handle) in targets.screen_sized().iter().zip(handles) {
            let texture = textures.get(*id).unwrap();
            assert_eq!(texture.handle, handle);
            assert_eq!((texture.width(), texture.height()), (800, 600));
        }
        assert_eq!(backend.live_texture_count(), live);
    }

    #[test]
    fn test_formats() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut textures = SlotTable::new();
        let targets = FrameTargets::create(&mut backend, &mut textures, 64, 64, 256).unwrap();
        assert_eq!(textures.get(targets.gbuffer[1]).unwrap().format(), GBUFFER_FORMAT);
        assert_eq!(textures.get(targets.offscreen[1]).unwrap().format(), LDR_FORMAT);
        assert!(textures.get(targets.shadow_map).unwrap().format().is_depth());
        assert_eq!(textures.get(targets.shadow_map).unwrap().width(), 256);
    }
}
