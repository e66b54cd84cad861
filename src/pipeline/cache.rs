//! Render pipelines built on demand from draw state

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::bindings::BindingLayouts;
use crate::resources::{Shader, ShaderID, VertexAttributes};
use std::collections::HashMap;

/// Formats of the attachments a pass renders into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetFormats {
    pub colors: Vec<TextureFormat>,
    pub depth: Option<TextureFormat>,
}

impl TargetFormats {
    pub fn new(colors: &[TextureFormat], depth: Option<TextureFormat>) -> Self {
        Self {
            colors: colors.to_vec(),
            depth,
        }
    }

    pub fn depth_only(depth: TextureFormat) -> Self {
        Self {
            colors: Vec::new(),
            depth: Some(depth),
        }
    }
}

/// Everything that selects a distinct pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub shader: ShaderID,
    /// Interleaving of the vertex buffer being drawn, which may carry more
    /// attributes than the shader reads
    pub buffer_attributes: VertexAttributes,
    pub targets: TargetFormats,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub depth_compare: CompareFunction,
    pub depth_write: bool,
    pub wireframe: bool,
}

/// Pipelines by key. Failed builds are remembered so the error is logged once
/// and later draws with the same state are skipped quietly.
#[derive(Default)]
pub struct PipelineCache {
    pipelines: HashMap<PipelineKey, Option<RenderPipelineHandle>>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        key: &PipelineKey,
        shader: &Shader,
        layouts: &mut BindingLayouts,
    ) -> Option<RenderPipelineHandle> {
        if let Some(cached) = self.pipelines.get(key) {
            return *cached;
        }

        let pipeline = match Self::build(backend, key, shader, layouts) {
            Ok(pipeline) => {
                log::debug!("Created pipeline for shader {} ({:?})", shader.name(), key.topology);
                Some(pipeline)
            }
            Err(e) => {
                log::error!("Pipeline for shader {} failed: {}", shader.name(), e);
                None
            }
        };
        self.pipelines.insert(key.clone(), pipeline);
        pipeline
    }

    fn build<B: GraphicsBackend>(
        backend: &mut B,
        key: &PipelineKey,
        shader: &Shader,
        layouts: &mut BindingLayouts,
    ) -> BackendResult<RenderPipelineHandle> {
        let descriptor = &shader.descriptor;
        let vertex_layout = key
            .buffer_attributes
            .layout_for_shader(descriptor.vertex_attributes)
            .ok_or_else(|| {
                BackendError::PipelineCreationFailed(format!(
                    "vertex buffer {:?} lacks attributes {:?}",
                    key.buffer_attributes, descriptor.vertex_attributes
                ))
            })?;
        let material_layout = layouts.material_layout(backend, &descriptor.texture_slots)?;

        let blend = descriptor.translucent.then(BlendState::alpha_blending);
        let color_targets = if descriptor.has_fragment_stage {
            key.targets
                .colors
                .iter()
                .map(|format| ColorTargetState {
                    format: *format,
                    blend,
                })
                .collect()
        } else {
            Vec::new()
        };

        backend.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some(descriptor.name.to_string()),
            shader: descriptor.source(),
            vertex_entry: "vs_main".to_string(),
            fragment_entry: descriptor.fragment_entry().map(str::to_string),
            vertex_layouts: vec![vertex_layout],
            bind_group_layouts: vec![layouts.view, layouts.object, material_layout],
            primitive_topology: key.topology,
            front_face: FrontFace::Ccw,
            cull_mode: key.cull_mode,
            polygon_mode: if key.wireframe {
                PolygonMode::Line
            } else {
                PolygonMode::Fill
            },
            depth_stencil: key.targets.depth.map(|format| DepthStencilState {
                format,
                depth_write_enabled: key.depth_write,
                depth_compare: key.depth_compare,
            }),
            color_targets,
        })
    }

    pub fn len(&self) -> usize {
        self.pipelines.values().filter(|p| p.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for pipeline in self.pipelines.drain().filter_map(|(_, p)| p) {
            backend.destroy_render_pipeline(pipeline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::resources::builtin_shaders;

    fn shader(name: &str) -> Shader {
        Shader {
            descriptor: builtin_shaders().into_iter().find(|s| s.name == name).unwrap(),
        }
    }

    fn key(shader: ShaderID, buffer_attributes: VertexAttributes) -> PipelineKey {
        PipelineKey {
            shader,
            buffer_attributes,
            targets: TargetFormats::new(&[TextureFormat::Rgba16Float], Some(TextureFormat::Depth32Float)),
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::Back,
            depth_compare: CompareFunction::GreaterEqual,
            depth_write: true,
            wireframe: false,
        }
    }

    #[test]
    fn test_pipelines_are_cached_by_key() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut layouts = BindingLayouts::new(&mut backend).unwrap();
        let mut cache = PipelineCache::new();
        let color = shader("color");
        let attributes = VertexAttributes::POSITION | VertexAttributes::COLOR;

        let a = cache.get_or_create(&mut backend, &key(ShaderID(2), attributes), &color, &mut layouts);
        let b = cache.get_or_create(&mut backend, &key(ShaderID(2), attributes), &color, &mut layouts);
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(backend.live_pipeline_count(), 1);

        let desc = backend.pipeline_descriptor(a.unwrap()).unwrap();
        assert!(desc.color_targets[0].blend.is_some());

        cache.clear(&mut backend);
        assert_eq!(backend.live_pipeline_count(), 0);
    }

    #[test]
    fn test_missing_attributes_fail_once() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut layouts = BindingLayouts::new(&mut backend).unwrap();
        let mut cache = PipelineCache::new();
        let pbr = shader("pbr");

        let k = key(ShaderID(4), VertexAttributes::POSITION);
        assert!(cache.get_or_create(&mut backend, &k, &pbr, &mut layouts).is_none());
        assert!(cache.get_or_create(&mut backend, &k, &pbr, &mut layouts).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_depth_only_shader_has_no_color_targets() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut layouts = BindingLayouts::new(&mut backend).unwrap();
        let mut cache = PipelineCache::new();
        let k = PipelineKey {
            targets: TargetFormats::depth_only(TextureFormat::Depth32Float),
            ..key(ShaderID(16), VertexAttributes::POSITION)
        };
        let pipeline = cache
            .get_or_create(&mut backend, &k, &shader("shadow"), &mut layouts)
            .unwrap();
        let desc = backend.pipeline_descriptor(pipeline).unwrap();
        assert!(desc.color_targets.is_empty());
        assert!(desc.fragment_entry.is_none());
    }
}
