//! Recording backend for tests and headless development.
//!
//! This backend doesn't touch a GPU. Every resource is tracked by its
//! descriptor and every command is appended to a log that tests can inspect,
//! so the full pass ordering can be exercised without hardware.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;

/// A command captured by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginFrame,
    EndFrame,
    BeginCommands,
    SubmitCommands,
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        data: Vec<u8>,
    },
    WriteTexture {
        texture: TextureHandle,
        layer: u32,
        width: u32,
        height: u32,
    },
    BeginRenderPass(RenderPassDescriptor),
    EndRenderPass,
    SetPipeline(RenderPipelineHandle),
    SetBindGroup {
        index: u32,
        bind_group: BindGroupHandle,
    },
    SetVertexBuffer {
        slot: u32,
        buffer: BufferHandle,
    },
    SetIndexBuffer {
        buffer: BufferHandle,
        format: IndexFormat,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    Draw {
        vertices: std::ops::Range<u32>,
    },
    DrawIndexed {
        indices: std::ops::Range<u32>,
    },
    CopyTextureToTexture {
        src: TextureHandle,
        dst: TextureHandle,
    },
    ReadTexture(TextureHandle),
}

/// A render pass reconstructed from the command log
#[derive(Debug, Clone)]
pub struct RecordedPass {
    pub descriptor: RenderPassDescriptor,
    pub commands: Vec<RecordedCommand>,
}

impl RecordedPass {
    pub fn label(&self) -> &str {
        self.descriptor.label.as_deref().unwrap_or("")
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }))
            .count()
    }

    pub fn pipelines(&self) -> Vec<RenderPipelineHandle> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::SetPipeline(p) => Some(*p),
                _ => None,
            })
            .collect()
    }
}

/// GPU-less backend that records everything it is asked to do
#[derive(Debug)]
pub struct RecordingBackend {
    surface_width: u32,
    surface_height: u32,
    wireframe: bool,
    texture_budget: Option<u32>,
    buffer_budget: Option<u32>,
    fail_next_frame: bool,
    swapchain_texture: TextureHandle,
    swapchain_view: TextureViewHandle,

    buffers: HashMap<u64, BufferDescriptor>,
    textures: HashMap<u64, TextureDescriptor>,
    texture_views: HashMap<u64, (TextureHandle, TextureViewDescriptor)>,
    samplers: HashMap<u64, SamplerDescriptor>,
    bind_group_layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    render_pipelines: HashMap<u64, RenderPipelineDescriptor>,
    destroyed_textures: Vec<TextureHandle>,

    next_id: u64,
    recording: bool,
    in_pass: bool,
    frames_presented: u64,
    commands: Vec<RecordedCommand>,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let mut backend = Self {
            surface_width: width.max(1),
            surface_height: height.max(1),
            wireframe: true,
            texture_budget: None,
            buffer_budget: None,
            fail_next_frame: false,
            swapchain_texture: TextureHandle(0),
            swapchain_view: TextureViewHandle(0),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            samplers: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            destroyed_textures: Vec::new(),
            next_id: 1,
            recording: false,
            in_pass: false,
            frames_presented: 0,
            commands: Vec::new(),
        };

        let id = backend.alloc_id();
        backend.textures.insert(id, backend.swapchain_descriptor());
        backend.swapchain_texture = TextureHandle(id);
        let view_id = backend.alloc_id();
        backend
            .texture_views
            .insert(view_id, (backend.swapchain_texture, TextureViewDescriptor::d2()));
        backend.swapchain_view = TextureViewHandle(view_id);
        backend
    }

    /// Pretend the device lacks line-mode rasterization
    pub fn without_wireframe(mut self) -> Self {
        self.wireframe = false;
        self
    }

    /// Let only `count` more textures be created; later ones fail as if the
    /// device ran out of memory
    pub fn limit_texture_creations(&mut self, count: u32) {
        self.texture_budget = Some(count);
    }

    pub fn limit_buffer_creations(&mut self, count: u32) {
        self.buffer_budget = Some(count);
    }

    /// Make the next `begin_frame` fail as if the surface were outdated
    pub fn fail_next_frame(&mut self) {
        self.fail_next_frame = true;
    }

    fn swapchain_descriptor(&self) -> TextureDescriptor {
        TextureDescriptor {
            label: Some("Swapchain".to_string()),
            format: TextureFormat::Bgra8UnormSrgb,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
            ..TextureDescriptor::render_target(
                "Swapchain",
                self.surface_width,
                self.surface_height,
                TextureFormat::Bgra8UnormSrgb,
            )
        }
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: RecordedCommand) {
        log::trace!("RecordingBackend: {:?}", command);
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Group the command log into render passes, in submission order
    pub fn passes(&self) -> Vec<RecordedPass> {
        let mut passes = Vec::new();
        let mut current: Option<RecordedPass> = None;
        for command in &self.commands {
            match command {
                RecordedCommand::BeginRenderPass(desc) => {
                    current = Some(RecordedPass {
                        descriptor: desc.clone(),
                        commands: Vec::new(),
                    });
                }
                RecordedCommand::EndRenderPass => {
                    if let Some(pass) = current.take() {
                        passes.push(pass);
                    }
                }
                other => {
                    if let Some(pass) = current.as_mut() {
                        pass.commands.push(other.clone());
                    }
                }
            }
        }
        passes
    }

    pub fn pass_labels(&self) -> Vec<String> {
        self.passes().iter().map(|p| p.label().to_string()).collect()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn swapchain_texture(&self) -> TextureHandle {
        self.swapchain_texture
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    pub fn view_texture(&self, view: TextureViewHandle) -> Option<TextureHandle> {
        self.texture_views.get(&view.0).map(|(t, _)| *t)
    }

    pub fn view_descriptor(&self, view: TextureViewHandle) -> Option<&TextureViewDescriptor> {
        self.texture_views.get(&view.0).map(|(_, d)| d)
    }

    pub fn pipeline_descriptor(
        &self,
        pipeline: RenderPipelineHandle,
    ) -> Option<&RenderPipelineDescriptor> {
        self.render_pipelines.get(&pipeline.0)
    }

    pub fn bind_group_entries(&self, bind_group: BindGroupHandle) -> Option<&[(u32, BindGroupEntry)]> {
        self.bind_groups.get(&bind_group.0).map(|e| e.as_slice())
    }

    pub fn buffer_descriptor(&self, buffer: BufferHandle) -> Option<&BufferDescriptor> {
        self.buffers.get(&buffer.0)
    }

    /// Live textures carrying `label`
    pub fn textures_labeled(&self, label: &str) -> Vec<(TextureHandle, &TextureDescriptor)> {
        let mut found: Vec<_> = self
            .textures
            .iter()
            .filter(|(_, d)| d.label.as_deref() == Some(label))
            .map(|(id, d)| (TextureHandle(*id), d))
            .collect();
        found.sort_by_key(|(h, _)| *h);
        found
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.render_pipelines.len()
    }

    pub fn destroyed_textures(&self) -> &[TextureHandle] {
        &self.destroyed_textures
    }
}

/// Take one creation from an optional budget; false once it is used up
fn spend(budget: &mut Option<u32>) -> bool {
    match budget {
        Some(0) => false,
        Some(left) => {
            *left -= 1;
            true
        }
        None => true,
    }
}

impl GraphicsBackend for RecordingBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_width = width;
            self.surface_height = height;
            let desc = self.swapchain_descriptor();
            self.textures.insert(self.swapchain_texture.0, desc);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_width, self.surface_height)
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn supports_wireframe(&self) -> bool {
        self.wireframe
    }

    fn begin_frame(&mut self) -> BackendResult<SwapchainFrame> {
        if std::mem::take(&mut self.fail_next_frame) {
            return Err(BackendError::AcquireImageFailed("surface outdated".into()));
        }
        self.recording = true;
        self.record(RecordedCommand::BeginFrame);
        Ok(SwapchainFrame {
            view: self.swapchain_view,
            texture: self.swapchain_texture,
            width: self.surface_width,
            height: self.surface_height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.in_pass {
            log::error!("RecordingBackend: frame ended inside a render pass");
        }
        self.recording = false;
        self.frames_presented += 1;
        self.record(RecordedCommand::EndFrame);
        Ok(())
    }

    fn begin_commands(&mut self) {
        self.recording = true;
        self.record(RecordedCommand::BeginCommands);
    }

    fn submit_commands(&mut self) -> BackendResult<()> {
        self.recording = false;
        self.record(RecordedCommand::SubmitCommands);
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("RecordingBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        if !spend(&mut self.buffer_budget) {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} is over the buffer budget",
                desc.label
            )));
        }
        let id = self.alloc_id();
        self.buffers.insert(id, desc.clone());
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let mut desc = desc.clone();
        desc.size = desc.size.max(data.len() as u64);
        self.create_buffer(&desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.buffers.get(&buffer.0) {
            Some(desc) if offset + data.len() as u64 <= desc.size => {
                self.record(RecordedCommand::WriteBuffer {
                    buffer,
                    offset,
                    data: data.to_vec(),
                });
            }
            Some(desc) => log::error!(
                "RecordingBackend: write of {} bytes at {} overflows buffer {:?} ({} bytes)",
                data.len(),
                offset,
                desc.label,
                desc.size
            ),
            None => log::error!("RecordingBackend: write to unknown buffer {:?}", buffer),
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "RecordingBackend: creating texture {:?} ({}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.mip_levels
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has a zero dimension",
                desc.label
            )));
        }
        if !spend(&mut self.texture_budget) {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} is over the texture budget",
                desc.label
            )));
        }
        let id = self.alloc_id();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed("Texture not found".into()))?;
        if desc.base_mip_level + desc.mip_level_count > tex.mip_levels
            || desc.base_array_layer + desc.array_layer_count > tex.array_layers()
        {
            return Err(BackendError::TextureCreationFailed(format!(
                "view {:?} out of range for {:?}",
                desc, tex.label
            )));
        }
        let id = self.alloc_id();
        self.texture_views.insert(id, (texture, *desc));
        Ok(TextureViewHandle(id))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        _data: &[u8],
        width: u32,
        height: u32,
    ) {
        self.record(RecordedCommand::WriteTexture {
            texture,
            layer,
            width,
            height,
        });
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("RecordingBackend: creating sampler {:?}", desc.label);
        let id = self.alloc_id();
        self.samplers.insert(id, desc.clone());
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.alloc_id();
        self.bind_group_layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_entries = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed("Layout not found".into()))?;
        if layout_entries.len() != entries.len() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "bind group has {} entries, layout expects {}",
                entries.len(),
                layout_entries.len()
            )));
        }
        let id = self.alloc_id();
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        if desc.polygon_mode == PolygonMode::Line && !self.wireframe {
            return Err(BackendError::PipelineCreationFailed(
                "line polygon mode not supported".into(),
            ));
        }
        log::trace!("RecordingBackend: creating pipeline {:?}", desc.label);
        let id = self.alloc_id();
        self.render_pipelines.insert(id, desc.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if !self.recording {
            log::error!("RecordingBackend: render pass {:?} begun outside recording", desc.label);
        }
        self.in_pass = true;
        self.record(RecordedCommand::BeginRenderPass(desc.clone()));
    }

    fn end_render_pass(&mut self) {
        self.in_pass = false;
        self.record(RecordedCommand::EndRenderPass);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(RecordedCommand::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer { slot, buffer });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer { buffer, format });
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        self.record(RecordedCommand::SetViewport { width, height });
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, _instances: std::ops::Range<u32>) {
        self.record(RecordedCommand::Draw { vertices });
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        _base_vertex: i32,
        _instances: std::ops::Range<u32>,
    ) {
        self.record(RecordedCommand::DrawIndexed { indices });
    }

    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        _width: u32,
        _height: u32,
    ) {
        self.record(RecordedCommand::CopyTextureToTexture { src, dst });
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<TextureReadback> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::ReadbackFailed("Texture not found".into()));
        }
        self.record(RecordedCommand::ReadTexture(texture));
        Ok(TextureReadback {
            width,
            height,
            rgba8: vec![0; (width * height * 4) as usize],
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.destroyed_textures.push(texture);
        }
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(&pipeline.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passes_group_commands() {
        let mut backend = RecordingBackend::new(64, 64);
        let frame = backend.begin_frame().unwrap();
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Clear".into()),
            color_attachments: vec![ColorAttachment {
                view: frame.view,
                load_op: LoadOp::Clear([0.0; 4]),
            }],
            depth_stencil_attachment: None,
        });
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
        backend.end_frame().unwrap();

        let passes = backend.passes();
        assert_eq!(passes.len(), 1);
        assert_eq!(passes[0].label(), "Clear");
        assert_eq!(passes[0].draw_count(), 1);
        assert_eq!(backend.frames_presented(), 1);
    }

    #[test]
    fn test_resize_updates_swapchain_descriptor() {
        let mut backend = RecordingBackend::new(800, 600);
        backend.resize(1920, 1080);
        let desc = backend.texture_descriptor(backend.swapchain_texture()).unwrap();
        assert_eq!((desc.width, desc.height), (1920, 1080));

        backend.resize(0, 1080);
        assert_eq!(backend.surface_size(), (1920, 1080));
    }

    #[test]
    fn test_view_range_is_validated() {
        let mut backend = RecordingBackend::new(8, 8);
        let tex = backend
            .create_texture(&TextureDescriptor::render_target("t", 4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        assert!(backend.create_texture_view(tex, &TextureViewDescriptor::cube(1)).is_err());
        assert!(backend.create_texture_view(tex, &TextureViewDescriptor::d2()).is_ok());
    }

    #[test]
    fn test_destroyed_textures_are_tracked() {
        let mut backend = RecordingBackend::new(8, 8);
        let tex = backend
            .create_texture(&TextureDescriptor::render_target("t", 4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let before = backend.live_texture_count();
        backend.destroy_texture(tex);
        assert_eq!(backend.live_texture_count(), before - 1);
        assert_eq!(backend.destroyed_textures(), &[tex]);
    }
}
