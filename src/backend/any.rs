//! Runtime backend selection
//!
//! [`AnyBackend`] wraps whichever GPU backend [`BackendType`] asks for and
//! forwards every [`GraphicsBackend`] call to it.

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::backend::wgpu_backend::WgpuBackend;
#[cfg(not(target_arch = "wasm32"))]
use crate::backend::vulkan::VulkanBackend;
use crate::BackendType;
use std::ops::Range;
use std::sync::Arc;
use winit::window::Window as WinitWindow;

/// Backend enum to hold either wgpu or Vulkan backend
pub enum AnyBackend {
    Wgpu(WgpuBackend),
    #[cfg(not(target_arch = "wasm32"))]
    Vulkan(VulkanBackend),
}

macro_rules! dispatch {
    ($self:ident.$method:ident($($arg:expr),*)) => {
        match $self {
            AnyBackend::Wgpu(backend) => backend.$method($($arg),*),
            #[cfg(not(target_arch = "wasm32"))]
            AnyBackend::Vulkan(backend) => backend.$method($($arg),*),
        }
    };
}

impl AnyBackend {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new(
        window: Arc<WinitWindow>,
        backend_type: BackendType,
        vsync: bool,
    ) -> BackendResult<Self> {
        match backend_type {
            BackendType::Wgpu => Ok(AnyBackend::Wgpu(WgpuBackend::new(window, vsync)?)),
            BackendType::Vulkan => Ok(AnyBackend::Vulkan(VulkanBackend::new(window, vsync)?)),
        }
    }

    /// Async backend creation, for hosts that cannot block
    pub async fn new_async(
        window: Arc<WinitWindow>,
        backend_type: BackendType,
        vsync: bool,
    ) -> BackendResult<Self> {
        match backend_type {
            BackendType::Wgpu => Ok(AnyBackend::Wgpu(WgpuBackend::new_async(window, vsync).await?)),
            #[cfg(not(target_arch = "wasm32"))]
            BackendType::Vulkan => Ok(AnyBackend::Vulkan(VulkanBackend::new(window, vsync)?)),
            #[cfg(target_arch = "wasm32")]
            BackendType::Vulkan => Err(BackendError::InitializationFailed(
                "Vulkan backend not available on this platform".into(),
            )),
        }
    }

    /// Windowless rendering. Only wgpu can run without a surface.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn headless(backend_type: BackendType, width: u32, height: u32) -> BackendResult<Self> {
        match backend_type {
            BackendType::Wgpu => Ok(AnyBackend::Wgpu(WgpuBackend::headless(width, height)?)),
            BackendType::Vulkan => Err(BackendError::InitializationFailed(
                "Vulkan backend requires a window".into(),
            )),
        }
    }

    pub fn backend_type(&self) -> BackendType {
        match self {
            AnyBackend::Wgpu(_) => BackendType::Wgpu,
            #[cfg(not(target_arch = "wasm32"))]
            AnyBackend::Vulkan(_) => BackendType::Vulkan,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.backend_type() {
            BackendType::Wgpu => "wgpu",
            BackendType::Vulkan => "Vulkan",
        }
    }
}

impl GraphicsBackend for AnyBackend {
    fn resize(&mut self, width: u32, height: u32) {
        dispatch!(self.resize(width, height))
    }

    fn surface_size(&self) -> (u32, u32) {
        dispatch!(self.surface_size())
    }

    fn swapchain_format(&self) -> TextureFormat {
        dispatch!(self.swapchain_format())
    }

    fn supports_wireframe(&self) -> bool {
        dispatch!(self.supports_wireframe())
    }

    fn begin_frame(&mut self) -> BackendResult<SwapchainFrame> {
        dispatch!(self.begin_frame())
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        dispatch!(self.end_frame())
    }

    fn begin_commands(&mut self) {
        dispatch!(self.begin_commands())
    }

    fn submit_commands(&mut self) -> BackendResult<()> {
        dispatch!(self.submit_commands())
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        dispatch!(self.create_buffer(desc))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        dispatch!(self.create_buffer_init(desc, data))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        dispatch!(self.write_buffer(buffer, offset, data))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        dispatch!(self.create_texture(desc))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        dispatch!(self.create_texture_view(texture, desc))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &[u8],
        width: u32,
        height: u32,
    ) {
        dispatch!(self.write_texture(texture, layer, data, width, height))
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        dispatch!(self.create_sampler(desc))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        dispatch!(self.create_bind_group_layout(entries))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        dispatch!(self.create_bind_group(layout, entries))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        dispatch!(self.create_render_pipeline(desc))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        dispatch!(self.begin_render_pass(desc))
    }

    fn end_render_pass(&mut self) {
        dispatch!(self.end_render_pass())
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        dispatch!(self.set_render_pipeline(pipeline))
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        dispatch!(self.set_bind_group(index, bind_group))
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        dispatch!(self.set_vertex_buffer(slot, buffer, offset))
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        dispatch!(self.set_index_buffer(buffer, offset, format))
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        dispatch!(self.set_viewport(x, y, width, height, min_depth, max_depth))
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        dispatch!(self.draw(vertices, instances))
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        dispatch!(self.draw_indexed(indices, base_vertex, instances))
    }

    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        width: u32,
        height: u32,
    ) {
        dispatch!(self.copy_texture_to_texture(src, dst, width, height))
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<TextureReadback> {
        dispatch!(self.read_texture(texture, width, height))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        dispatch!(self.destroy_buffer(buffer))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        dispatch!(self.destroy_texture(texture))
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        dispatch!(self.destroy_texture_view(view))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        dispatch!(self.destroy_sampler(sampler))
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        dispatch!(self.destroy_bind_group(bind_group))
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        dispatch!(self.destroy_render_pipeline(pipeline))
    }
}
