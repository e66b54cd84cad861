//! Vulkan backend implementation
//!
//! Uses dynamic rendering (Vulkan 1.3) so render passes need no
//! `VkRenderPass`/`VkFramebuffer` objects. Pass commands are buffered like the
//! wgpu backend and replayed at `end_render_pass`, after every texture the pass
//! touches has been moved into the right layout.
//!
//! Buffers live in host-visible memory and are written through their mapping.
//! Any write or destroy waits for in-flight work first.

mod conversion;
mod layout;
mod shader;

use crate::backend::readback;
use crate::backend::traits::*;
use crate::backend::types::*;
use ash::khr::{dynamic_rendering, surface, swapchain};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use layout::{SubresourceLayouts, SubresourceRange};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::{BTreeMap, HashMap};
use std::ffi::CString;
use std::sync::Arc;

const SWAPCHAIN_TEXTURE_ID: u64 = 1;
const SWAPCHAIN_VIEW_ID: u64 = 1;

/// Swapchain formats the renderer can target, in order of preference
const SWAPCHAIN_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_SRGB,
    vk::Format::R8G8B8A8_SRGB,
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
];

/// Render command for deferred execution
enum RenderCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    SetViewport { x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32 },
    Draw { vertices: std::ops::Range<u32>, instances: std::ops::Range<u32> },
    DrawIndexed { indices: std::ops::Range<u32>, base_vertex: i32, instances: std::ops::Range<u32> },
}

struct PendingRenderPass {
    descriptor: RenderPassDescriptor,
    commands: Vec<RenderCommand>,
}

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Allocation,
    size: u64,
}

struct VkTexture {
    image: vk::Image,
    /// `None` for swapchain images, which the swapchain owns
    allocation: Option<Allocation>,
    format: TextureFormat,
    width: u32,
    height: u32,
    layouts: SubresourceLayouts,
}

struct VkView {
    view: vk::ImageView,
    texture: u64,
    range: SubresourceRange,
    width: u32,
    height: u32,
    owned: bool,
}

struct VkBindGroup {
    set: vk::DescriptorSet,
    /// Texture views bound in this set; they are moved to a sampling layout
    /// before any pass that binds the set
    views: Vec<u64>,
}

struct VkRenderPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_count: u32,
}

/// Vulkan backend implementation
pub struct VulkanBackend {
    _entry: ash::Entry,
    instance: ash::Instance,
    surface_fn: surface::Instance,
    swapchain_fn: swapchain::Device,
    dynamic_rendering: dynamic_rendering::Device,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    graphics_queue: vk::Queue,
    allocator: Option<Mutex<Allocator>>,

    // Swapchain
    swapchain: vk::SwapchainKHR,
    swapchain_images: Vec<vk::Image>,
    swapchain_image_views: Vec<vk::ImageView>,
    swapchain_format: TextureFormat,
    swapchain_extent: vk::Extent2D,
    swapchain_copyable: bool,
    swapchain_dirty: bool,
    requested_size: (u32, u32),
    current_image_index: u32,

    // Synchronization
    image_available_semaphore: vk::Semaphore,
    render_finished_semaphore: vk::Semaphore,
    in_flight_fence: vk::Fence,
    acquire_pending: bool,
    gpu_busy: bool,

    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    recording: bool,
    pending_render_pass: Option<PendingRenderPass>,

    // Resource storage
    buffers: HashMap<u64, VkBuffer>,
    textures: HashMap<u64, VkTexture>,
    views: HashMap<u64, VkView>,
    samplers: HashMap<u64, vk::Sampler>,
    descriptor_set_layouts: HashMap<u64, vk::DescriptorSetLayout>,
    bind_groups: HashMap<u64, VkBindGroup>,
    render_pipelines: HashMap<u64, VkRenderPipeline>,
    descriptor_pool: vk::DescriptorPool,
    next_id: u64,

    vsync: bool,
    wireframe: bool,
}

fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_fn: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let queue_families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    queue_families.iter().enumerate().find_map(|(index, family)| {
        let supports_graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let supports_surface = unsafe {
            surface_fn
                .get_physical_device_surface_support(physical_device, index as u32, surface)
                .unwrap_or(false)
        };
        (supports_graphics && supports_surface).then_some(index as u32)
    })
}

/// Pick the highest scoring Vulkan 1.3 device that can present to `surface`
fn select_physical_device(
    instance: &ash::Instance,
    surface_fn: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> BackendResult<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

    let mut best = None;
    let mut best_score = 0;
    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        if properties.api_version < vk::API_VERSION_1_3 {
            continue;
        }
        let Some(queue_family) = find_queue_family(instance, device, surface_fn, surface) else {
            continue;
        };

        let mut score = 1;
        if properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += 1000;
        } else if properties.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            score += 100;
        }

        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("Found GPU: {} (type: {:?}, score: {})", name, properties.device_type, score);

        if score > best_score {
            best_score = score;
            best = Some((device, queue_family));
        }
    }

    best.ok_or_else(|| BackendError::InitializationFailed("No suitable Vulkan 1.3 GPU found".into()))
}

impl VulkanBackend {
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"Deferred Renderer")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Deferred Renderer")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let display_handle = window
            .display_handle()
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let extensions = ash_window::enumerate_required_extensions(display_handle.as_raw())
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let instance_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(extensions);

        let instance = unsafe { entry.create_instance(&instance_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let surface_fn = surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let (physical_device, graphics_queue_family) =
            select_physical_device(&instance, &surface_fn, surface)?;

        let supported = unsafe { instance.get_physical_device_features(physical_device) };
        let wireframe = supported.fill_mode_non_solid == vk::TRUE;
        if !wireframe {
            log::warn!("GPU does not support line polygon mode; wireframe will render filled");
        }

        let queue_priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)];
        let device_extensions = [swapchain::NAME.as_ptr(), dynamic_rendering::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default().fill_mode_non_solid(wireframe);
        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features)
            .push_next(&mut vulkan_13_features);

        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let swapchain_fn = swapchain::Device::new(&instance, &device);
        let dynamic_rendering = dynamic_rendering::Device::new(&instance, &device);

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { device.create_command_pool(&pool_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InitializationFailed("No command buffer allocated".into()))?;

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let (image_available_semaphore, render_finished_semaphore, in_flight_fence) = unsafe {
            (
                device.create_semaphore(&semaphore_info, None),
                device.create_semaphore(&semaphore_info, None),
                device.create_fence(&fence_info, None),
            )
        };
        let image_available_semaphore =
            image_available_semaphore.map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        let render_finished_semaphore =
            render_finished_semaphore.map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        let in_flight_fence = in_flight_fence.map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 4096,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLED_IMAGE,
                descriptor_count: 4096,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::SAMPLER,
                descriptor_count: 4096,
            },
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(4096)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&descriptor_pool_info, None) }
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        let size = window.inner_size();
        let mut backend = Self {
            _entry: entry,
            instance,
            surface_fn,
            swapchain_fn,
            dynamic_rendering,
            surface,
            physical_device,
            device,
            graphics_queue,
            allocator: Some(Mutex::new(allocator)),
            swapchain: vk::SwapchainKHR::null(),
            swapchain_images: Vec::new(),
            swapchain_image_views: Vec::new(),
            swapchain_format: TextureFormat::Bgra8UnormSrgb,
            swapchain_extent: vk::Extent2D { width: 0, height: 0 },
            swapchain_copyable: false,
            swapchain_dirty: false,
            requested_size: (size.width.max(1), size.height.max(1)),
            current_image_index: 0,
            image_available_semaphore,
            render_finished_semaphore,
            in_flight_fence,
            acquire_pending: false,
            gpu_busy: false,
            command_pool,
            command_buffer,
            recording: false,
            pending_render_pass: None,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            descriptor_set_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            descriptor_pool,
            next_id: 2,
            vsync,
            wireframe,
        };

        backend.create_swapchain()?;
        Ok(backend)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn create_swapchain(&mut self) -> BackendResult<()> {
        let idle = unsafe { self.device.device_wait_idle() };
        idle.map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;
        self.gpu_busy = false;
        self.swapchain_dirty = false;
        self.textures.remove(&SWAPCHAIN_TEXTURE_ID);
        self.views.remove(&SWAPCHAIN_VIEW_ID);
        for view in self.swapchain_image_views.drain(..) {
            unsafe { self.device.destroy_image_view(view, None) };
        }

        let (capabilities, formats, present_modes) = unsafe {
            let capabilities = self
                .surface_fn
                .get_physical_device_surface_capabilities(self.physical_device, self.surface);
            let formats = self
                .surface_fn
                .get_physical_device_surface_formats(self.physical_device, self.surface);
            let present_modes = self
                .surface_fn
                .get_physical_device_surface_present_modes(self.physical_device, self.surface);
            (capabilities, formats, present_modes)
        };
        let capabilities = capabilities.map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;
        let formats = formats.map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;
        let present_modes = present_modes.map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;

        let surface_format = SWAPCHAIN_FORMATS
            .iter()
            .find_map(|&wanted| {
                formats.iter().find(|f| {
                    f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
                })
            })
            .copied()
            .ok_or_else(|| BackendError::SwapchainCreationFailed("No supported 8-bit surface format".into()))?;
        let format = conversion::format_back(surface_format.format)
            .ok_or_else(|| BackendError::SwapchainCreationFailed("Unsupported surface format".into()))?;

        let present_mode = if self.vsync {
            vk::PresentModeKHR::FIFO
        } else {
            [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
                .into_iter()
                .find(|mode| present_modes.contains(mode))
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let (width, height) = self.requested_size;
        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
                height: height.clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
            }
        };

        let max_images = if capabilities.max_image_count > 0 {
            capabilities.max_image_count
        } else {
            u32::MAX
        };
        let image_count = (capabilities.min_image_count + 1).min(max_images);

        let copyable = capabilities
            .supported_usage_flags
            .contains(vk::ImageUsageFlags::TRANSFER_SRC);
        let mut usage = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        if copyable {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        } else {
            log::warn!("Swapchain images cannot be copied; screenshots are unavailable");
        }

        let old_swapchain = self.swapchain;
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_fn.create_swapchain(&swapchain_info, None) }
            .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_fn.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        self.swapchain_images = unsafe { self.swapchain_fn.get_swapchain_images(swapchain) }
            .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;

        for &image in &self.swapchain_images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { self.device.create_image_view(&view_info, None) }
                .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))?;
            self.swapchain_image_views.push(view);
        }

        self.swapchain_format = format;
        self.swapchain_extent = extent;
        self.swapchain_copyable = copyable;
        log::info!(
            "Vulkan swapchain: {}x{} {:?} {:?}",
            extent.width,
            extent.height,
            format,
            present_mode
        );
        Ok(())
    }

    /// Expose the acquired image under the reserved swapchain handles
    fn insert_swapchain_entries(&mut self, index: u32) -> BackendResult<()> {
        let image = self.swapchain_images.get(index as usize).copied();
        let view = self.swapchain_image_views.get(index as usize).copied();
        let (Some(image), Some(view)) = (image, view) else {
            return Err(BackendError::AcquireImageFailed(format!("Image index {} out of range", index)));
        };

        self.textures.insert(
            SWAPCHAIN_TEXTURE_ID,
            VkTexture {
                image,
                allocation: None,
                format: self.swapchain_format,
                width: self.swapchain_extent.width,
                height: self.swapchain_extent.height,
                layouts: SubresourceLayouts::new(1, 1),
            },
        );
        self.views.insert(
            SWAPCHAIN_VIEW_ID,
            VkView {
                view,
                texture: SWAPCHAIN_TEXTURE_ID,
                range: SubresourceRange::first(),
                width: self.swapchain_extent.width,
                height: self.swapchain_extent.height,
                owned: false,
            },
        );
        Ok(())
    }

    fn allocate_buffer(
        &self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> BackendResult<VkBuffer> {
        let allocator = self.allocator.as_ref().ok_or(BackendError::DeviceLost)?;
        let info = vk::BufferCreateInfo::default()
            .size(size.max(4))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe {
            let buffer = self
                .device
                .create_buffer(&info, None)
                .map_err(|e| BackendError::BufferCreationFailed(e.to_string()))?;
            let requirements = self.device.get_buffer_memory_requirements(buffer);

            let allocation = allocator.lock().allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_buffer(buffer, None);
                    return Err(BackendError::BufferCreationFailed(e.to_string()));
                }
            };

            if let Err(e) = self
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            {
                self.device.destroy_buffer(buffer, None);
                let _ = allocator.lock().free(allocation);
                return Err(BackendError::BufferCreationFailed(e.to_string()));
            }

            Ok(VkBuffer {
                buffer,
                allocation,
                size,
            })
        }
    }

    fn free_buffer(&self, buffer: VkBuffer) {
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
        if let Some(allocator) = &self.allocator {
            if let Err(e) = allocator.lock().free(buffer.allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }

    fn wait_for_gpu(&mut self) -> BackendResult<()> {
        if self.gpu_busy {
            unsafe {
                self.device
                    .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
                    .map_err(|_| BackendError::DeviceLost)?;
            }
            self.gpu_busy = false;
        }
        Ok(())
    }

    fn begin_recording(&mut self) -> BackendResult<()> {
        if self.recording {
            return Ok(());
        }
        self.wait_for_gpu()?;
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| BackendError::SubmitFailed(e.to_string()))?;
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(|e| BackendError::SubmitFailed(e.to_string()))?;
        }
        self.recording = true;
        Ok(())
    }

    /// Submit the frame command buffer. The first submission after an acquire
    /// waits on the image-available semaphore.
    fn submit(&mut self, signal_render_finished: bool) -> BackendResult<()> {
        if !self.recording {
            return Ok(());
        }
        if self.pending_render_pass.is_some() {
            log::warn!("Submitting with an open render pass; closing it");
            self.end_render_pass();
        }
        self.recording = false;

        let wait_semaphores: Vec<vk::Semaphore> = if self.acquire_pending {
            vec![self.image_available_semaphore]
        } else {
            Vec::new()
        };
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];
        let signal_semaphores: Vec<vk::Semaphore> = if signal_render_finished {
            vec![self.render_finished_semaphore]
        } else {
            Vec::new()
        };
        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(|e| BackendError::SubmitFailed(e.to_string()))?;
            self.device
                .reset_fences(&[self.in_flight_fence])
                .map_err(|e| BackendError::SubmitFailed(e.to_string()))?;
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], self.in_flight_fence)
                .map_err(|e| BackendError::SubmitFailed(e.to_string()))?;
        }
        self.acquire_pending = false;
        self.gpu_busy = true;
        Ok(())
    }

    fn submit_and_wait(&mut self) -> BackendResult<()> {
        self.submit(false)?;
        self.wait_for_gpu()
    }

    /// Record and run a short command buffer outside the frame, blocking until done
    fn one_time_commands(
        &mut self,
        record: impl FnOnce(&mut Self, vk::CommandBuffer),
    ) -> BackendResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| BackendError::SubmitFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::SubmitFailed("No command buffer allocated".into()))?;

        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let result = unsafe { self.device.begin_command_buffer(cmd, &begin_info) }
            .map_err(|e| BackendError::SubmitFailed(e.to_string()));

        let result = result.and_then(|_| {
            record(self, cmd);
            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
            let submitted = unsafe {
                self.device
                    .end_command_buffer(cmd)
                    .and_then(|_| {
                        self.device
                            .queue_submit(self.graphics_queue, &[submit_info], vk::Fence::null())
                    })
                    .and_then(|_| self.device.queue_wait_idle(self.graphics_queue))
            };
            submitted.map_err(|e| BackendError::SubmitFailed(e.to_string()))
        });

        unsafe { self.device.free_command_buffers(self.command_pool, &[cmd]) };
        result
    }

    fn transition(&mut self, cmd: vk::CommandBuffer, texture: u64, range: SubresourceRange, new_layout: vk::ImageLayout) {
        let Some(texture) = self.textures.get_mut(&texture) else {
            return;
        };
        let changes = texture.layouts.transition(range, new_layout);
        layout::record_barriers(
            &self.device,
            cmd,
            texture.image,
            conversion::aspect(texture.format),
            &changes,
            new_layout,
        );
    }

    fn transition_view(&mut self, cmd: vk::CommandBuffer, view: u64, new_layout: vk::ImageLayout) {
        if let Some((texture, range)) = self.views.get(&view).map(|v| (v.texture, v.range)) {
            self.transition(cmd, texture, range, new_layout);
        }
    }

    fn upload_texture(&mut self, texture: u64, layer: u32, data: &[u8], width: u32, height: u32) -> BackendResult<()> {
        let (image, format) = self
            .textures
            .get(&texture)
            .map(|t| (t.image, t.format))
            .ok_or_else(|| BackendError::TextureCreationFailed("Unknown texture".into()))?;

        let size = (width * height * format.bytes_per_pixel()) as usize;
        if data.len() < size {
            return Err(BackendError::TextureCreationFailed(format!(
                "{} bytes is too small for {}x{} {:?}",
                data.len(),
                width,
                height,
                format
            )));
        }

        let mut staging = self.allocate_buffer(
            "texture upload",
            size as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        let Some(mapped) = staging.allocation.mapped_slice_mut() else {
            self.free_buffer(staging);
            return Err(BackendError::TextureCreationFailed("Staging buffer is not mapped".into()));
        };
        mapped[..size].copy_from_slice(&data[..size]);

        let staging_buffer = staging.buffer;
        let aspect_mask = conversion::aspect(format);
        let range = SubresourceRange::layer(layer);
        let result = self.one_time_commands(|backend, cmd| {
            backend.transition(cmd, texture, range, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            let region = vk::BufferImageCopy::default()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask,
                    mip_level: 0,
                    base_array_layer: layer,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D { width, height, depth: 1 });
            unsafe {
                backend.device.cmd_copy_buffer_to_image(
                    cmd,
                    staging_buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            backend.transition(cmd, texture, range, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        });

        self.free_buffer(staging);
        result
    }

    fn create_shader_modules(&self, spirv: &[Vec<u32>]) -> BackendResult<Vec<vk::ShaderModule>> {
        let mut modules = Vec::with_capacity(spirv.len());
        for code in spirv {
            let info = vk::ShaderModuleCreateInfo::default().code(code);
            match unsafe { self.device.create_shader_module(&info, None) } {
                Ok(module) => modules.push(module),
                Err(e) => {
                    for module in modules {
                        unsafe { self.device.destroy_shader_module(module, None) };
                    }
                    return Err(BackendError::ShaderCreationFailed(e.to_string()));
                }
            }
        }
        Ok(modules)
    }

    /// Replay buffered pass commands. Descriptor sets are bound lazily at the
    /// next draw so that set and pipeline changes can come in any order.
    fn replay(&self, cmd: vk::CommandBuffer, commands: &[RenderCommand]) {
        let mut pipeline_layout: Option<(vk::PipelineLayout, u32)> = None;
        let mut sets: BTreeMap<u32, vk::DescriptorSet> = BTreeMap::new();
        let mut sets_dirty = false;

        let flush = |sets: &BTreeMap<u32, vk::DescriptorSet>, layout: Option<(vk::PipelineLayout, u32)>| {
            let Some((layout, set_count)) = layout else {
                return;
            };
            for (&index, &set) in sets.range(..set_count) {
                unsafe {
                    self.device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        layout,
                        index,
                        &[set],
                        &[],
                    );
                }
            }
        };

        for command in commands {
            match command {
                RenderCommand::SetPipeline(handle) => {
                    let Some(pipeline) = self.render_pipelines.get(&handle.0) else {
                        log::warn!("Unknown pipeline {:?}", handle);
                        pipeline_layout = None;
                        continue;
                    };
                    unsafe {
                        self.device
                            .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
                    }
                    pipeline_layout = Some((pipeline.layout, pipeline.set_count));
                    sets_dirty = true;
                }
                RenderCommand::SetBindGroup { index, bind_group } => {
                    if let Some(group) = self.bind_groups.get(&bind_group.0) {
                        sets.insert(*index, group.set);
                        sets_dirty = true;
                    }
                }
                RenderCommand::SetVertexBuffer { slot, buffer, offset } => {
                    if let Some(buffer) = self.buffers.get(&buffer.0) {
                        unsafe {
                            self.device
                                .cmd_bind_vertex_buffers(cmd, *slot, &[buffer.buffer], &[*offset]);
                        }
                    }
                }
                RenderCommand::SetIndexBuffer { buffer, offset, format } => {
                    if let Some(buffer) = self.buffers.get(&buffer.0) {
                        unsafe {
                            self.device.cmd_bind_index_buffer(
                                cmd,
                                buffer.buffer,
                                *offset,
                                conversion::index_type(*format),
                            );
                        }
                    }
                }
                RenderCommand::SetViewport { x, y, width, height, min_depth, max_depth } => {
                    let viewport = vk::Viewport {
                        x: *x,
                        y: *y,
                        width: *width,
                        height: *height,
                        min_depth: *min_depth,
                        max_depth: *max_depth,
                    };
                    unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) };
                }
                RenderCommand::Draw { vertices, instances } => {
                    if pipeline_layout.is_none() {
                        continue;
                    }
                    if sets_dirty {
                        flush(&sets, pipeline_layout);
                        sets_dirty = false;
                    }
                    unsafe {
                        self.device.cmd_draw(
                            cmd,
                            vertices.end - vertices.start,
                            instances.end - instances.start,
                            vertices.start,
                            instances.start,
                        );
                    }
                }
                RenderCommand::DrawIndexed { indices, base_vertex, instances } => {
                    if pipeline_layout.is_none() {
                        continue;
                    }
                    if sets_dirty {
                        flush(&sets, pipeline_layout);
                        sets_dirty = false;
                    }
                    unsafe {
                        self.device.cmd_draw_indexed(
                            cmd,
                            indices.end - indices.start,
                            instances.end - instances.start,
                            indices.start,
                            *base_vertex,
                            instances.start,
                        );
                    }
                }
            }
        }
    }
}

impl GraphicsBackend for VulkanBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.requested_size = (width, height);
        if let Err(e) = self.create_swapchain() {
            log::error!("Failed to recreate swapchain: {}", e);
            self.swapchain_dirty = true;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.swapchain_extent.width, self.swapchain_extent.height)
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.swapchain_format
    }

    fn supports_wireframe(&self) -> bool {
        self.wireframe
    }

    fn begin_frame(&mut self) -> BackendResult<SwapchainFrame> {
        self.wait_for_gpu()?;
        if self.swapchain_dirty {
            self.create_swapchain()?;
        }

        let acquired = unsafe {
            self.swapchain_fn.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.image_available_semaphore,
                vk::Fence::null(),
            )
        };
        let (index, suboptimal) = match acquired {
            Ok(acquired) => acquired,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.create_swapchain()?;
                return Err(BackendError::SurfaceLost);
            }
            Err(e) => return Err(BackendError::AcquireImageFailed(e.to_string())),
        };
        if suboptimal {
            self.swapchain_dirty = true;
        }

        self.current_image_index = index;
        self.acquire_pending = true;
        self.insert_swapchain_entries(index)?;
        self.begin_recording()?;

        Ok(SwapchainFrame {
            view: TextureViewHandle(SWAPCHAIN_VIEW_ID),
            texture: TextureHandle(SWAPCHAIN_TEXTURE_ID),
            width: self.swapchain_extent.width,
            height: self.swapchain_extent.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if !self.textures.contains_key(&SWAPCHAIN_TEXTURE_ID) {
            return self.submit(false);
        }

        // A readback mid-frame leaves recording stopped
        self.begin_recording()?;
        if self.pending_render_pass.is_some() {
            self.end_render_pass();
        }
        let cmd = self.command_buffer;
        self.transition(
            cmd,
            SWAPCHAIN_TEXTURE_ID,
            SubresourceRange::first(),
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        self.submit(true)?;

        let wait_semaphores = [self.render_finished_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [self.current_image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let presented = unsafe { self.swapchain_fn.queue_present(self.graphics_queue, &present_info) };

        self.textures.remove(&SWAPCHAIN_TEXTURE_ID);
        self.views.remove(&SWAPCHAIN_VIEW_ID);

        match presented {
            Ok(false) => Ok(()),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.swapchain_dirty = true;
                Ok(())
            }
            Err(e) => Err(BackendError::PresentFailed(e.to_string())),
        }
    }

    fn begin_commands(&mut self) {
        if let Err(e) = self.begin_recording() {
            log::error!("Failed to begin command recording: {}", e);
        }
    }

    fn submit_commands(&mut self) -> BackendResult<()> {
        self.submit_and_wait()
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let location = if desc.usage.contains(BufferUsage::MAP_READ) {
            MemoryLocation::GpuToCpu
        } else {
            MemoryLocation::CpuToGpu
        };
        let buffer = self.allocate_buffer(
            desc.label.as_deref().unwrap_or("buffer"),
            desc.size,
            conversion::buffer_usage(desc.usage),
            location,
        )?;

        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(desc)?;
        self.write_buffer(handle, 0, data);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Err(e) = self.wait_for_gpu() {
            log::error!("Failed to wait before buffer write: {}", e);
            return;
        }
        let Some(buffer) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("Write to unknown buffer {:?}", buffer);
            return;
        };
        let end = offset + data.len() as u64;
        if end > buffer.size {
            log::error!("Buffer write of {} bytes at {} overflows {} bytes", data.len(), offset, buffer.size);
            return;
        }
        match buffer.allocation.mapped_slice_mut() {
            Some(mapped) => mapped[offset as usize..end as usize].copy_from_slice(data),
            None => log::error!("Buffer is not host visible"),
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        let allocator = self.allocator.as_ref().ok_or(BackendError::DeviceLost)?;

        let mip_levels = desc.mip_levels.max(1);
        let array_layers = desc.array_layers();
        let flags = match desc.dimension {
            TextureDimension::D2 => vk::ImageCreateFlags::empty(),
            TextureDimension::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(conversion::format(desc.format))
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(conversion::texture_usage(desc.usage, desc.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, allocation) = unsafe {
            let image = self
                .device
                .create_image(&image_info, None)
                .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;
            let requirements = self.device.get_image_memory_requirements(image);

            let allocation = allocator.lock().allocate(&AllocationCreateDesc {
                name: desc.label.as_deref().unwrap_or("texture"),
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
            let allocation = match allocation {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.device.destroy_image(image, None);
                    return Err(BackendError::TextureCreationFailed(e.to_string()));
                }
            };

            if let Err(e) = self
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
            {
                self.device.destroy_image(image, None);
                let _ = allocator.lock().free(allocation);
                return Err(BackendError::TextureCreationFailed(e.to_string()));
            }
            (image, allocation)
        };

        let id = self.allocate_id();
        self.textures.insert(
            id,
            VkTexture {
                image,
                allocation: Some(allocation),
                format: desc.format,
                width: desc.width,
                height: desc.height,
                layouts: SubresourceLayouts::new(mip_levels, array_layers),
            },
        );
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        if texture.0 == SWAPCHAIN_TEXTURE_ID {
            return Ok(TextureViewHandle(SWAPCHAIN_VIEW_ID));
        }

        let vk_texture = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed(format!("Unknown texture {:?}", texture)))?;

        let range = SubresourceRange {
            base_mip: desc.base_mip_level,
            mip_count: desc.mip_level_count.max(1),
            base_layer: desc.base_array_layer,
            layer_count: desc.array_layer_count.max(1),
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(vk_texture.image)
            .view_type(conversion::view_type(desc.dimension))
            .format(conversion::format(vk_texture.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: conversion::aspect(vk_texture.format),
                base_mip_level: range.base_mip,
                level_count: range.mip_count,
                base_array_layer: range.base_layer,
                layer_count: range.layer_count,
            });
        let view = unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;

        // Views record the size of their base mip so passes can derive a render area
        let (width, height) = (vk_texture.width, vk_texture.height);
        let id = self.allocate_id();
        self.views.insert(
            id,
            VkView {
                view,
                texture: texture.0,
                range,
                width: (width >> desc.base_mip_level).max(1),
                height: (height >> desc.base_mip_level).max(1),
                owned: true,
            },
        );
        Ok(TextureViewHandle(id))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &[u8],
        width: u32,
        height: u32,
    ) {
        if let Err(e) = self.upload_texture(texture.0, layer, data, width, height) {
            log::error!("Failed to upload texture {:?}: {}", texture, e);
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let mut info = vk::SamplerCreateInfo::default()
            .mag_filter(conversion::filter(desc.mag_filter))
            .min_filter(conversion::filter(desc.min_filter))
            .mipmap_mode(conversion::mipmap_mode(desc.mipmap_filter))
            .address_mode_u(conversion::address_mode(desc.address_mode_u))
            .address_mode_v(conversion::address_mode(desc.address_mode_v))
            .address_mode_w(conversion::address_mode(desc.address_mode_w))
            .max_lod(vk::LOD_CLAMP_NONE);
        if let Some(compare) = desc.compare {
            info = info
                .compare_enable(true)
                .compare_op(conversion::compare_op(compare));
        }

        let sampler = unsafe { self.device.create_sampler(&info, None) }
            .map_err(|e| BackendError::TextureCreationFailed(e.to_string()))?;
        let id = self.allocate_id();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.binding)
                    .descriptor_type(conversion::descriptor_type(&entry.ty))
                    .descriptor_count(1)
                    .stage_flags(conversion::shader_stages(entry.visibility))
            })
            .collect();

        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&info, None) }
            .map_err(|e| BackendError::PipelineCreationFailed(e.to_string()))?;

        let id = self.allocate_id();
        self.descriptor_set_layouts.insert(id, layout);
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        enum Info {
            Buffer(vk::DescriptorBufferInfo),
            Image(vk::DescriptorImageInfo, vk::DescriptorType),
        }

        let set_layout = *self
            .descriptor_set_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed(format!("Unknown layout {:?}", layout)))?;

        let mut infos = Vec::with_capacity(entries.len());
        let mut views = Vec::new();
        for (binding, entry) in entries {
            let info = match entry {
                BindGroupEntry::Buffer { buffer, offset, size } => {
                    let vk_buffer = self.buffers.get(&buffer.0).ok_or_else(|| {
                        BackendError::PipelineCreationFailed(format!("Unknown buffer {:?}", buffer))
                    })?;
                    Info::Buffer(vk::DescriptorBufferInfo {
                        buffer: vk_buffer.buffer,
                        offset: *offset,
                        range: size.unwrap_or(vk::WHOLE_SIZE),
                    })
                }
                BindGroupEntry::Texture(view) => {
                    let vk_view = self.views.get(&view.0).ok_or_else(|| {
                        BackendError::PipelineCreationFailed(format!("Unknown texture view {:?}", view))
                    })?;
                    views.push(view.0);
                    Info::Image(
                        vk::DescriptorImageInfo::default()
                            .image_view(vk_view.view)
                            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
                        vk::DescriptorType::SAMPLED_IMAGE,
                    )
                }
                BindGroupEntry::Sampler(sampler) => {
                    let vk_sampler = self.samplers.get(&sampler.0).ok_or_else(|| {
                        BackendError::PipelineCreationFailed(format!("Unknown sampler {:?}", sampler))
                    })?;
                    Info::Image(
                        vk::DescriptorImageInfo::default().sampler(*vk_sampler),
                        vk::DescriptorType::SAMPLER,
                    )
                }
            };
            infos.push((*binding, info));
        }

        let set_layouts = [set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| BackendError::PipelineCreationFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::PipelineCreationFailed("No descriptor set allocated".into()))?;

        let writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .map(|(binding, info)| {
                let write = vk::WriteDescriptorSet::default().dst_set(set).dst_binding(*binding);
                match info {
                    Info::Buffer(buffer) => write
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(std::slice::from_ref(buffer)),
                    Info::Image(image, ty) => write
                        .descriptor_type(*ty)
                        .image_info(std::slice::from_ref(image)),
                }
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };

        let id = self.allocate_id();
        self.bind_groups.insert(id, VkBindGroup { set, views });
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let mut entries = vec![(naga::ShaderStage::Vertex, desc.vertex_entry.as_str())];
        if let Some(fragment_entry) = &desc.fragment_entry {
            entries.push((naga::ShaderStage::Fragment, fragment_entry.as_str()));
        }
        let spirv = shader::compile_wgsl(&desc.shader, &entries)?;

        let entry_names = entries
            .iter()
            .map(|(_, name)| CString::new(*name))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BackendError::ShaderCreationFailed(e.to_string()))?;

        let set_layouts = desc
            .bind_group_layouts
            .iter()
            .map(|handle| {
                self.descriptor_set_layouts.get(&handle.0).copied().ok_or_else(|| {
                    BackendError::PipelineCreationFailed(format!("Unknown layout {:?}", handle))
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let modules = self.create_shader_modules(&spirv)?;
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = entries
            .iter()
            .zip(&modules)
            .zip(&entry_names)
            .map(|((&(stage, _), &module), name)| {
                let stage = match stage {
                    naga::ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
                    _ => vk::ShaderStageFlags::VERTEX,
                };
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(stage)
                    .module(module)
                    .name(name)
            })
            .collect();

        let mut bindings = Vec::new();
        let mut attributes = Vec::new();
        for (binding, layout) in desc.vertex_layouts.iter().enumerate() {
            bindings.push(vk::VertexInputBindingDescription {
                binding: binding as u32,
                stride: layout.array_stride as u32,
                input_rate: vk::VertexInputRate::VERTEX,
            });
            attributes.extend(layout.attributes.iter().map(|attr| vk::VertexInputAttributeDescription {
                location: attr.location,
                binding: binding as u32,
                format: conversion::vertex_format(attr.format),
                offset: attr.offset as u32,
            }));
        }
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(conversion::topology(desc.primitive_topology));

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let polygon_mode = if desc.polygon_mode == PolygonMode::Line && !self.wireframe {
            log::warn!("{:?}: line polygon mode unsupported, using fill", desc.label);
            PolygonMode::Fill
        } else {
            desc.polygon_mode
        };
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(conversion::polygon_mode(polygon_mode))
            .cull_mode(conversion::cull_mode(desc.cull_mode))
            .front_face(conversion::front_face(desc.front_face))
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = match &desc.depth_stencil {
            Some(depth) => vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(true)
                .depth_write_enable(depth.depth_write_enabled)
                .depth_compare_op(conversion::compare_op(depth.depth_compare)),
            None => vk::PipelineDepthStencilStateCreateInfo::default(),
        };

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .color_targets
            .iter()
            .map(|target| conversion::color_blend_attachment(target.blend))
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats: Vec<vk::Format> = desc
            .color_targets
            .iter()
            .map(|target| conversion::format(target.format))
            .collect();
        let depth_format = desc
            .depth_stencil
            .as_ref()
            .map(|depth| conversion::format(depth.format))
            .unwrap_or(vk::Format::UNDEFINED);
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(depth_format);

        let layout_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        let pipeline_layout = match unsafe { self.device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                for module in modules {
                    unsafe { self.device.destroy_shader_module(module, None) };
                }
                return Err(BackendError::PipelineCreationFailed(e.to_string()));
            }
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .push_next(&mut rendering_info);

        let created = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        for module in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }

        let pipeline = match created {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                unsafe { self.device.destroy_pipeline_layout(pipeline_layout, None) };
                return Err(BackendError::PipelineCreationFailed(format!("{:?}: {}", desc.label, e)));
            }
        };
        let Some(pipeline) = pipeline else {
            unsafe { self.device.destroy_pipeline_layout(pipeline_layout, None) };
            return Err(BackendError::PipelineCreationFailed("No pipeline created".into()));
        };

        let id = self.allocate_id();
        self.render_pipelines.insert(
            id,
            VkRenderPipeline {
                pipeline,
                layout: pipeline_layout,
                set_count: set_layouts.len() as u32,
            },
        );
        Ok(RenderPipelineHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.pending_render_pass = Some(PendingRenderPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pending) = self.pending_render_pass.take() else {
            return;
        };
        if !self.recording {
            log::warn!(
                "Render pass {:?} ended outside of a frame or submission",
                pending.descriptor.label
            );
            return;
        }
        let cmd = self.command_buffer;

        // Layout transitions are not allowed inside dynamic rendering
        let sampled: Vec<u64> = pending
            .commands
            .iter()
            .filter_map(|command| match command {
                RenderCommand::SetBindGroup { bind_group, .. } => self.bind_groups.get(&bind_group.0),
                _ => None,
            })
            .flat_map(|group| group.views.iter().copied())
            .collect();
        for view in sampled {
            self.transition_view(cmd, view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        }
        for attachment in &pending.descriptor.color_attachments {
            self.transition_view(cmd, attachment.view.0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        }
        if let Some(depth) = &pending.descriptor.depth_stencil_attachment {
            self.transition_view(cmd, depth.view.0, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        }

        let mut extent = None;
        let mut color_attachments = Vec::with_capacity(pending.descriptor.color_attachments.len());
        for attachment in &pending.descriptor.color_attachments {
            let Some(view) = self.views.get(&attachment.view.0) else {
                log::error!("Render pass {:?}: unknown color view", pending.descriptor.label);
                return;
            };
            extent.get_or_insert(vk::Extent2D {
                width: view.width,
                height: view.height,
            });
            let clear = match attachment.load_op {
                LoadOp::Clear(color) => color,
                LoadOp::Load => [0.0; 4],
            };
            color_attachments.push(
                vk::RenderingAttachmentInfo::default()
                    .image_view(view.view)
                    .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                    .load_op(conversion::load_op(attachment.load_op))
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .clear_value(vk::ClearValue {
                        color: vk::ClearColorValue { float32: clear },
                    }),
            );
        }

        let depth_attachment = match &pending.descriptor.depth_stencil_attachment {
            Some(depth) => {
                let Some(view) = self.views.get(&depth.view.0) else {
                    log::error!("Render pass {:?}: unknown depth view", pending.descriptor.label);
                    return;
                };
                extent.get_or_insert(vk::Extent2D {
                    width: view.width,
                    height: view.height,
                });
                Some(
                    vk::RenderingAttachmentInfo::default()
                        .image_view(view.view)
                        .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                        .load_op(conversion::load_op(depth.depth_load_op))
                        .store_op(vk::AttachmentStoreOp::STORE)
                        .clear_value(vk::ClearValue {
                            depth_stencil: vk::ClearDepthStencilValue {
                                depth: depth.depth_clear_value,
                                stencil: 0,
                            },
                        }),
                )
            }
            None => None,
        };

        let Some(extent) = extent else {
            log::warn!("Render pass {:?} has no attachments", pending.descriptor.label);
            return;
        };
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);
        if let Some(depth) = depth_attachment.as_ref() {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        unsafe {
            self.dynamic_rendering.cmd_begin_rendering(cmd, &rendering_info);
            self.device.cmd_set_viewport(cmd, 0, &[viewport]);
            self.device.cmd_set_scissor(cmd, 0, &[render_area]);
        }
        self.replay(cmd, &pending.commands);
        unsafe { self.dynamic_rendering.cmd_end_rendering(cmd) };
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetVertexBuffer { slot, buffer, offset });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetIndexBuffer { buffer, offset, format });
        }
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetViewport { x, y, width, height, min_depth, max_depth });
        }
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::Draw { vertices, instances });
        }
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::DrawIndexed { indices, base_vertex, instances });
        }
    }

    fn copy_texture_to_texture(
        &mut self,
        src: TextureHandle,
        dst: TextureHandle,
        width: u32,
        height: u32,
    ) {
        if !self.recording {
            log::warn!("Texture copy outside of a frame or submission");
            return;
        }
        let (Some(src_texture), Some(dst_texture)) = (self.textures.get(&src.0), self.textures.get(&dst.0)) else {
            log::warn!("Copy between unknown textures {:?} -> {:?}", src, dst);
            return;
        };
        let (src_image, dst_image) = (src_texture.image, dst_texture.image);
        let src_aspect = conversion::aspect(src_texture.format);
        let dst_aspect = conversion::aspect(dst_texture.format);

        let cmd = self.command_buffer;
        self.transition(cmd, src.0, SubresourceRange::first(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        self.transition(cmd, dst.0, SubresourceRange::first(), vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        let layers = |aspect_mask| vk::ImageSubresourceLayers {
            aspect_mask,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        };
        let region = vk::ImageCopy {
            src_subresource: layers(src_aspect),
            src_offset: vk::Offset3D::default(),
            dst_subresource: layers(dst_aspect),
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D { width, height, depth: 1 },
        };
        unsafe {
            self.device.cmd_copy_image(
                cmd,
                src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        width: u32,
        height: u32,
    ) -> BackendResult<TextureReadback> {
        if texture.0 == SWAPCHAIN_TEXTURE_ID && !self.swapchain_copyable {
            return Err(BackendError::ReadbackFailed("Swapchain images cannot be copied".into()));
        }
        let (image, format) = self
            .textures
            .get(&texture.0)
            .map(|t| (t.image, t.format))
            .ok_or_else(|| BackendError::ReadbackFailed(format!("Unknown texture {:?}", texture)))?;

        let was_recording = self.recording;
        self.begin_recording()?;

        let row = width * format.bytes_per_pixel();
        let staging = self.allocate_buffer(
            "readback",
            (row * height) as u64,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        )?;

        let cmd = self.command_buffer;
        self.transition(cmd, texture.0, SubresourceRange::first(), vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        let region = vk::BufferImageCopy::default()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: conversion::aspect(format),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D { width, height, depth: 1 });
        let host_barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ);
        unsafe {
            self.device.cmd_copy_image_to_buffer(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                staging.buffer,
                &[region],
            );
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[host_barrier],
                &[],
                &[],
            );
        }

        let result = self.submit_and_wait().and_then(|_| {
            let data = staging
                .allocation
                .mapped_slice()
                .ok_or_else(|| BackendError::ReadbackFailed("Readback buffer is not mapped".into()))?;
            readback::pack_rows(format, data, width, height, row)
        });
        self.free_buffer(staging);

        if was_recording {
            self.begin_recording()?;
        }
        result
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Err(e) = self.wait_for_gpu() {
            log::error!("Failed to wait before destroying buffer: {}", e);
        }
        if let Some(buffer) = self.buffers.remove(&buffer.0) {
            self.free_buffer(buffer);
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if texture.0 == SWAPCHAIN_TEXTURE_ID {
            return;
        }
        if let Err(e) = self.wait_for_gpu() {
            log::error!("Failed to wait before destroying texture: {}", e);
        }
        let Some(texture) = self.textures.remove(&texture.0) else {
            return;
        };
        unsafe { self.device.destroy_image(texture.image, None) };
        if let (Some(allocation), Some(allocator)) = (texture.allocation, &self.allocator) {
            if let Err(e) = allocator.lock().free(allocation) {
                log::error!("Failed to free texture memory: {}", e);
            }
        }
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        if view.0 == SWAPCHAIN_VIEW_ID {
            return;
        }
        if let Err(e) = self.wait_for_gpu() {
            log::error!("Failed to wait before destroying view: {}", e);
        }
        if let Some(view) = self.views.remove(&view.0) {
            if view.owned {
                unsafe { self.device.destroy_image_view(view.view, None) };
            }
        }
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if let Err(e) = self.wait_for_gpu() {
            log::error!("Failed to wait before destroying sampler: {}", e);
        }
        if let Some(sampler) = self.samplers.remove(&sampler.0) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        if let Err(e) = self.wait_for_gpu() {
            log::error!("Failed to wait before destroying bind group: {}", e);
        }
        if let Some(group) = self.bind_groups.remove(&bind_group.0) {
            if let Err(e) = unsafe { self.device.free_descriptor_sets(self.descriptor_pool, &[group.set]) } {
                log::error!("Failed to free descriptor set: {}", e);
            }
        }
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if let Err(e) = self.wait_for_gpu() {
            log::error!("Failed to wait before destroying pipeline: {}", e);
        }
        if let Some(pipeline) = self.render_pipelines.remove(&pipeline.0) {
            unsafe {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            if let Some(allocator) = &self.allocator {
                let mut allocator = allocator.lock();
                for (_, buffer) in self.buffers.drain() {
                    self.device.destroy_buffer(buffer.buffer, None);
                    let _ = allocator.free(buffer.allocation);
                }
                for (_, texture) in self.textures.drain() {
                    if let Some(allocation) = texture.allocation {
                        self.device.destroy_image(texture.image, None);
                        let _ = allocator.free(allocation);
                    }
                }
            }

            // The allocator must go before the device
            drop(self.allocator.take());

            for (_, view) in self.views.drain() {
                if view.owned {
                    self.device.destroy_image_view(view.view, None);
                }
            }
            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, pipeline) in self.render_pipelines.drain() {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
            for (_, layout) in self.descriptor_set_layouts.drain() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            self.bind_groups.clear();

            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_semaphore(self.image_available_semaphore, None);
            self.device.destroy_semaphore(self.render_finished_semaphore, None);
            self.device.destroy_fence(self.in_flight_fence, None);

            for &view in &self.swapchain_image_views {
                self.device.destroy_image_view(view, None);
            }
            self.swapchain_fn.destroy_swapchain(self.swapchain, None);

            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}
