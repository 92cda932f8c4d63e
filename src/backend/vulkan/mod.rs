//! Vulkan backend implementation using ash
//!
//! Memory comes from gpu-allocator. Each pass command buffer is submitted on
//! its own to the single graphics queue, which also runs compute work; the
//! swapchain command buffer carries the frame's semaphores and fence.

mod conversion;
mod instance;
mod swapchain;

use crate::backend::traits::*;
use crate::backend::types::*;
use ash::vk;
use conversion::*;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::HashMap;
use std::ffi::CString;
use std::ops::Range;
use std::sync::Arc;
use swapchain::{SurfaceContext, Swapchain};
use winit::window::Window;

/// Options for creating the Vulkan backend
#[derive(Debug, Clone, Copy)]
pub struct VulkanSettings {
    /// Enable the Khronos validation layer when it is installed
    pub validation: bool,
    pub vsync: bool,
    pub frames_in_flight: u32,
}

impl Default for VulkanSettings {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            vsync: true,
            frames_in_flight: 2,
        }
    }
}

struct VkBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
    label: String,
}

struct VkImage {
    image: vk::Image,
    allocation: Option<Allocation>,
    format: TextureFormat,
}

struct VkPipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
}

struct FrameSync {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

/// Vulkan backend presenting to a winit window
pub struct VulkanBackend {
    _window: Arc<Window>,
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    messenger: Option<vk::DebugUtilsMessengerEXT>,
    debug_labels: Option<ash::ext::debug_utils::Device>,
    surface_fn: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
    limits: DeviceLimits,
    depth_clamp_supported: bool,
    device: ash::Device,
    swapchain_fn: ash::khr::swapchain::Device,
    queue: vk::Queue,
    allocator: Option<Allocator>,
    command_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,

    swapchain: Swapchain,
    surface_format: vk::SurfaceFormatKHR,
    swapchain_render_pass: RenderPassHandle,
    swapchain_dirty: bool,
    vsync: bool,
    frames: Vec<FrameSync>,
    current_frame: usize,
    image_index: Option<u32>,

    next_id: u64,
    buffers: HashMap<BufferHandle, VkBuffer>,
    images: HashMap<ImageHandle, VkImage>,
    image_views: HashMap<ImageViewHandle, vk::ImageView>,
    samplers: HashMap<SamplerHandle, vk::Sampler>,
    set_layouts: HashMap<DescriptorSetLayoutHandle, vk::DescriptorSetLayout>,
    descriptor_sets: HashMap<DescriptorSetHandle, vk::DescriptorSet>,
    render_passes: HashMap<RenderPassHandle, vk::RenderPass>,
    framebuffers: HashMap<FramebufferHandle, vk::Framebuffer>,
    pipelines: HashMap<PipelineHandle, VkPipeline>,
    command_buffers: HashMap<CommandBufferHandle, vk::CommandBuffer>,
    recording: Option<vk::CommandBuffer>,
}

fn init_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::InitializationFailed(e.to_string())
}

fn device_error(e: vk::Result) -> BackendError {
    match e {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        other => BackendError::CommandRecordingFailed(other.to_string()),
    }
}

fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    surface_fn: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Option<u32> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    families.iter().enumerate().find_map(|(index, family)| {
        let flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
        let presents = unsafe {
            surface_fn
                .get_physical_device_surface_support(physical_device, index as u32, surface)
                .unwrap_or(false)
        };
        (family.queue_flags.contains(flags) && presents).then_some(index as u32)
    })
}

impl VulkanBackend {
    /// Create the device, the surface of `window` and its swapchain
    pub fn new(window: Arc<Window>, settings: VulkanSettings) -> BackendResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(init_error)?;
        let display = window.display_handle().map_err(init_error)?.as_raw();
        let window_handle = window.window_handle().map_err(init_error)?.as_raw();

        let bundle = instance::create_instance(&entry, display, settings.validation)?;
        let instance = bundle.instance;

        let surface_fn = ash::khr::surface::Instance::new(&entry, &instance);
        let surface =
            unsafe { ash_window::create_surface(&entry, &instance, display, window_handle, None) }
                .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let candidates = unsafe { instance.enumerate_physical_devices() }.map_err(init_error)?;
        let (physical_device, queue_family) = candidates
            .iter()
            .filter_map(|&pd| {
                find_queue_family(&instance, pd, &surface_fn, surface).map(|family| (pd, family))
            })
            .max_by_key(|(pd, _)| {
                let props = unsafe { instance.get_physical_device_properties(*pd) };
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 2,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    _ => 0,
                }
            })
            .ok_or_else(|| BackendError::InitializationFailed("No suitable physical device".into()))?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_limits = properties.limits;
        let limits = DeviceLimits {
            max_image_dimension_2d: device_limits.max_image_dimension2_d,
            max_compute_work_group_count: device_limits.max_compute_work_group_count,
            max_push_constants_size: device_limits.max_push_constants_size,
            max_bound_descriptor_sets: device_limits.max_bound_descriptor_sets,
        };
        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".into());
        log::info!("Using Vulkan device: {} ({:?})", device_name, properties.device_type);

        let available = unsafe { instance.get_physical_device_features(physical_device) };
        let depth_clamp_supported = available.depth_clamp == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures::default().depth_clamp(depth_clamp_supported);

        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)];
        #[allow(unused_mut)]
        let mut device_extensions = vec![ash::khr::swapchain::NAME.as_ptr()];
        #[cfg(target_os = "macos")]
        device_extensions.push(ash::khr::portability_subset::NAME.as_ptr());

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&device_extensions)
            .enabled_features(&features);
        let device = unsafe { instance.create_device(physical_device, &device_info, None) }
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;
        let queue = unsafe { device.get_device_queue(queue_family, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(init_error)?;

        let swapchain_fn = ash::khr::swapchain::Device::new(&instance, &device);
        let debug_labels = bundle
            .debug_utils
            .as_ref()
            .map(|_| ash::ext::debug_utils::Device::new(&instance, &device));

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool =
            unsafe { device.create_command_pool(&pool_info, None) }.map_err(init_error)?;

        let pool_sizes = [
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::DescriptorType::STORAGE_IMAGE,
        ]
        .map(|ty| vk::DescriptorPoolSize {
            ty,
            descriptor_count: 1000,
        });
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1000)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&descriptor_pool_info, None) }
            .map_err(init_error)?;

        let frames = (0..settings.frames_in_flight.max(1))
            .map(|_| -> BackendResult<FrameSync> {
                let fence_info =
                    vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
                unsafe {
                    Ok(FrameSync {
                        image_available: device
                            .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                            .map_err(init_error)?,
                        render_finished: device
                            .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                            .map_err(init_error)?,
                        in_flight: device.create_fence(&fence_info, None).map_err(init_error)?,
                    })
                }
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let ctx = SurfaceContext {
            device: &device,
            surface_fn: &surface_fn,
            swapchain_fn: &swapchain_fn,
            physical_device,
            surface,
        };
        let surface_format = swapchain::choose_format(&ctx)?;
        let render_pass = swapchain::create_swapchain_render_pass(&device, surface_format.format)?;
        let size = window.inner_size();
        let swapchain = Swapchain::create(
            &ctx,
            render_pass,
            surface_format,
            size.width.max(1),
            size.height.max(1),
            settings.vsync,
            Swapchain::default(),
        )?;

        let mut backend = Self {
            _window: window,
            _entry: entry,
            instance,
            debug_utils: bundle.debug_utils,
            messenger: bundle.messenger,
            debug_labels,
            surface_fn,
            surface,
            physical_device,
            limits,
            depth_clamp_supported,
            device,
            swapchain_fn,
            queue,
            allocator: Some(allocator),
            command_pool,
            descriptor_pool,
            swapchain,
            surface_format,
            swapchain_render_pass: RenderPassHandle(0),
            swapchain_dirty: false,
            vsync: settings.vsync,
            frames,
            current_frame: 0,
            image_index: None,
            next_id: 1,
            buffers: HashMap::new(),
            images: HashMap::new(),
            image_views: HashMap::new(),
            samplers: HashMap::new(),
            set_layouts: HashMap::new(),
            descriptor_sets: HashMap::new(),
            render_passes: HashMap::new(),
            framebuffers: HashMap::new(),
            pipelines: HashMap::new(),
            command_buffers: HashMap::new(),
            recording: None,
        };
        let handle = RenderPassHandle(backend.next_handle());
        backend.render_passes.insert(handle, render_pass);
        backend.swapchain_render_pass = handle;
        Ok(backend)
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn allocator(&mut self) -> BackendResult<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| BackendError::InitializationFailed("allocator already released".into()))
    }

    fn surface_context(&self) -> SurfaceContext<'_> {
        SurfaceContext {
            device: &self.device,
            surface_fn: &self.surface_fn,
            swapchain_fn: &self.swapchain_fn,
            physical_device: self.physical_device,
            surface: self.surface,
        }
    }

    /// Command buffer being recorded, if any
    fn cmd(&self) -> Option<vk::CommandBuffer> {
        if self.recording.is_none() {
            log::warn!("Recording command issued outside of a command buffer");
        }
        self.recording
    }

    fn allocate_buffer(
        &mut self,
        label: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> BackendResult<(vk::Buffer, Allocation)> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size.max(4))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| BackendError::BufferCreationFailed(e.to_string()))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let allocation = self
            .allocator()?
            .allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| BackendError::BufferCreationFailed(e.to_string()))?;
        unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .map_err(|e| BackendError::BufferCreationFailed(e.to_string()))?;
        Ok((buffer, allocation))
    }

    fn free_buffer(&mut self, buffer: vk::Buffer, allocation: Option<Allocation>) {
        unsafe { self.device.destroy_buffer(buffer, None) };
        if let (Some(allocation), Some(allocator)) = (allocation, self.allocator.as_mut()) {
            if let Err(e) = allocator.free(allocation) {
                log::warn!("Failed to free buffer memory: {}", e);
            }
        }
    }

    /// Record into a throwaway command buffer and wait for it to finish
    fn one_time_commands(
        &self,
        record: impl FnOnce(&ash::Device, vk::CommandBuffer),
    ) -> BackendResult<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        unsafe {
            let cmd = self
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(device_error)?
                .into_iter()
                .next()
                .ok_or(BackendError::CommandRecordingFailed("no command buffer allocated".into()))?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            let result = self
                .device
                .begin_command_buffer(cmd, &begin_info)
                .and_then(|_| {
                    record(&self.device, cmd);
                    self.device.end_command_buffer(cmd)
                })
                .and_then(|_| {
                    let command_buffers = [cmd];
                    let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
                    self.device
                        .queue_submit(self.queue, &[submit], vk::Fence::null())
                })
                .and_then(|_| self.device.queue_wait_idle(self.queue));
            self.device.free_command_buffers(self.command_pool, &[cmd]);
            result.map_err(|e| BackendError::SubmitFailed(e.to_string()))
        }
    }

    fn image_barrier(
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: ImageLayout,
        new_layout: ImageLayout,
        range: (Range<u32>, Range<u32>),
    ) -> (vk::ImageMemoryBarrier<'static>, vk::PipelineStageFlags, vk::PipelineStageFlags) {
        let (src_access, src_stage) = layout_src(old_layout);
        let (dst_access, dst_stage) = layout_dst(new_layout);
        let (mips, layers) = range;
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(convert_layout(old_layout))
            .new_layout(convert_layout(new_layout))
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: mips.start,
                level_count: mips.end - mips.start,
                base_array_layer: layers.start,
                layer_count: layers.end - layers.start,
            });
        (barrier, src_stage, dst_stage)
    }
}

impl GraphicsBackend for VulkanBackend {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn surface_extent(&self) -> Extent2D {
        Extent2D::new(self.swapchain.extent.width, self.swapchain.extent.height)
    }

    fn swapchain_format(&self) -> TextureFormat {
        convert_format_back(self.surface_format.format)
    }

    fn frames_in_flight(&self) -> u32 {
        self.frames.len() as u32
    }

    fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
            log::info!("VSync {}", if vsync { "enabled" } else { "disabled" });
            self.vsync = vsync;
            self.swapchain_dirty = true;
        }
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(device_error)
    }

    fn acquire_frame(&mut self) -> BackendResult<AcquireResult> {
        if self.swapchain_dirty {
            return Ok(AcquireResult::NeedsResize);
        }
        let frame = &self.frames[self.current_frame];
        // Frame buffers are single copies: no earlier frame may still read them
        let fences: Vec<vk::Fence> = self.frames.iter().map(|f| f.in_flight).collect();
        unsafe {
            self.device
                .wait_for_fences(&fences, true, u64::MAX)
                .map_err(|e| BackendError::AcquireImageFailed(e.to_string()))?;
            match self.swapchain_fn.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                frame.image_available,
                vk::Fence::null(),
            ) {
                Ok((index, suboptimal)) => {
                    if suboptimal {
                        log::debug!("Swapchain is suboptimal, recreating after this frame");
                    }
                    self.image_index = Some(index);
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    self.swapchain_dirty = true;
                    return Ok(AcquireResult::NeedsResize);
                }
                Err(e) => return Err(BackendError::AcquireImageFailed(e.to_string())),
            }
        }
        Ok(AcquireResult::Acquired {
            frame_index: self.current_frame as u32,
        })
    }

    fn recreate_swapchain(&mut self, extent: Extent2D) -> BackendResult<Extent2D> {
        self.wait_idle()?;
        let surface_format = swapchain::choose_format(&self.surface_context())?;
        if surface_format.format != self.surface_format.format {
            log::warn!(
                "Surface format changed from {:?} to {:?}",
                self.surface_format.format,
                surface_format.format
            );
            let render_pass = swapchain::create_swapchain_render_pass(&self.device, surface_format.format)?;
            if let Some(old) = self.render_passes.insert(self.swapchain_render_pass, render_pass) {
                unsafe { self.device.destroy_render_pass(old, None) };
            }
            self.surface_format = surface_format;
        }
        let render_pass = self
            .render_passes
            .get(&self.swapchain_render_pass)
            .copied()
            .ok_or(BackendError::InvalidHandle("render pass"))?;
        let old = std::mem::take(&mut self.swapchain);
        self.swapchain = Swapchain::create(
            &self.surface_context(),
            render_pass,
            self.surface_format,
            extent.width.max(1),
            extent.height.max(1),
            self.vsync,
            old,
        )?;
        self.swapchain_dirty = false;
        self.image_index = None;
        Ok(self.surface_extent())
    }

    fn present(&mut self) -> BackendResult<bool> {
        let index = self
            .image_index
            .take()
            .ok_or_else(|| BackendError::PresentFailed("no image acquired".into()))?;
        let wait = [self.frames[self.current_frame].render_finished];
        let swapchains = [self.swapchain.swapchain];
        let indices = [index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        match unsafe { self.swapchain_fn.queue_present(self.queue, &present_info) } {
            Ok(false) => Ok(true),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.swapchain_dirty = true;
                Ok(false)
            }
            Err(e) => Err(BackendError::PresentFailed(e.to_string())),
        }
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let label = desc.label.clone().unwrap_or_else(|| "buffer".into());
        let location = if desc.usage.contains(BufferUsage::MAP_READ) {
            MemoryLocation::GpuToCpu
        } else if desc.usage.contains(BufferUsage::MAP_WRITE) || desc.mapped_at_creation {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };
        let usage = convert_buffer_usage(desc.usage) | vk::BufferUsageFlags::TRANSFER_DST;
        let (buffer, allocation) = self.allocate_buffer(&label, desc.size, usage, location)?;
        let handle = BufferHandle(self.next_handle());
        log::trace!("Created buffer '{}' ({} bytes, {:?})", label, desc.size, location);
        self.buffers.insert(
            handle,
            VkBuffer {
                buffer,
                allocation: Some(allocation),
                size: desc.size,
                label,
            },
        );
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let entry = self
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::InvalidHandle("buffer"))?;
        let len = data.len() as u64;
        if offset + len > entry.size {
            return Err(BackendError::BufferWriteOutOfRange {
                label: entry.label.clone(),
                offset,
                len,
                size: entry.size,
            });
        }
        let target = entry.buffer;
        if let Some(mapped) = entry.allocation.as_mut().and_then(|a| a.mapped_slice_mut()) {
            let start = offset as usize;
            mapped[start..start + data.len()].copy_from_slice(data);
            return Ok(());
        }

        let (staging, mut allocation) = self.allocate_buffer(
            "staging",
            len,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        if let Some(mapped) = allocation.mapped_slice_mut() {
            mapped[..data.len()].copy_from_slice(data);
        }
        let result = self.one_time_commands(|device, cmd| unsafe {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: offset,
                size: len,
            };
            device.cmd_copy_buffer(cmd, staging, target, &[region]);
        });
        self.free_buffer(staging, Some(allocation));
        result
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.remove(&buffer) {
            self.free_buffer(entry.buffer, entry.allocation);
        }
    }

    fn create_image(&mut self, info: &ImageCreateInfo) -> BackendResult<ImageHandle> {
        let flags = if info.image_type == ImageType::Cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };
        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_format(info.format))
            .extent(vk::Extent3D {
                width: info.extent.width.max(1),
                height: info.extent.height.max(1),
                depth: 1,
            })
            .mip_levels(info.mip_levels.max(1))
            .array_layers(info.array_layers.max(1))
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(info.usage, info.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| BackendError::ImageCreationFailed(e.to_string()))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let allocation = self
            .allocator()?
            .allocate(&AllocationCreateDesc {
                name: &info.label,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| BackendError::ImageCreationFailed(e.to_string()))?;
        unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(|e| BackendError::ImageCreationFailed(e.to_string()))?;

        let handle = ImageHandle(self.next_handle());
        log::trace!(
            "Created image '{}' {}x{} {:?}",
            info.label,
            info.extent.width,
            info.extent.height,
            info.format
        );
        self.images.insert(
            handle,
            VkImage {
                image,
                allocation: Some(allocation),
                format: info.format,
            },
        );
        Ok(handle)
    }

    fn create_image_view(
        &mut self,
        image: ImageHandle,
        desc: &ImageViewDescriptor,
    ) -> BackendResult<ImageViewHandle> {
        let entry = self
            .images
            .get(&image)
            .ok_or(BackendError::InvalidHandle("image"))?;
        let view_info = vk::ImageViewCreateInfo::default()
            .image(entry.image)
            .view_type(convert_view_type(desc.view_type))
            .format(convert_format(entry.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect_mask(entry.format),
                base_mip_level: desc.base_mip_level,
                level_count: desc.mip_level_count.max(1),
                base_array_layer: desc.base_array_layer,
                layer_count: desc.array_layer_count.max(1),
            });
        let view = unsafe { self.device.create_image_view(&view_info, None) }
            .map_err(|e| BackendError::ImageCreationFailed(e.to_string()))?;
        let handle = ImageViewHandle(self.next_handle());
        self.image_views.insert(handle, view);
        Ok(handle)
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let address_mode = convert_address_mode(desc.address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter(desc.mag_filter))
            .min_filter(convert_filter(desc.min_filter))
            .mipmap_mode(convert_mipmap_mode(desc.mipmap_filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .border_color(convert_border_color(desc.border_color))
            .compare_enable(desc.compare.is_some())
            .compare_op(desc.compare.map(convert_compare_op).unwrap_or(vk::CompareOp::ALWAYS))
            .min_lod(0.0)
            .max_lod(desc.max_lod);
        let sampler = unsafe { self.device.create_sampler(&sampler_info, None) }
            .map_err(|e| BackendError::ImageCreationFailed(e.to_string()))?;
        let handle = SamplerHandle(self.next_handle());
        self.samplers.insert(handle, sampler);
        Ok(handle)
    }

    fn write_image(
        &mut self,
        image: ImageHandle,
        layer: u32,
        data: &[u8],
        extent: Extent2D,
    ) -> BackendResult<()> {
        let (target, format) = self
            .images
            .get(&image)
            .map(|entry| (entry.image, entry.format))
            .ok_or(BackendError::InvalidHandle("image"))?;
        let expected = extent.width as u64 * extent.height as u64 * format.bytes_per_pixel() as u64;
        if data.len() as u64 != expected {
            return Err(BackendError::ImageCreationFailed(format!(
                "expected {} bytes of texel data, got {}",
                expected,
                data.len()
            )));
        }

        let (staging, mut allocation) = self.allocate_buffer(
            "image staging",
            expected,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        let mapped = allocation
            .mapped_slice_mut()
            .map(|mapped| mapped[..data.len()].copy_from_slice(data))
            .is_some();
        if !mapped {
            self.free_buffer(staging, Some(allocation));
            return Err(BackendError::BufferCreationFailed("staging buffer is not mapped".into()));
        }

        let aspect = aspect_mask(format);
        let (barrier, src_stage, dst_stage) = Self::image_barrier(
            target,
            aspect,
            ImageLayout::Undefined,
            ImageLayout::TransferDst,
            (0..1, layer..layer + 1),
        );
        let result = self.one_time_commands(|device, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: aspect,
                    mip_level: 0,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                },
            };
            device.cmd_copy_buffer_to_image(
                cmd,
                staging,
                target,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        });
        self.free_buffer(staging, Some(allocation));
        result
    }

    fn transition_image_layout(
        &mut self,
        image: ImageHandle,
        transition: &ImageTransition,
    ) -> BackendResult<()> {
        let entry = self
            .images
            .get(&image)
            .ok_or(BackendError::InvalidHandle("image"))?;
        let (barrier, src_stage, dst_stage) = Self::image_barrier(
            entry.image,
            aspect_mask(entry.format),
            transition.old_layout,
            transition.new_layout,
            (0..transition.mip_levels.max(1), 0..transition.array_layers.max(1)),
        );
        self.one_time_commands(|device, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })
    }

    fn destroy_image_view(&mut self, view: ImageViewHandle) {
        if let Some(view) = self.image_views.remove(&view) {
            unsafe { self.device.destroy_image_view(view, None) };
        }
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        if let Some(sampler) = self.samplers.remove(&sampler) {
            unsafe { self.device.destroy_sampler(sampler, None) };
        }
    }

    fn destroy_image(&mut self, image: ImageHandle) {
        if let Some(entry) = self.images.remove(&image) {
            unsafe { self.device.destroy_image(entry.image, None) };
            if let (Some(allocation), Some(allocator)) = (entry.allocation, self.allocator.as_mut()) {
                if let Err(e) = allocator.free(allocation) {
                    log::warn!("Failed to free image memory: {}", e);
                }
            }
        }
    }

    fn create_descriptor_set_layout(
        &mut self,
        entries: &[DescriptorSetLayoutEntry],
    ) -> BackendResult<DescriptorSetLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.binding)
                    .descriptor_type(convert_descriptor_type(entry.ty))
                    .descriptor_count(entry.count.max(1))
                    .stage_flags(convert_shader_stages(entry.visibility))
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe { self.device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(|e| BackendError::DescriptorCreationFailed(e.to_string()))?;
        let handle = DescriptorSetLayoutHandle(self.next_handle());
        self.set_layouts.insert(handle, layout);
        Ok(handle)
    }

    fn allocate_descriptor_set(
        &mut self,
        layout: DescriptorSetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let layouts = [*self
            .set_layouts
            .get(&layout)
            .ok_or(BackendError::InvalidHandle("descriptor set layout"))?];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        let set = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| BackendError::DescriptorCreationFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::DescriptorCreationFailed("pool returned no set".into()))?;
        let handle = DescriptorSetHandle(self.next_handle());
        self.descriptor_sets.insert(handle, set);
        Ok(handle)
    }

    fn update_descriptor_set(&mut self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        let Some(&dst_set) = self.descriptor_sets.get(&set) else {
            log::warn!("Update of unknown descriptor set {:?}", set);
            return;
        };

        enum Infos {
            Buffer([vk::DescriptorBufferInfo; 1]),
            Images(Vec<vk::DescriptorImageInfo>),
        }

        let mut resolved = Vec::with_capacity(writes.len());
        for write in writes {
            let infos = match &write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => {
                    let Some(entry) = self.buffers.get(buffer) else {
                        log::warn!("Descriptor write references unknown buffer {:?}", buffer);
                        continue;
                    };
                    Infos::Buffer([vk::DescriptorBufferInfo {
                        buffer: entry.buffer,
                        offset: *offset,
                        range: *range,
                    }])
                }
                DescriptorResource::Images(images) => {
                    let infos: Option<Vec<_>> = images
                        .iter()
                        .map(|info| {
                            let view = *self.image_views.get(&info.view)?;
                            let sampler = match info.sampler {
                                Some(sampler) => *self.samplers.get(&sampler)?,
                                None => vk::Sampler::null(),
                            };
                            Some(vk::DescriptorImageInfo {
                                sampler,
                                image_view: view,
                                image_layout: convert_layout(info.layout),
                            })
                        })
                        .collect();
                    let Some(infos) = infos else {
                        log::warn!("Descriptor write at binding {} references unknown images", write.binding);
                        continue;
                    };
                    Infos::Images(infos)
                }
            };
            resolved.push((write, infos));
        }

        let vk_writes: Vec<vk::WriteDescriptorSet> = resolved
            .iter()
            .map(|(write, infos)| {
                let base = vk::WriteDescriptorSet::default()
                    .dst_set(dst_set)
                    .dst_binding(write.binding)
                    .descriptor_type(convert_descriptor_type(write.ty));
                match infos {
                    Infos::Buffer(info) => base.buffer_info(info),
                    Infos::Images(infos) => base.image_info(infos),
                }
            })
            .collect();
        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_render_pass(&mut self, layout: &RenderPassLayout) -> BackendResult<RenderPassHandle> {
        let describe = |attachment: &AttachmentDescription, working: vk::ImageLayout| {
            let initial = match attachment.load_op {
                LoadOp::Load => working,
                _ => vk::ImageLayout::UNDEFINED,
            };
            vk::AttachmentDescription::default()
                .format(convert_format(attachment.format))
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(convert_load_op(attachment.load_op))
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(initial)
                .final_layout(convert_layout(attachment.final_layout))
        };

        let mut attachments: Vec<vk::AttachmentDescription> = layout
            .color_attachments
            .iter()
            .map(|a| describe(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
            .collect();
        let color_refs: Vec<vk::AttachmentReference> = (0..attachments.len() as u32)
            .map(|attachment| vk::AttachmentReference {
                attachment,
                layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            })
            .collect();
        let depth_ref = layout.depth_attachment.as_ref().map(|depth| {
            attachments.push(describe(depth, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL));
            vk::AttachmentReference {
                attachment: attachments.len() as u32 - 1,
                layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            }
        });

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
        let attachment_access = vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        let shader_stages =
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER;
        let dependencies = [
            vk::SubpassDependency {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage_mask: shader_stages | attachment_stages,
                dst_stage_mask: attachment_stages,
                src_access_mask: vk::AccessFlags::SHADER_READ,
                dst_access_mask: attachment_access,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
            vk::SubpassDependency {
                src_subpass: 0,
                dst_subpass: vk::SUBPASS_EXTERNAL,
                src_stage_mask: attachment_stages,
                dst_stage_mask: shader_stages,
                src_access_mask: attachment_access,
                dst_access_mask: vk::AccessFlags::SHADER_READ,
                dependency_flags: vk::DependencyFlags::BY_REGION,
            },
        ];

        let subpasses = [subpass];
        let info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe { self.device.create_render_pass(&info, None) }
            .map_err(|e| BackendError::PipelineCreationFailed(format!("{}: {}", layout.label, e)))?;
        let handle = RenderPassHandle(self.next_handle());
        self.render_passes.insert(handle, render_pass);
        Ok(handle)
    }

    fn create_framebuffer(
        &mut self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2D,
    ) -> BackendResult<FramebufferHandle> {
        let render_pass = *self
            .render_passes
            .get(&render_pass)
            .ok_or(BackendError::InvalidHandle("render pass"))?;
        let views = attachments
            .iter()
            .map(|view| {
                self.image_views
                    .get(view)
                    .copied()
                    .ok_or(BackendError::InvalidHandle("image view"))
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&views)
            .width(extent.width.max(1))
            .height(extent.height.max(1))
            .layers(1);
        let framebuffer = unsafe { self.device.create_framebuffer(&info, None) }
            .map_err(|e| BackendError::FramebufferCreationFailed(e.to_string()))?;
        let handle = FramebufferHandle(self.next_handle());
        self.framebuffers.insert(handle, framebuffer);
        Ok(handle)
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(framebuffer) = self.framebuffers.remove(&framebuffer) {
            unsafe { self.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    fn swapchain_render_pass(&self) -> RenderPassHandle {
        self.swapchain_render_pass
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let pipeline_error = |e: String| BackendError::PipelineCreationFailed(format!("{}: {}", desc.label, e));
        let render_pass = *self
            .render_passes
            .get(&desc.render_pass)
            .ok_or(BackendError::InvalidHandle("render pass"))?;
        let layout = self.create_pipeline_layout(&desc.set_layouts, &desc.push_constant_ranges)?;

        let mut modules = Vec::with_capacity(desc.stages.len());
        let mut entry_points = Vec::with_capacity(desc.stages.len());
        for stage in &desc.stages {
            let info = vk::ShaderModuleCreateInfo::default().code(&stage.spirv);
            let module = unsafe { self.device.create_shader_module(&info, None) }
                .map_err(|e| pipeline_error(e.to_string()))?;
            modules.push(module);
            entry_points.push(CString::new(stage.entry_point.as_str()).map_err(|e| pipeline_error(e.to_string()))?);
        }
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = desc
            .stages
            .iter()
            .zip(modules.iter().zip(entry_points.iter()))
            .map(|(stage, (module, name))| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(convert_shader_stage(stage.stage))
                    .module(*module)
                    .name(name)
            })
            .collect();

        let (bindings, attributes) = match &desc.vertex_layout {
            Some(layout) => (
                vec![vk::VertexInputBindingDescription {
                    binding: 0,
                    stride: layout.array_stride as u32,
                    input_rate: vk::VertexInputRate::VERTEX,
                }],
                layout
                    .attributes
                    .iter()
                    .map(|attribute| vk::VertexInputAttributeDescription {
                        location: attribute.location,
                        binding: 0,
                        format: convert_vertex_format(attribute.format),
                        offset: attribute.offset as u32,
                    })
                    .collect(),
            ),
            None => (Vec::new(), Vec::new()),
        };
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        if desc.depth_clamp && !self.depth_clamp_supported {
            log::warn!("Pipeline '{}' requests depth clamp, which the device lacks", desc.label);
        }
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(desc.depth_clamp && self.depth_clamp_supported)
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(convert_cull_mode(desc.cull_mode))
            .front_face(convert_front_face(desc.front_face))
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_stencil.depth_test_enabled)
            .depth_write_enable(desc.depth_stencil.depth_write_enabled)
            .depth_compare_op(convert_compare_op(desc.depth_stencil.depth_compare));

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .blend
            .iter()
            .map(|blend| match blend {
                Some(blend) => vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(true)
                    .src_color_blend_factor(convert_blend_factor(blend.color.src_factor))
                    .dst_color_blend_factor(convert_blend_factor(blend.color.dst_factor))
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(convert_blend_factor(blend.alpha.src_factor))
                    .dst_alpha_blend_factor(convert_blend_factor(blend.alpha.dst_factor))
                    .alpha_blend_op(vk::BlendOp::ADD)
                    .color_write_mask(vk::ColorComponentFlags::RGBA),
                None => vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA),
            })
            .collect();
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);
        let result = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        for module in modules {
            unsafe { self.device.destroy_shader_module(module, None) };
        }
        let pipeline = match result {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(pipeline_error(e.to_string()));
            }
        }
        .ok_or_else(|| pipeline_error("driver returned no pipeline".into()))?;

        log::debug!("Created graphics pipeline '{}'", desc.label);
        let handle = PipelineHandle(self.next_handle());
        self.pipelines.insert(
            handle,
            VkPipeline {
                pipeline,
                layout,
                bind_point: vk::PipelineBindPoint::GRAPHICS,
            },
        );
        Ok(handle)
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<PipelineHandle> {
        let pipeline_error = |e: String| BackendError::PipelineCreationFailed(format!("{}: {}", desc.label, e));
        let layout = self.create_pipeline_layout(&desc.set_layouts, &desc.push_constant_ranges)?;
        let module_info = vk::ShaderModuleCreateInfo::default().code(&desc.stage.spirv);
        let module = unsafe { self.device.create_shader_module(&module_info, None) }
            .map_err(|e| pipeline_error(e.to_string()))?;
        let name = CString::new(desc.stage.entry_point.as_str()).map_err(|e| pipeline_error(e.to_string()))?;
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&name);
        let info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);
        let result = unsafe {
            self.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[info], None)
        };
        unsafe { self.device.destroy_shader_module(module, None) };
        let pipeline = match result {
            Ok(pipelines) => pipelines.into_iter().next(),
            Err((_, e)) => {
                unsafe { self.device.destroy_pipeline_layout(layout, None) };
                return Err(pipeline_error(e.to_string()));
            }
        }
        .ok_or_else(|| pipeline_error("driver returned no pipeline".into()))?;

        log::debug!("Created compute pipeline '{}'", desc.label);
        let handle = PipelineHandle(self.next_handle());
        self.pipelines.insert(
            handle,
            VkPipeline {
                pipeline,
                layout,
                bind_point: vk::PipelineBindPoint::COMPUTE,
            },
        );
        Ok(handle)
    }

    fn create_command_buffer(&mut self, _queue: QueueType) -> BackendResult<CommandBufferHandle> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(device_error)?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::CommandRecordingFailed("no command buffer allocated".into()))?;
        let handle = CommandBufferHandle(self.next_handle());
        self.command_buffers.insert(handle, command_buffer);
        Ok(handle)
    }

    fn begin_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        if self.recording.is_some() {
            return Err(BackendError::CommandRecordingFailed(
                "a command buffer is already recording".into(),
            ));
        }
        let cmd = *self
            .command_buffers
            .get(&command_buffer)
            .ok_or(BackendError::InvalidHandle("command buffer"))?;
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin_info) }.map_err(device_error)?;
        self.recording = Some(cmd);
        Ok(())
    }

    fn end_command_buffer(&mut self) -> BackendResult<()> {
        let cmd = self
            .recording
            .take()
            .ok_or_else(|| BackendError::CommandRecordingFailed("no command buffer recording".into()))?;
        unsafe { self.device.end_command_buffer(cmd) }.map_err(device_error)
    }

    fn begin_debug_label(&mut self, name: &str) {
        let (Some(labels), Some(cmd)) = (self.debug_labels.as_ref(), self.recording) else {
            return;
        };
        if let Ok(name) = CString::new(name) {
            let label = vk::DebugUtilsLabelEXT::default().label_name(&name);
            unsafe { labels.cmd_begin_debug_utils_label(cmd, &label) };
        }
    }

    fn end_debug_label(&mut self) {
        if let (Some(labels), Some(cmd)) = (self.debug_labels.as_ref(), self.recording) {
            unsafe { labels.cmd_end_debug_utils_label(cmd) };
        }
    }

    fn begin_render_pass(&mut self, begin: &RenderPassBegin) {
        let Some(cmd) = self.cmd() else { return };
        let (Some(&render_pass), Some(&framebuffer)) = (
            self.render_passes.get(&begin.render_pass),
            self.framebuffers.get(&begin.framebuffer),
        ) else {
            log::warn!("Render pass begin with unknown render pass or framebuffer");
            return;
        };
        let clear_values: Vec<vk::ClearValue> =
            begin.clear_values.iter().copied().map(convert_clear_value).collect();
        let area = begin.render_area;
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: area.x, y: area.y },
                extent: vk::Extent2D {
                    width: area.extent.width,
                    height: area.extent.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE)
        };
    }

    fn begin_swapchain_render_pass(&mut self, clear: [f32; 4]) {
        let Some(cmd) = self.cmd() else { return };
        let Some(framebuffer) = self
            .image_index
            .and_then(|index| self.swapchain.framebuffers.get(index as usize).copied())
        else {
            log::warn!("Swapchain render pass begun without an acquired image");
            return;
        };
        let Some(&render_pass) = self.render_passes.get(&self.swapchain_render_pass) else {
            return;
        };
        let clear_values = [convert_clear_value(ClearValue::Color(clear))];
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: self.swapchain.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE)
        };
    }

    fn end_render_pass(&mut self) {
        if let Some(cmd) = self.cmd() {
            unsafe { self.device.cmd_end_render_pass(cmd) };
        }
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        let Some(cmd) = self.cmd() else { return };
        if let Some(entry) = self.pipelines.get(&pipeline) {
            unsafe {
                self.device
                    .cmd_bind_pipeline(cmd, entry.bind_point, entry.pipeline)
            };
        }
    }

    fn bind_descriptor_sets(
        &mut self,
        pipeline: PipelineHandle,
        first_set: u32,
        sets: &[DescriptorSetHandle],
    ) {
        let Some(cmd) = self.cmd() else { return };
        let Some(entry) = self.pipelines.get(&pipeline) else { return };
        let Some(sets) = sets
            .iter()
            .map(|set| self.descriptor_sets.get(set).copied())
            .collect::<Option<Vec<_>>>()
        else {
            log::warn!("Bind of unknown descriptor set");
            return;
        };
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd,
                entry.bind_point,
                entry.layout,
                first_set,
                &sets,
                &[],
            )
        };
    }

    fn push_constants(
        &mut self,
        pipeline: PipelineHandle,
        stages: ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        let Some(cmd) = self.cmd() else { return };
        if let Some(entry) = self.pipelines.get(&pipeline) {
            unsafe {
                self.device.cmd_push_constants(
                    cmd,
                    entry.layout,
                    convert_shader_stages(stages),
                    offset,
                    data,
                )
            };
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        let Some(cmd) = self.cmd() else { return };
        let viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device.cmd_set_viewport(cmd, 0, &[viewport]) };
    }

    fn set_scissor(&mut self, rect: Rect2D) {
        let Some(cmd) = self.cmd() else { return };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: rect.x, y: rect.y },
            extent: vk::Extent2D {
                width: rect.extent.width,
                height: rect.extent.height,
            },
        };
        unsafe { self.device.cmd_set_scissor(cmd, 0, &[scissor]) };
    }

    fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        let Some(cmd) = self.cmd() else { return };
        if let Some(entry) = self.buffers.get(&buffer) {
            unsafe {
                self.device
                    .cmd_bind_vertex_buffers(cmd, slot, &[entry.buffer], &[offset])
            };
        }
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        let Some(cmd) = self.cmd() else { return };
        if let Some(entry) = self.buffers.get(&buffer) {
            unsafe {
                self.device
                    .cmd_bind_index_buffer(cmd, entry.buffer, offset, convert_index_type(format))
            };
        }
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        let Some(cmd) = self.cmd() else { return };
        unsafe {
            self.device.cmd_draw(
                cmd,
                vertices.end - vertices.start,
                instances.end - instances.start,
                vertices.start,
                instances.start,
            )
        };
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        let Some(cmd) = self.cmd() else { return };
        unsafe {
            self.device.cmd_draw_indexed(
                cmd,
                indices.end - indices.start,
                instances.end - instances.start,
                indices.start,
                base_vertex,
                instances.start,
            )
        };
    }

    fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        let Some(cmd) = self.cmd() else { return };
        unsafe { self.device.cmd_dispatch(cmd, x, y, z) };
    }

    fn pipeline_barrier(&mut self, barrier: &PipelineBarrier) {
        let Some(cmd) = self.cmd() else { return };
        let buffer_barriers: Vec<vk::BufferMemoryBarrier> = barrier
            .buffers
            .iter()
            .filter_map(|b| {
                let entry = self.buffers.get(&b.buffer)?;
                Some(
                    vk::BufferMemoryBarrier::default()
                        .src_access_mask(convert_access(b.src_access))
                        .dst_access_mask(convert_access(b.dst_access))
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(entry.buffer)
                        .offset(b.offset)
                        .size(b.size),
                )
            })
            .collect();
        let image_barriers: Vec<vk::ImageMemoryBarrier> = barrier
            .images
            .iter()
            .filter_map(|b| {
                let entry = self.images.get(&b.image)?;
                let aspect = if b.depth {
                    aspect_mask(entry.format) & !vk::ImageAspectFlags::COLOR
                } else {
                    vk::ImageAspectFlags::COLOR
                };
                Some(
                    vk::ImageMemoryBarrier::default()
                        .src_access_mask(convert_access(b.src_access))
                        .dst_access_mask(convert_access(b.dst_access))
                        .old_layout(convert_layout(b.old_layout))
                        .new_layout(convert_layout(b.new_layout))
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(entry.image)
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: aspect,
                            base_mip_level: b.base_mip_level,
                            level_count: b.mip_level_count.max(1),
                            base_array_layer: 0,
                            layer_count: b.array_layer_count.max(1),
                        }),
                )
            })
            .collect();
        let flags = if barrier.by_region {
            vk::DependencyFlags::BY_REGION
        } else {
            vk::DependencyFlags::empty()
        };
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                convert_stages(barrier.src_stages),
                convert_stages(barrier.dst_stages),
                flags,
                &[],
                &buffer_barriers,
                &image_barriers,
            )
        };
    }

    fn submit(&mut self, _queue: QueueType, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        let command_buffers = [*self
            .command_buffers
            .get(&command_buffer)
            .ok_or(BackendError::InvalidHandle("command buffer"))?];
        let submit = vk::SubmitInfo::default().command_buffers(&command_buffers);
        unsafe {
            self.device
                .queue_submit(self.queue, &[submit], vk::Fence::null())
        }
        .map_err(|e| BackendError::SubmitFailed(e.to_string()))
    }

    fn submit_frame(&mut self, command_buffer: CommandBufferHandle) -> BackendResult<()> {
        let command_buffers = [*self
            .command_buffers
            .get(&command_buffer)
            .ok_or(BackendError::InvalidHandle("command buffer"))?];
        let frame = &self.frames[self.current_frame];
        let wait = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal = [frame.render_finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal);
        unsafe {
            // The fence is only reset once the frame is certain to signal it again
            self.device
                .reset_fences(&[frame.in_flight])
                .map_err(|e| BackendError::SubmitFailed(e.to_string()))?;
            self.device
                .queue_submit(self.queue, &[submit], frame.in_flight)
                .map_err(|e| BackendError::SubmitFailed(e.to_string()))
        }
    }
}

impl VulkanBackend {
    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constant_ranges: &[PushConstantRange],
    ) -> BackendResult<vk::PipelineLayout> {
        let layouts = set_layouts
            .iter()
            .map(|layout| {
                self.set_layouts
                    .get(layout)
                    .copied()
                    .ok_or(BackendError::InvalidHandle("descriptor set layout"))
            })
            .collect::<BackendResult<Vec<_>>>()?;
        let ranges: Vec<vk::PushConstantRange> = push_constant_ranges
            .iter()
            .map(|range| vk::PushConstantRange {
                stage_flags: convert_shader_stages(range.stages),
                offset: range.offset,
                size: range.size,
            })
            .collect();
        let info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&layouts)
            .push_constant_ranges(&ranges);
        unsafe { self.device.create_pipeline_layout(&info, None) }
            .map_err(|e| BackendError::PipelineCreationFailed(e.to_string()))
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            let buffers: Vec<_> = self.buffers.drain().map(|(_, b)| b).collect();
            for buffer in buffers {
                self.free_buffer(buffer.buffer, buffer.allocation);
            }
            let images: Vec<_> = self.images.keys().copied().collect();
            for image in images {
                self.destroy_image(image);
            }
            // Allocations must go before the device
            drop(self.allocator.take());

            for (_, view) in self.image_views.drain() {
                self.device.destroy_image_view(view, None);
            }
            for (_, sampler) in self.samplers.drain() {
                self.device.destroy_sampler(sampler, None);
            }
            for (_, framebuffer) in self.framebuffers.drain() {
                self.device.destroy_framebuffer(framebuffer, None);
            }
            for (_, pipeline) in self.pipelines.drain() {
                self.device.destroy_pipeline(pipeline.pipeline, None);
                self.device.destroy_pipeline_layout(pipeline.layout, None);
            }
            for (_, layout) in self.set_layouts.drain() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
            std::mem::take(&mut self.swapchain).destroy(&self.device, &self.swapchain_fn);
            for (_, render_pass) in self.render_passes.drain() {
                self.device.destroy_render_pass(render_pass, None);
            }

            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);
            for frame in self.frames.drain(..) {
                self.device.destroy_semaphore(frame.image_available, None);
                self.device.destroy_semaphore(frame.render_finished, None);
                self.device.destroy_fence(frame.in_flight, None);
            }

            self.device.destroy_device(None);
            self.surface_fn.destroy_surface(self.surface, None);
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.messenger) {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}
