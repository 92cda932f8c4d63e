//! Swapchain, its image views and the framebuffers of the swapchain render pass

use crate::backend::traits::{BackendError, BackendResult};
use ash::vk;

/// Surface objects the swapchain is built against
pub struct SurfaceContext<'a> {
    pub device: &'a ash::Device,
    pub surface_fn: &'a ash::khr::surface::Instance,
    pub swapchain_fn: &'a ash::khr::swapchain::Device,
    pub physical_device: vk::PhysicalDevice,
    pub surface: vk::SurfaceKHR,
}

#[derive(Default)]
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

fn swapchain_error(e: vk::Result) -> BackendError {
    BackendError::SwapchainCreationFailed(e.to_string())
}

/// Pick the surface format, preferring BGRA sRGB
pub fn choose_format(ctx: &SurfaceContext) -> BackendResult<vk::SurfaceFormatKHR> {
    let formats = unsafe {
        ctx.surface_fn
            .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
    }
    .map_err(swapchain_error)?;
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| BackendError::SwapchainCreationFailed("surface reports no formats".into()))
}

impl Swapchain {
    /// Build a swapchain replacing `old`, which is destroyed afterwards
    pub fn create(
        ctx: &SurfaceContext,
        render_pass: vk::RenderPass,
        surface_format: vk::SurfaceFormatKHR,
        width: u32,
        height: u32,
        vsync: bool,
        old: Swapchain,
    ) -> BackendResult<Self> {
        let capabilities = unsafe {
            ctx.surface_fn
                .get_physical_device_surface_capabilities(ctx.physical_device, ctx.surface)
        }
        .map_err(swapchain_error)?;
        let present_modes = unsafe {
            ctx.surface_fn
                .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
        }
        .map_err(swapchain_error)?;

        let present_mode = if vsync {
            vk::PresentModeKHR::FIFO
        } else {
            [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
                .into_iter()
                .find(|mode| present_modes.contains(mode))
                .unwrap_or(vk::PresentModeKHR::FIFO)
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.swapchain);

        let swapchain =
            unsafe { ctx.swapchain_fn.create_swapchain(&create_info, None) }.map_err(swapchain_error)?;
        old.destroy(ctx.device, ctx.swapchain_fn);

        let mut result = Self {
            swapchain,
            format: surface_format.format,
            extent,
            ..Default::default()
        };
        result.images =
            unsafe { ctx.swapchain_fn.get_swapchain_images(swapchain) }.map_err(swapchain_error)?;

        for &image in &result.images {
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
            let view = unsafe { ctx.device.create_image_view(&view_info, None) }
                .map_err(swapchain_error)?;
            result.views.push(view);

            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer = unsafe { ctx.device.create_framebuffer(&framebuffer_info, None) }
                .map_err(|e| BackendError::FramebufferCreationFailed(e.to_string()))?;
            result.framebuffers.push(framebuffer);
        }

        log::info!(
            "Swapchain created: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            result.images.len(),
            present_mode
        );
        Ok(result)
    }

    pub fn destroy(self, device: &ash::Device, swapchain_fn: &ash::khr::swapchain::Device) {
        unsafe {
            for framebuffer in self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            for view in self.views {
                device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                swapchain_fn.destroy_swapchain(self.swapchain, None);
            }
        }
    }
}

/// Single color attachment cleared on load and left ready to present
pub fn create_swapchain_render_pass(
    device: &ash::Device,
    format: vk::Format,
) -> BackendResult<vk::RenderPass> {
    let attachments = [vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)];
    let dependencies = [vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }];
    let info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    unsafe { device.create_render_pass(&info, None) }
        .map_err(|e| BackendError::SwapchainCreationFailed(e.to_string()))
}
