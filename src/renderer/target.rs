use std::sync::{Arc, Mutex};

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use winit::window::Window;

use crate::renderer::config::RenderConfig;
use crate::renderer::device::RenderDevice;
use crate::renderer::swapchain::{Swapchain, choose_present_mode, choose_surface_format};

pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Presentation target of the renderer: the window, its swapchain and the
/// depth buffer that matches the swapchain extent.
pub struct RenderTarget {
    pub window: Arc<Window>,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub swapchain: Swapchain,
    pub depth: DepthImage,
}

impl RenderTarget {
    pub fn new(device: &RenderDevice, window: Arc<Window>, config: &RenderConfig) -> Result<Self> {
        let surface_formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical, device.surface)?
        };
        let surface_present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical, device.surface)?
        };

        let surface_format = choose_surface_format(&surface_formats)?;
        let present_mode = choose_present_mode(&surface_present_modes, config.vsync);
        log::debug!("Surface format {surface_format:?}, present mode {present_mode:?}");

        let swapchain = Swapchain::new(device, surface_format, present_mode, &window, None)?;
        let depth = DepthImage::new(
            device.logical.clone(),
            device.allocator(),
            swapchain.extent,
        )?;

        Ok(Self {
            window,
            surface_format,
            present_mode,
            swapchain,
            depth,
        })
    }

    /// Rebuilds the swapchain and depth buffer at the current window size.
    /// The caller must have drained the GPU first; the old views are
    /// destroyed here. A minimized window is left alone until it comes back.
    pub fn resize(&mut self, device: &RenderDevice) -> Result<()> {
        let size = self.window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }

        let swapchain = Swapchain::new(
            device,
            self.surface_format,
            self.present_mode,
            &self.window,
            Some(self.swapchain.handle),
        )?;
        self.swapchain = swapchain;
        self.depth = DepthImage::new(
            device.logical.clone(),
            device.allocator(),
            self.swapchain.extent,
        )?;

        log::debug!(
            "Resized render target to {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );

        Ok(())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.swapchain.extent;
        extent.width as f32 / extent.height.max(1) as f32
    }

    pub fn viewport(&self) -> vk::Viewport {
        let extent = self.swapchain.extent;
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    pub fn scissor(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.swapchain.extent,
        }
    }
}

/// Device-local depth attachment sized to the swapchain.
pub struct DepthImage {
    pub image: vk::Image,
    pub view: vk::ImageView,

    allocation: Option<Allocation>,
    allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl DepthImage {
    pub fn new(
        device: Arc<ash::Device>,
        allocator: Arc<Mutex<Allocator>>,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let image = {
            let info = vk::ImageCreateInfo::default()
                .format(DEPTH_FORMAT)
                .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
                .extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                })
                .image_type(vk::ImageType::TYPE_2D)
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL);
            unsafe { device.create_image(&info, None) }.wrap_err("vkCreateImage failed")?
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let allocation = allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name: "depth buffer",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::DedicatedImage(image),
            })?;
        unsafe {
            device.bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view = {
            let info = vk::ImageViewCreateInfo::default()
                .view_type(vk::ImageViewType::TYPE_2D)
                .image(image)
                .format(DEPTH_FORMAT)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::DEPTH,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            unsafe { device.create_image_view(&info, None) }.wrap_err("vkCreateImageView failed")?
        };

        Ok(Self {
            image,
            view,
            allocation: Some(allocation),
            allocator,
            device,
        })
    }
}

impl Drop for DepthImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            match self.allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        log::error!("Failed to free depth buffer memory: {e}");
                    }
                }
                Err(e) => log::error!("Failed to lock allocator to free depth buffer: {e}"),
            }
        }
    }
}
