use std::ffi::{CStr, c_char, c_void};
use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};

use ash::vk;
use color_eyre::Result;
use color_eyre::eyre::{OptionExt, WrapErr, eyre};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::renderer::upload::CONSTANT_ALIGNMENT;

const ENABLE_VALIDATION_LAYERS: bool = cfg!(debug_assertions);
const REQUIRED_VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

/// Initializes Vulkan and keeps the instance, device and allocator alive for
/// the lifetime of the renderer.
pub struct RenderDevice {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,

    pub physical: vk::PhysicalDevice,
    pub logical: Arc<ash::Device>,
    pub queue_family_index: u32,
    pub graphics_queue: vk::Queue,

    allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
}

impl RenderDevice {
    pub fn new(window: &Window) -> Result<Self> {
        let entry =
            unsafe { ash::Entry::load() }.wrap_err("Failed to load the Vulkan loader")?;

        let instance = create_instance(&entry, window)?;
        let debug_utils = if ENABLE_VALIDATION_LAYERS {
            Some(create_debug_utils_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )
            .wrap_err("Failed to create window surface")?
        };
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

        let (physical, queue_family_index, properties) =
            select_physical_device(&instance, surface, &surface_loader)?;

        let min_alignment = properties.limits.min_uniform_buffer_offset_alignment;
        if CONSTANT_ALIGNMENT < min_alignment {
            return Err(eyre!(
                "Device requires {min_alignment}-byte uniform alignment, \
                 more than the {CONSTANT_ALIGNMENT} bytes constant buffers use"
            ));
        }

        let logical = create_logical_device(&instance, physical, queue_family_index)?;
        let graphics_queue = unsafe { logical.get_device_queue(queue_family_index, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: logical.clone(),
            physical_device: physical,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .wrap_err("Failed to create GPU memory allocator")?;

        Ok(Self {
            entry,
            instance,
            debug_utils,
            surface,
            surface_loader,
            physical,
            logical: Arc::new(logical),
            queue_family_index,
            graphics_queue,
            allocator: ManuallyDrop::new(Arc::new(Mutex::new(allocator))),
        })
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn allocator(&self) -> Arc<Mutex<Allocator>> {
        Arc::clone(&self.allocator)
    }

    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.logical
                .device_wait_idle()
                .wrap_err("vkDeviceWaitIdle failed")
        }
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.logical.device_wait_idle() {
                log::error!("Failed to drain the device on shutdown: {e}");
            }
            // The allocator logs leaked allocations, so it goes first while
            // the device is still alive.
            ManuallyDrop::drop(&mut self.allocator);
            self.logical.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn create_instance(entry: &ash::Entry, window: &Window) -> Result<ash::Instance> {
    let enabled_layer_names = validation_layers(entry)?
        .iter()
        .map(|layer| layer.as_ptr())
        .collect::<Vec<*const c_char>>();
    let enabled_extension_names = required_instance_extensions(window)?
        .iter()
        .map(|ext| ext.as_ptr())
        .collect::<Vec<*const c_char>>();

    let application_info = vk::ApplicationInfo::default()
        .application_name(c"hillside")
        .api_version(vk::API_VERSION_1_3);
    let mut debug_info = debug_utils_messenger_create_info();
    let mut instance_info = vk::InstanceCreateInfo::default()
        .application_info(&application_info)
        .enabled_layer_names(&enabled_layer_names)
        .enabled_extension_names(&enabled_extension_names);
    if ENABLE_VALIDATION_LAYERS {
        instance_info = instance_info.push_next(&mut debug_info);
    }

    #[cfg(target_os = "macos")]
    let instance_info = instance_info.flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

    unsafe {
        entry
            .create_instance(&instance_info, None)
            .wrap_err("vkCreateInstance failed")
    }
}

fn validation_layers(entry: &ash::Entry) -> Result<Vec<&'static CStr>> {
    if !ENABLE_VALIDATION_LAYERS {
        return Ok(Vec::new());
    }

    let supported = unsafe { entry.enumerate_instance_layer_properties()? };
    let mut layers = Vec::new();
    for layer in REQUIRED_VALIDATION_LAYERS {
        let found = supported
            .iter()
            .any(|props| props.layer_name_as_c_str().is_ok_and(|name| name == *layer));
        if found {
            layers.push(*layer);
        } else {
            log::warn!("Validation layer {layer:?} not available, continuing without it");
        }
    }
    Ok(layers)
}

fn required_instance_extensions(window: &Window) -> Result<Vec<&'static CStr>> {
    let mut exts = ash_window::enumerate_required_extensions(window.display_handle()?.as_raw())?
        .iter()
        .map(|ext| unsafe { CStr::from_ptr(*ext) })
        .collect::<Vec<_>>();

    if ENABLE_VALIDATION_LAYERS {
        exts.push(ash::ext::debug_utils::NAME);
    }

    #[cfg(target_os = "macos")]
    {
        exts.push(ash::khr::portability_enumeration::NAME);
        exts.push(ash::khr::get_physical_device_properties2::NAME);
    }

    Ok(exts)
}

fn required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::swapchain::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_subset::NAME,
    ]
}

fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<(vk::PhysicalDevice, u32, vk::PhysicalDeviceProperties)> {
    let (physical, queue_family_index, properties) = unsafe {
        instance
            .enumerate_physical_devices()?
            .into_iter()
            .filter(|device| {
                let properties = instance.get_physical_device_properties(*device);
                properties.api_version >= vk::API_VERSION_1_3
            })
            .filter(|device| supports_required_extensions(instance, *device))
            .filter_map(|device| {
                // One family carries both rendering and presentation.
                let props = instance.get_physical_device_queue_family_properties(device);
                let queue_family_index = props.iter().enumerate().position(|(i, q)| {
                    let supports_graphics = q.queue_flags.contains(vk::QueueFlags::GRAPHICS);
                    let supports_present = surface_loader
                        .get_physical_device_surface_support(device, i as u32, surface)
                        .unwrap_or(false);
                    supports_graphics && supports_present
                })?;
                Some((device, queue_family_index as u32))
            })
            .min_by_key(|(device, _)| {
                let props = instance.get_physical_device_properties(*device);
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                    vk::PhysicalDeviceType::CPU => 3,
                    vk::PhysicalDeviceType::OTHER => 4,
                    _ => 5,
                }
            })
            .map(|(device, queue_family_index)| {
                let properties = instance.get_physical_device_properties(device);
                (device, queue_family_index, properties)
            })
            .ok_or_eyre("No suitable physical device found")?
    };

    let name = properties.device_name_as_c_str().unwrap_or(c"unknown");
    log::info!("Selected GPU: {name:?}");

    Ok((physical, queue_family_index, properties))
}

fn supports_required_extensions(instance: &ash::Instance, device: vk::PhysicalDevice) -> bool {
    let supported = unsafe {
        instance
            .enumerate_device_extension_properties(device)
            .unwrap_or_default()
    };

    required_device_extensions().iter().all(|required| {
        let found = supported.iter().any(|ext| {
            ext.extension_name_as_c_str()
                .is_ok_and(|name| name == *required)
        });
        if !found {
            log::debug!("Device extension not supported: {required:?}");
        }
        found
    })
}

fn create_logical_device(
    instance: &ash::Instance,
    physical: vk::PhysicalDevice,
    queue_family_index: u32,
) -> Result<ash::Device> {
    let queue_priorities = [1.0];
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family_index)
        .queue_priorities(&queue_priorities)];

    let enabled_extension_names = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect::<Vec<*const c_char>>();

    // Wireframe rendering needs non-solid fill; everything else the frame
    // loop relies on is core 1.2/1.3 behind feature toggles.
    let features = vk::PhysicalDeviceFeatures::default().fill_mode_non_solid(true);
    let mut vulkan12_features =
        vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);
    let mut vulkan13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&enabled_extension_names)
        .enabled_features(&features)
        .push_next(&mut vulkan12_features)
        .push_next(&mut vulkan13_features);

    unsafe {
        instance
            .create_device(physical, &device_create_info, None)
            .wrap_err("vkCreateDevice failed")
    }
}

fn create_debug_utils_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let debug_utils_loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let debug_utils_info = debug_utils_messenger_create_info();
    let debug_utils_messenger = unsafe {
        debug_utils_loader.create_debug_utils_messenger(&debug_utils_info, None)?
    };
    Ok((debug_utils_loader, debug_utils_messenger))
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe { CStr::from_ptr((*p_callback_data).p_message) };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            log::trace!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("{} {:?}", msg_type, msg);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("{} {:?}", msg_type, msg);
        }
        _ => {
            log::info!("{} {:?}", msg_type, msg);
        }
    }

    vk::FALSE
}
