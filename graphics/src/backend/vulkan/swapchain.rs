//! Swap chains over window surfaces, and headless image rings.
//!
//! Back buffers are registered as ordinary textures whose contents are
//! discarded when they leave the present state, so they need no initial
//! layout transition. A window swap chain is recreated in place (keeping
//! its back buffer ids) when the surface reports it out of date or the
//! requested present mode changes; a resize always hands out new ids.

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::SwapChainId;
use crate::error::GraphicsError;
use crate::swapchain::{PresentRequest, SwapChainDescriptor};

use super::conversion::convert_texture_format;
use super::{Objects, TextureObject, VulkanBackend, destroy_texture_object, view_info, vk_error};

/// Present mode implied by a present request.
fn wanted_mode(request: PresentRequest) -> vk::PresentModeKHR {
    if request.sync_interval > 0 {
        vk::PresentModeKHR::FIFO
    } else if request.allow_tearing {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::MAILBOX
    }
}

/// Pick the closest mode the surface offers. FIFO is always available.
fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    wanted: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    let candidates: &[vk::PresentModeKHR] = match wanted {
        vk::PresentModeKHR::IMMEDIATE => {
            &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]
        }
        vk::PresentModeKHR::MAILBOX => &[vk::PresentModeKHR::MAILBOX],
        _ => &[],
    };
    candidates
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&alpha| supported.contains(alpha))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

fn create_binary_semaphores(
    device: &ash::Device,
    count: usize,
) -> Result<Vec<vk::Semaphore>, GraphicsError> {
    (0..count)
        .map(|_| {
            unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }
                .map_err(|e| vk_error("semaphore creation", e))
        })
        .collect()
}

struct WindowPresenter {
    surface: vk::SurfaceKHR,
    swapchain: vk::SwapchainKHR,
    /// Mode the last present request asked for.
    wanted_mode: vk::PresentModeKHR,
    present_mode: vk::PresentModeKHR,
    /// One more than the image count, used round-robin.
    acquire_semaphores: Vec<vk::Semaphore>,
    next_semaphore: usize,
    /// One per image, signaled before that image is presented.
    render_finished: Vec<vk::Semaphore>,
    needs_recreate: bool,
}

enum Presenter {
    Window(WindowPresenter),
    Headless { next_image: u32 },
}

struct Acquired {
    image: u32,
    /// Acquire semaphore no submission has waited on yet.
    wait: Option<vk::Semaphore>,
}

pub(crate) struct SwapChainObject {
    desc: SwapChainDescriptor,
    extent: vk::Extent2D,
    presenter: Presenter,
    back_buffers: Vec<u64>,
    acquired: Option<Acquired>,
}

impl SwapChainObject {
    pub fn back_buffers(&self) -> &[u64] {
        &self.back_buffers
    }

    /// Hand the pending acquire semaphore to the first submission that renders to it.
    pub fn take_acquire_wait(&mut self) -> Option<vk::Semaphore> {
        self.acquired.as_mut().and_then(|acquired| acquired.wait.take())
    }
}

impl VulkanBackend {
    pub(super) fn create_window_swap_chain(
        &self,
        objects: &mut Objects,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        desc: &SwapChainDescriptor,
    ) -> Result<SwapChainObject, GraphicsError> {
        if !self.shared.surface_enabled {
            return Err(GraphicsError::FeatureNotSupported(
                "the Vulkan loader offers no surface extension".to_string(),
            ));
        }
        let surface = unsafe {
            ash_window::create_surface(
                &self.shared.entry,
                &self.shared.instance,
                display,
                window,
                None,
            )
        }
        .map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create surface: {e:?}"))
        })?;

        let supported = unsafe {
            self.shared.surface.get_physical_device_surface_support(
                self.physical_device,
                self.queue_family,
                surface,
            )
        };
        if !matches!(supported, Ok(true)) {
            unsafe { self.shared.surface.destroy_surface(surface, None) };
            return Err(GraphicsError::FeatureNotSupported(
                "queue family cannot present to this surface".to_string(),
            ));
        }

        let mut swap_chain = SwapChainObject {
            desc: *desc,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            presenter: Presenter::Window(WindowPresenter {
                surface,
                swapchain: vk::SwapchainKHR::null(),
                wanted_mode: vk::PresentModeKHR::FIFO,
                present_mode: vk::PresentModeKHR::FIFO,
                acquire_semaphores: Vec::new(),
                next_semaphore: 0,
                render_finished: Vec::new(),
                needs_recreate: false,
            }),
            back_buffers: Vec::new(),
            acquired: None,
        };
        if let Err(e) = self.build_window(objects, &mut swap_chain, true) {
            self.destroy_swap_chain_object(objects, swap_chain);
            return Err(e);
        }
        Ok(swap_chain)
    }

    pub(super) fn create_headless_swap_chain(
        &self,
        objects: &mut Objects,
        desc: &SwapChainDescriptor,
    ) -> Result<SwapChainObject, GraphicsError> {
        let mut swap_chain = SwapChainObject {
            desc: *desc,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            presenter: Presenter::Headless { next_image: 0 },
            back_buffers: Vec::new(),
            acquired: None,
        };
        self.build_headless(objects, &mut swap_chain, true)?;
        log::info!(
            "Created headless swap chain: {}x{} with {} back buffers",
            desc.width,
            desc.height,
            desc.back_buffer_count
        );
        Ok(swap_chain)
    }

    /// (Re)create the Vulkan swapchain of a window swap chain. The device must be idle.
    fn build_window(
        &self,
        objects: &mut Objects,
        swap_chain: &mut SwapChainObject,
        fresh_ids: bool,
    ) -> Result<(), GraphicsError> {
        let desc = swap_chain.desc;
        let Presenter::Window(window) = &mut swap_chain.presenter else {
            return Err(GraphicsError::Internal("not a window swap chain".to_string()));
        };
        let surface_loader = &self.shared.surface;
        let pd = self.physical_device;

        let surface = window.surface;
        let caps = unsafe { surface_loader.get_physical_device_surface_capabilities(pd, surface) }
            .map_err(|e| vk_error("surface capability query", e))?;
        let formats = unsafe { surface_loader.get_physical_device_surface_formats(pd, surface) }
            .map_err(|e| vk_error("surface format query", e))?;
        let modes = unsafe { surface_loader.get_physical_device_surface_present_modes(pd, surface) }
            .map_err(|e| vk_error("present mode query", e))?;

        let format = convert_texture_format(desc.format);
        let surface_format = formats
            .iter()
            .find(|f| f.format == format)
            .copied()
            .ok_or_else(|| {
                GraphicsError::FeatureNotSupported(format!(
                    "surface cannot present {:?}",
                    desc.format
                ))
            })?;
        let present_mode = choose_present_mode(&modes, window.wanted_mode);
        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: desc
                    .width
                    .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: desc
                    .height
                    .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };
        let max_images = if caps.max_image_count == 0 {
            u32::MAX
        } else {
            caps.max_image_count
        };
        let image_count = desc
            .back_buffer_count
            .max(caps.min_image_count)
            .min(max_images);
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | ((vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST)
                & caps.supported_usage_flags);

        let old = window.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(window.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(usage)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(choose_composite_alpha(caps.supported_composite_alpha))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);
        let swapchain = unsafe { self.ctx.swapchain.create_swapchain(&create_info, None) }
            .map_err(|e| vk_error("swap chain creation", e))?;
        if old != vk::SwapchainKHR::null() {
            unsafe { self.ctx.swapchain.destroy_swapchain(old, None) };
        }
        window.swapchain = swapchain;
        window.present_mode = present_mode;
        window.needs_recreate = false;

        let images = unsafe { self.ctx.swapchain.get_swapchain_images(swapchain) }
            .map_err(|e| vk_error("swap chain image query", e))?;

        let device = &self.ctx.device;
        for semaphore in window
            .acquire_semaphores
            .drain(..)
            .chain(window.render_finished.drain(..))
        {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
        window.render_finished = create_binary_semaphores(device, images.len())?;
        window.acquire_semaphores = create_binary_semaphores(device, images.len() + 1)?;
        window.next_semaphore = 0;

        let mut textures = Vec::with_capacity(images.len());
        for image in images {
            let view = unsafe {
                device.create_image_view(
                    &view_info(image, surface_format.format, vk::ImageAspectFlags::COLOR),
                    None,
                )
            }
            .map_err(|e| vk_error("back buffer view creation", e))?;
            textures.push(TextureObject {
                image,
                view,
                allocation: None,
                format: desc.format,
                aspect: vk::ImageAspectFlags::COLOR,
                extent,
                discard_on_present_exit: true,
            });
        }
        log::info!(
            "Created swap chain: {}x{} with {} images, {present_mode:?}",
            extent.width,
            extent.height,
            textures.len()
        );

        swap_chain.extent = extent;
        swap_chain.acquired = None;
        self.replace_back_buffers(objects, &mut swap_chain.back_buffers, textures, fresh_ids)
    }

    /// (Re)create the owned images of a headless swap chain. The device must be idle.
    fn build_headless(
        &self,
        objects: &mut Objects,
        swap_chain: &mut SwapChainObject,
        fresh_ids: bool,
    ) -> Result<(), GraphicsError> {
        let desc = swap_chain.desc;
        let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT
            | vk::ImageUsageFlags::TRANSFER_SRC
            | vk::ImageUsageFlags::TRANSFER_DST;
        let mut textures = Vec::with_capacity(desc.back_buffer_count as usize);
        for index in 0..desc.back_buffer_count {
            let mut texture = self.create_image(
                objects,
                &format!("back buffer {index}"),
                desc.width,
                desc.height,
                desc.format,
                usage,
            )?;
            texture.discard_on_present_exit = true;
            textures.push(texture);
        }
        swap_chain.extent = vk::Extent2D {
            width: desc.width,
            height: desc.height,
        };
        swap_chain.acquired = None;
        swap_chain.presenter = Presenter::Headless { next_image: 0 };
        self.replace_back_buffers(objects, &mut swap_chain.back_buffers, textures, fresh_ids)
    }

    /// Register new back buffers, destroying the ones they replace.
    fn replace_back_buffers(
        &self,
        objects: &mut Objects,
        back_buffers: &mut Vec<u64>,
        textures: Vec<TextureObject>,
        fresh_ids: bool,
    ) -> Result<(), GraphicsError> {
        let old = std::mem::take(back_buffers);
        let reuse = !fresh_ids && old.len() == textures.len();
        let retired: Vec<TextureObject> =
            old.iter().filter_map(|&id| objects.remove_texture(id)).collect();

        for (index, texture) in textures.into_iter().enumerate() {
            let id = if reuse {
                objects.textures.insert(old[index], texture);
                old[index]
            } else {
                objects.insert_texture(texture, None)
            };
            back_buffers.push(id);
        }

        let allocator = objects.allocator()?;
        for texture in retired {
            destroy_texture_object(&self.ctx.device, allocator, texture);
        }
        Ok(())
    }

    /// Run `f` on a swap chain taken out of the object table for the duration.
    fn with_swap_chain<T>(
        &self,
        objects: &mut Objects,
        id: SwapChainId,
        f: impl FnOnce(&mut Objects, &mut SwapChainObject) -> Result<T, GraphicsError>,
    ) -> Result<T, GraphicsError> {
        let mut swap_chain = objects
            .swap_chains
            .remove(&id.0)
            .ok_or_else(|| super::unknown("swap chain", id.0))?;
        let result = f(objects, &mut swap_chain);
        objects.swap_chains.insert(id.0, swap_chain);
        result
    }

    pub(super) fn acquire(
        &self,
        objects: &mut Objects,
        id: SwapChainId,
    ) -> Result<u32, GraphicsError> {
        self.with_swap_chain(objects, id, |objects, swap_chain| {
            self.acquire_image(objects, swap_chain)
        })
    }

    fn acquire_image(
        &self,
        objects: &mut Objects,
        swap_chain: &mut SwapChainObject,
    ) -> Result<u32, GraphicsError> {
        if let Some(acquired) = &swap_chain.acquired {
            return Ok(acquired.image);
        }

        let needs_recreate = match &swap_chain.presenter {
            Presenter::Headless { next_image } => {
                let image = *next_image;
                swap_chain.acquired = Some(Acquired { image, wait: None });
                return Ok(image);
            }
            Presenter::Window(window) => window.needs_recreate,
        };
        if needs_recreate {
            self.recreate(objects, swap_chain)?;
        }

        for attempt in 0..2 {
            let Presenter::Window(window) = &mut swap_chain.presenter else {
                break;
            };
            let semaphore = window.acquire_semaphores[window.next_semaphore];
            let result = unsafe {
                self.ctx.swapchain.acquire_next_image(
                    window.swapchain,
                    u64::MAX,
                    semaphore,
                    vk::Fence::null(),
                )
            };
            match result {
                Ok((image, suboptimal)) => {
                    window.next_semaphore =
                        (window.next_semaphore + 1) % window.acquire_semaphores.len();
                    window.needs_recreate |= suboptimal;
                    swap_chain.acquired = Some(Acquired {
                        image,
                        wait: Some(semaphore),
                    });
                    return Ok(image);
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) if attempt == 0 => {
                    log::debug!("Swap chain out of date on acquire, recreating");
                    self.recreate(objects, swap_chain)?;
                }
                Err(e) => return Err(vk_error("swap chain acquire", e)),
            }
        }
        Err(GraphicsError::SurfaceOutdated)
    }

    /// Rebuild a window swap chain at its current size, keeping back buffer ids.
    fn recreate(
        &self,
        objects: &mut Objects,
        swap_chain: &mut SwapChainObject,
    ) -> Result<(), GraphicsError> {
        unsafe { self.ctx.device.device_wait_idle() }.map_err(|e| vk_error("device wait", e))?;
        self.build_window(objects, swap_chain, false)
    }

    pub(super) fn present_swap_chain(
        &self,
        objects: &mut Objects,
        id: SwapChainId,
        request: PresentRequest,
    ) -> Result<(), GraphicsError> {
        self.with_swap_chain(objects, id, |objects, swap_chain| {
            let image = self.acquire_image(objects, swap_chain)?;
            let acquire_wait = swap_chain.take_acquire_wait();
            swap_chain.acquired = None;

            let count = swap_chain.back_buffers.len() as u32;
            let window = match &mut swap_chain.presenter {
                Presenter::Headless { next_image } => {
                    *next_image = (image + 1) % count.max(1);
                    return Ok(());
                }
                Presenter::Window(window) => window,
            };

            // Presentation waits on binary semaphores only, so bridge the
            // progress timeline into this image's render-finished semaphore.
            let mut waits = Vec::with_capacity(2);
            if objects.submitted > 0 {
                waits.push(
                    vk::SemaphoreSubmitInfo::default()
                        .semaphore(self.progress)
                        .value(objects.submitted)
                        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
                );
            }
            if let Some(semaphore) = acquire_wait {
                waits.push(
                    vk::SemaphoreSubmitInfo::default()
                        .semaphore(semaphore)
                        .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
                );
            }
            let render_finished = window.render_finished[image as usize];
            let signal = vk::SemaphoreSubmitInfo::default()
                .semaphore(render_finished)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
            self.queue_submit(objects, &[], &waits, &[signal])?;

            let wait_semaphores = [render_finished];
            let swapchains = [window.swapchain];
            let image_indices = [image];
            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&wait_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);
            match unsafe { self.ctx.swapchain.queue_present(self.queue, &present_info) } {
                Ok(suboptimal) => window.needs_recreate |= suboptimal,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    log::debug!("Swap chain out of date on present");
                    window.needs_recreate = true;
                }
                Err(e) => return Err(vk_error("present", e)),
            }

            let wanted = wanted_mode(request);
            if wanted != window.wanted_mode {
                log::debug!(
                    "Present mode {wanted:?} requested while using {:?}, recreating",
                    window.present_mode
                );
                window.wanted_mode = wanted;
                window.needs_recreate = true;
            }
            Ok(())
        })
    }

    pub(super) fn resize(
        &self,
        objects: &mut Objects,
        id: SwapChainId,
        width: u32,
        height: u32,
    ) -> Result<(), GraphicsError> {
        unsafe { self.ctx.device.device_wait_idle() }.map_err(|e| vk_error("device wait", e))?;
        self.with_swap_chain(objects, id, |objects, swap_chain| {
            log::debug!(
                "Resizing swap chain {}x{} -> {width}x{height}",
                swap_chain.extent.width,
                swap_chain.extent.height
            );
            swap_chain.desc.width = width;
            swap_chain.desc.height = height;
            if matches!(swap_chain.presenter, Presenter::Window(_)) {
                self.build_window(objects, swap_chain, true)
            } else {
                self.build_headless(objects, swap_chain, true)
            }
        })
    }

    /// Destroy a swap chain and its back buffers. The device must be idle.
    pub(super) fn destroy_swap_chain_object(
        &self,
        objects: &mut Objects,
        swap_chain: SwapChainObject,
    ) {
        let retired: Vec<TextureObject> = swap_chain
            .back_buffers
            .iter()
            .filter_map(|&id| objects.remove_texture(id))
            .collect();
        match objects.allocator() {
            Ok(allocator) => {
                for texture in retired {
                    destroy_texture_object(&self.ctx.device, allocator, texture);
                }
            }
            Err(e) => log::warn!("Back buffers leaked: {e}"),
        }

        if let Presenter::Window(window) = swap_chain.presenter {
            unsafe {
                for semaphore in window
                    .acquire_semaphores
                    .into_iter()
                    .chain(window.render_finished)
                {
                    self.ctx.device.destroy_semaphore(semaphore, None);
                }
                if window.swapchain != vk::SwapchainKHR::null() {
                    self.ctx.swapchain.destroy_swapchain(window.swapchain, None);
                }
                self.shared.surface.destroy_surface(window.surface, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vsync_always_uses_fifo() {
        let request = PresentRequest {
            sync_interval: 1,
            allow_tearing: false,
        };
        assert_eq!(wanted_mode(request), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_tearing_prefers_immediate() {
        let request = PresentRequest {
            sync_interval: 0,
            allow_tearing: true,
        };
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(
            choose_present_mode(&all, wanted_mode(request)),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&all[..2], wanted_mode(request)),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn test_missing_modes_fall_back_to_fifo() {
        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&fifo_only, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(&fifo_only, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_composite_alpha_prefers_opaque() {
        let supported =
            vk::CompositeAlphaFlagsKHR::OPAQUE | vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED;
        assert_eq!(choose_composite_alpha(supported), vk::CompositeAlphaFlagsKHR::OPAQUE);
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::INHERIT),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }
}
