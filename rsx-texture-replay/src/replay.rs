use crate::config::{ReplayConfig, WgpuBackend as WgpuBackendConfig};
use crate::scene::Scene;
use anyhow::anyhow;
use rsx_texture::backend::headless::HeadlessBackend;
use rsx_texture::backend::wgpuhardware::{self, WgpuBackend};
use rsx_texture::backend::{ResourceState, TextureAllocation};
use rsx_texture::format::HostFormat;
use rsx_texture::{FrameResources, GpuBackend, LinearGuestMemory, TextureBinder, UploadStats};
use std::collections::HashMap;
use std::rc::Rc;
use wgpu::{
    DeviceDescriptor, Instance, InstanceDescriptor, Limits, Maintain, PowerPreference, Queue,
    RequestAdapterOptions, SubmissionIndex,
};

/// GPU the replay runs against, plus the submission and fence handling around it
pub trait ReplayGpu {
    type Backend: GpuBackend;

    fn backend(&mut self) -> &mut Self::Backend;

    /// Submits the work recorded for a frame slot.
    fn submit(&mut self, slot: usize);

    /// Blocks until the work last submitted for a frame slot has completed.
    fn wait(&mut self, slot: usize);
}

#[derive(Debug, Default)]
pub struct HeadlessGpu {
    backend: HeadlessBackend,
}

impl HeadlessGpu {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplayGpu for HeadlessGpu {
    type Backend = HeadlessBackend;

    fn backend(&mut self) -> &mut Self::Backend {
        &mut self.backend
    }

    fn submit(&mut self, slot: usize) {
        // Headless commands execute as they are recorded
        let commands = self.backend.take_commands();
        log::trace!("Frame slot {slot}: {} recorded commands", commands.len());
    }

    fn wait(&mut self, _slot: usize) {}
}

pub struct WgpuGpu {
    device: Rc<wgpu::Device>,
    queue: Rc<Queue>,
    backend: WgpuBackend,
    submissions: Vec<Option<SubmissionIndex>>,
}

impl WgpuGpu {
    /// Creates a device with no surface.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter supports the features the texture backend needs.
    pub fn new(backends: WgpuBackendConfig, frames_in_flight: usize) -> anyhow::Result<Self> {
        let instance = Instance::new(InstanceDescriptor {
            backends: backends.to_wgpu(),
            ..InstanceDescriptor::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }));
        let Some(adapter) = adapter else {
            return Err(anyhow!("Failed to obtain wgpu adapter"));
        };

        log::info!("Using wgpu adapter {:?}", adapter.get_info());

        let (device, queue) = pollster::block_on(adapter.request_device(
            &DeviceDescriptor {
                label: "device".into(),
                required_features: wgpuhardware::required_wgpu_features(),
                required_limits: Limits::default(),
                ..DeviceDescriptor::default()
            },
            None,
        ))?;

        let device = Rc::new(device);
        let queue = Rc::new(queue);
        let backend = WgpuBackend::new(Rc::clone(&device), Rc::clone(&queue));

        let submissions = (0..frames_in_flight).map(|_| None).collect();

        Ok(Self { device, queue, backend, submissions })
    }
}

impl ReplayGpu for WgpuGpu {
    type Backend = WgpuBackend;

    fn backend(&mut self) -> &mut Self::Backend {
        &mut self.backend
    }

    fn submit(&mut self, slot: usize) {
        let command_buffer = self.backend.finish();
        self.submissions[slot] = Some(self.queue.submit(command_buffer));
    }

    fn wait(&mut self, slot: usize) {
        if let Some(submission) = self.submissions[slot].take() {
            self.device.poll(Maintain::WaitForSubmissionIndex(submission));
        }
    }
}

fn accumulate(total: &mut UploadStats, frame: UploadStats) {
    total.cache_hits += frame.cache_hits;
    total.new_uploads += frame.new_uploads;
    total.partial_updates += frame.partial_updates;
    total.evictions += frame.evictions;
    total.render_target_hits += frame.render_target_hits;
    total.skipped_units += frame.skipped_units;
    total.dummy_slots += frame.dummy_slots;
}

/// Runs a scene for the configured number of frames and returns the accumulated upload
/// statistics.
///
/// # Errors
///
/// Propagates fatal texture errors and invalid scheduled writes.
pub fn run_scene<G: ReplayGpu>(
    gpu: &mut G,
    scene: &Scene,
    config: &ReplayConfig,
) -> anyhow::Result<UploadStats> {
    let frames_in_flight = config.frames_in_flight.max(1);

    let mut binder = TextureBinder::new(gpu.backend(), config.texture_cache)?;
    let mut frames: Vec<FrameResources<G::Backend>> =
        (0..frames_in_flight).map(|_| binder.new_frame_resources()).collect();

    let mut memory = LinearGuestMemory::new(scene.memory_base, scene.memory_size as usize);
    memory.fill_with(|i| (i % 251) as u8);

    let mut render_targets = HashMap::new();
    for target in &scene.render_targets {
        let allocation = TextureAllocation {
            format: HostFormat::Rgba8Unorm,
            width: target.width,
            height: target.height,
            mip_levels: 1,
        };
        let texture = gpu.backend().create_texture(&allocation, ResourceState::ShaderRead)?;
        render_targets.insert(target.address(), Rc::new(texture));
    }

    let draws: Vec<_> =
        scene.draws.iter().map(|draw| (draw.registers(), draw.srv_slots())).collect();

    let mut total = UploadStats::default();
    for frame_number in 0..config.frames {
        let slot = frame_number as usize % frames_in_flight;

        if frame_number as usize >= frames_in_flight {
            gpu.wait(slot);
            binder.recycle_frame(&mut frames[slot]);
        }

        for write in scene.writes_for_frame(frame_number) {
            let data = vec![write.value; write.len as usize];
            memory.write(write.address, &data)?;
        }

        let frame = &mut frames[slot];
        for (units, srv_slots) in &draws {
            let srv_base = frame.allocate_srv_range(*srv_slots)?;
            let bindings = binder.upload_and_bind_textures(
                gpu.backend(),
                frame,
                units,
                &render_targets,
                &mut memory,
                srv_base,
                *srv_slots,
            )?;
            log::trace!("Frame {frame_number}: {bindings:?}");
        }

        binder.end_frame(frame);
        gpu.submit(slot);

        let stats = binder.take_stats();
        log::debug!("Frame {frame_number}: {stats:?}");
        accumulate(&mut total, stats);
    }

    for slot in 0..frames_in_flight {
        gpu.wait(slot);
    }

    log::info!("Resident textures after {} frames: {}", config.frames, binder.cache().len());

    Ok(total)
}
