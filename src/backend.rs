use crate::label::Bitmap;
use crate::utils::{DrawCommand, InstanceRecord, Position};

/// Handle to one backend-owned buffer region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

/// Handle to one backend-owned atlas texture (a layer array).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtlasId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Per-slot instance records for a pool group.
    Instance,
    /// Per-item position records for an atlas page.
    PagePosition,
    /// Per-item label transform matrices for an atlas page.
    PageLabel,
    /// Indirect draw command slots for an atlas page.
    Command,
}

/// What the front end needs to attach a draw call to a newly created
/// group or page, and to detach it again on retirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawBinding {
    Group {
        group: usize,
        instances: BufferId,
    },
    Page {
        page: usize,
        positions: BufferId,
        labels: BufferId,
        commands: BufferId,
        atlas: AtlasId,
    },
}

/// One raw hit-test result, already depth-sorted by the collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitResult {
    pub page: usize,
    pub draw_slot: usize,
    pub item: usize,
    pub depth: f32,
}

/// The rendering collaborator consumed by the pooling core.
///
/// The core never reads GPU memory back; every accessor is satisfied from
/// the CPU-side shadow kept next to the write path. Implementations only
/// need to make writes land and to remember which buffers are bound where.
pub trait RenderBackend {
    fn allocate_buffer(&mut self, kind: BufferKind, capacity: usize) -> BufferId;
    fn release_buffer(&mut self, buffer: BufferId);

    fn write_record(&mut self, buffer: BufferId, index: usize, record: &InstanceRecord);
    fn write_command(&mut self, buffer: BufferId, index: usize, command: &DrawCommand);
    /// Overwrite only the control word of an already-written record.
    fn write_aux(&mut self, buffer: BufferId, index: usize, control: u32);

    /// Allocate a square layer-array atlas texture; `tile` is the edge
    /// length of one label tile, used to derive tile origins on upload.
    fn allocate_atlas(&mut self, layers: u32, extent: u32, tile: u32) -> AtlasId;
    fn release_atlas(&mut self, atlas: AtlasId);
    fn upload_label(&mut self, atlas: AtlasId, layer: u32, tile_index: u32, bitmap: &Bitmap);

    fn bind_draw(&mut self, binding: DrawBinding);
    fn detach_draw(&mut self, binding: DrawBinding);

    /// Screen-space hit test. Results are depth-sorted by the collaborator;
    /// the core passes them through untouched.
    fn hit_test(&self, point: Position, margin: f32) -> Vec<HitResult>;
}

const RECORD_STRIDE: u64 = std::mem::size_of::<InstanceRecord>() as u64;
const COMMAND_STRIDE: u64 = std::mem::size_of::<DrawCommand>() as u64;
// InstanceRecord layout: 4x4 matrix, then the control word.
const CONTROL_OFFSET: u64 = 64;

struct AtlasTexture {
    texture: wgpu::Texture,
    extent: u32,
    tile: u32,
}

/// wgpu-backed implementation of [`RenderBackend`].
///
/// Owns the device and queue; draw bindings are only recorded here — the
/// front end walks [`WgpuBackend::bindings`] to wire its render passes,
/// the same seam the engine keeps deliberately thin.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: Vec<Option<wgpu::Buffer>>,
    atlases: Vec<Option<AtlasTexture>>,
    bindings: Vec<DrawBinding>,
}

impl WgpuBackend {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        WgpuBackend {
            device,
            queue,
            buffers: Vec::new(),
            atlases: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Acquire a surface-less device, for tools and offline tests.
    pub fn new_headless() -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or_else(|| anyhow::anyhow!("no compatible adapter"))?;
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
            },
            None,
        ))?;
        Ok(Self::new(device, queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Currently attached draw bindings, in attach order.
    pub fn bindings(&self) -> &[DrawBinding] {
        &self.bindings
    }

    pub fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(id.0).and_then(|b| b.as_ref())
    }

    pub fn atlas_texture(&self, id: AtlasId) -> Option<&wgpu::Texture> {
        self.atlases.get(id.0).and_then(|a| a.as_ref().map(|a| &a.texture))
    }
}

impl RenderBackend for WgpuBackend {
    fn allocate_buffer(&mut self, kind: BufferKind, capacity: usize) -> BufferId {
        let (stride, usage, label) = match kind {
            BufferKind::Instance => (
                RECORD_STRIDE,
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                "marker_pool instance buffer",
            ),
            BufferKind::PagePosition => (
                RECORD_STRIDE,
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                "marker_pool page position buffer",
            ),
            BufferKind::PageLabel => (
                RECORD_STRIDE,
                wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                "marker_pool page label buffer",
            ),
            BufferKind::Command => (
                COMMAND_STRIDE,
                wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::COPY_DST,
                "marker_pool command buffer",
            ),
        };

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity as u64 * stride,
            usage,
            mapped_at_creation: false,
        });

        self.buffers.push(Some(buffer));
        log::debug!("allocated {kind:?} buffer #{} ({capacity} records)", self.buffers.len() - 1);
        BufferId(self.buffers.len() - 1)
    }

    fn release_buffer(&mut self, buffer: BufferId) {
        if let Some(slot) = self.buffers.get_mut(buffer.0) {
            *slot = None;
        }
    }

    fn write_record(&mut self, buffer: BufferId, index: usize, record: &InstanceRecord) {
        if let Some(Some(buffer)) = self.buffers.get(buffer.0) {
            self.queue
                .write_buffer(buffer, index as u64 * RECORD_STRIDE, bytemuck::bytes_of(record));
        }
    }

    fn write_command(&mut self, buffer: BufferId, index: usize, command: &DrawCommand) {
        if let Some(Some(buffer)) = self.buffers.get(buffer.0) {
            self.queue
                .write_buffer(buffer, index as u64 * COMMAND_STRIDE, bytemuck::bytes_of(command));
        }
    }

    fn write_aux(&mut self, buffer: BufferId, index: usize, control: u32) {
        if let Some(Some(buffer)) = self.buffers.get(buffer.0) {
            self.queue.write_buffer(
                buffer,
                index as u64 * RECORD_STRIDE + CONTROL_OFFSET,
                bytemuck::bytes_of(&control),
            );
        }
    }

    fn allocate_atlas(&mut self, layers: u32, extent: u32, tile: u32) -> AtlasId {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("marker_pool label atlas"),
            size: wgpu::Extent3d {
                width: extent,
                height: extent,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[wgpu::TextureFormat::Rgba8UnormSrgb],
        });

        self.atlases.push(Some(AtlasTexture { texture, extent, tile }));
        AtlasId(self.atlases.len() - 1)
    }

    fn release_atlas(&mut self, atlas: AtlasId) {
        if let Some(slot) = self.atlases.get_mut(atlas.0) {
            *slot = None;
        }
    }

    fn upload_label(&mut self, atlas: AtlasId, layer: u32, tile_index: u32, bitmap: &Bitmap) {
        let Some(Some(atlas)) = self.atlases.get(atlas.0) else {
            return;
        };

        let tiles_per_row = (atlas.extent / atlas.tile).max(1);
        let origin_x = (tile_index % tiles_per_row) * atlas.tile;
        let origin_y = (tile_index / tiles_per_row) * atlas.tile;

        // Oversized bitmaps are clipped to the tile rather than bleeding
        // into the neighbor.
        let width = bitmap.width.min(atlas.tile);
        let height = bitmap.height.min(atlas.tile);
        if width == 0 || height == 0 {
            return;
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &atlas.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: origin_x,
                    y: origin_y,
                    z: layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &bitmap.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * bitmap.width),
                rows_per_image: Some(bitmap.height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn bind_draw(&mut self, binding: DrawBinding) {
        self.bindings.push(binding);
    }

    fn detach_draw(&mut self, binding: DrawBinding) {
        self.bindings.retain(|b| *b != binding);
    }

    fn hit_test(&self, _point: Position, _margin: f32) -> Vec<HitResult> {
        // Picking readback is driven by the front end; a backend wired to a
        // real hit tester overrides this with its own results.
        Vec::new()
    }
}
