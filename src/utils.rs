use std::{
    hash::{Hash, Hasher},
    ops::Mul,
};

/// One GPU-resident instance record: a transform plus per-item metadata.
///
/// The layout is shared with the vertex shader, so this must stay `#[repr(C)]`
/// and a multiple of 16 bytes. `control` is the auxiliary visibility/rotation
/// word updated through `set_aux`; `slot_self` carries the slot's own index so
/// shader-side picking can report which slot produced a fragment.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRecord {
    pub transform: [[f32; 4]; 4],
    pub control: u32,
    pub slot_self: u32,
    pub _pad: [u32; 2],
}

impl InstanceRecord {
    /// The all-zero record. Renderers are contracted to cull it, which is
    /// what makes sentinel-overwrite a valid soft delete.
    pub const SENTINEL: InstanceRecord = InstanceRecord {
        transform: [[0.0; 4]; 4],
        control: 0,
        slot_self: 0,
        _pad: [0; 2],
    };

    pub fn from_transform(transform: [[f32; 4]; 4]) -> Self {
        InstanceRecord {
            transform,
            control: 0,
            slot_self: 0,
            _pad: [0; 2],
        }
    }

    pub fn identity() -> Self {
        Self::from_transform([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }
}

/// One indirect draw command slot. Mirrors `wgpu::util::DrawIndirectArgs`;
/// zeroing `vertex_count`/`instance_count` tombstones the command without
/// disturbing its neighbors.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DrawCommand {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawCommand {
    pub const TOMBSTONE: DrawCommand = DrawCommand {
        vertex_count: 0,
        instance_count: 0,
        first_vertex: 0,
        first_instance: 0,
    };

    /// A textured-quad command covering `instance_count` items starting at
    /// `first_instance` in the page's instance buffers.
    pub fn quad(instance_count: u32, first_instance: u32) -> Self {
        DrawCommand {
            vertex_count: 6,
            instance_count,
            first_vertex: 0,
            first_instance,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.instance_count == 0 || self.vertex_count == 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Mul<f32> for Size {
    type Output = Size;

    fn mul(self, rhs: f32) -> Self::Output {
        Size {
            width: self.width * rhs,
            height: self.height * rhs,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Default for Position {
    fn default() -> Self {
        Position { x: 0.0, y: 0.0 }
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y
    }
}

impl Eq for Position {}

impl Hash for Position {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Convert the floating-point numbers to a fixed precision before hashing
        let precision = 100.0;
        let x = (self.x * precision).round() as i32;
        let y = (self.y * precision).round() as i32;

        x.hash(state);
        y.hash(state);
    }
}

impl Mul<f32> for Position {
    type Output = Position;
    fn mul(self, factor: f32) -> Self::Output {
        Position {
            x: self.x * factor,
            y: self.y * factor,
        }
    }
}
