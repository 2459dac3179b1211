//! Per-instance transforms for TLAS construction and ray traversal.
//!
//! An [`Instance`] places one mesh BLAS in the world. Translate, scale and
//! rotation accumulate across calls; the composed transform, its inverse and
//! the world-space bounds are refreshed after every change.

use glam::{Mat3, Mat4, Quat, Vec3};

use crate::accel::types::Aabb;

/// Padding added to every re-projected world box
pub const INSTANCE_AABB_EPSILON: f32 = 1e-4;

/// Per-instance data for TLAS ray traversal.
///
/// Layout is GPU-friendly (144 bytes, 16-byte aligned) and matches
/// `Instance` in scene_buffers.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceData {
    /// Object-to-world transform (column-major 4x4 matrix).
    pub transform: [f32; 16],
    /// World-to-object transform for ray transformation.
    pub inv_transform: [f32; 16],
    /// Slot of the instance's BLAS root in the combined node buffer.
    pub blas_root: u32,
    /// Material ID for shading.
    pub material_id: u32,
    /// Texture ID for shading.
    pub texture_id: u32,
    pub _padding: u32,
}

impl InstanceData {
    pub fn transform(&self) -> Mat4 {
        Mat4::from_cols_array(&self.transform)
    }

    pub fn inverse(&self) -> Mat4 {
        Mat4::from_cols_array(&self.inv_transform)
    }
}

/// Scene object: one placed copy of a mesh
#[derive(Debug, Clone)]
pub struct Instance {
    /// Mesh id inside the owning scene
    pub mesh: usize,
    /// Absolute slot of the mesh's BLAS root
    pub blas_root: u32,
    pub material_id: u32,
    pub texture_id: u32,
    local_bounds: Aabb,
    translation: Vec3,
    scale: Vec3,
    rotation: Quat,
    transform: Mat4,
    inverse: Mat4,
    world_aabb: Aabb,
}

impl Instance {
    /// Identity-placed instance of a mesh whose BLAS root box is `local_bounds`
    pub fn new(mesh: usize, blas_root: u32, local_bounds: Aabb) -> Self {
        let mut instance = Self {
            mesh,
            blas_root,
            material_id: 0,
            texture_id: 0,
            local_bounds,
            translation: Vec3::ZERO,
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
            transform: Mat4::IDENTITY,
            inverse: Mat4::IDENTITY,
            world_aabb: Aabb::empty(),
        };
        instance.update_transform();
        instance
    }

    pub fn with_material(mut self, material_id: u32) -> Self {
        self.material_id = material_id;
        self
    }

    pub fn with_texture(mut self, texture_id: u32) -> Self {
        self.texture_id = texture_id;
        self
    }

    /// Move by `delta` on top of the current translation
    pub fn translate(&mut self, delta: Vec3) -> &mut Self {
        self.translation += delta;
        self.update_transform();
        self
    }

    /// Multiply the current scale component-wise
    pub fn scale(&mut self, factors: Vec3) -> &mut Self {
        self.scale *= factors;
        self.update_transform();
        self
    }

    /// Compose `delta` after the accumulated orientation (`q = q * delta`)
    pub fn rotate(&mut self, delta: Quat) -> &mut Self {
        self.rotation = (self.rotation * delta).normalize();
        self.update_transform();
        self
    }

    /// Rotate by `radians` around `axis`; the axis need not be normalized
    pub fn rotate_axis_angle(&mut self, axis: Vec3, radians: f32) -> &mut Self {
        let axis = axis.normalize_or_zero();
        if axis == Vec3::ZERO {
            return self;
        }
        self.rotate(Quat::from_axis_angle(axis, radians))
    }

    pub fn translation(&self) -> Vec3 {
        self.translation
    }

    pub fn scale_factors(&self) -> Vec3 {
        self.scale
    }

    pub fn rotation(&self) -> Quat {
        self.rotation
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn inverse(&self) -> Mat4 {
        self.inverse
    }

    pub fn local_bounds(&self) -> Aabb {
        self.local_bounds
    }

    /// World-space box fed to the TLAS builder
    pub fn world_aabb(&self) -> Aabb {
        self.world_aabb
    }

    /// Recompose `T * R * S`, its inverse and the world box
    fn update_transform(&mut self) {
        self.transform =
            Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation);
        self.inverse = self.transform.inverse();
        self.world_aabb =
            compute_world_aabb(&self.local_bounds, &self.transform, INSTANCE_AABB_EPSILON);
    }

    pub fn to_gpu(&self) -> InstanceData {
        InstanceData {
            transform: self.transform.to_cols_array(),
            inv_transform: self.inverse.to_cols_array(),
            blas_root: self.blas_root,
            material_id: self.material_id,
            texture_id: self.texture_id,
            _padding: 0,
        }
    }
}

/// Re-project a local box through `transform`.
///
/// The box is treated as an oriented box (centre plus three half-extent
/// axes); its eight corners bound the result, so no triangle is revisited.
pub fn compute_world_aabb(local: &Aabb, transform: &Mat4, epsilon: f32) -> Aabb {
    if !local.is_valid() {
        return Aabb::empty();
    }

    let linear = Mat3::from_mat4(*transform);
    let center = transform.transform_point3(local.center());
    let half = local.extent() * 0.5;
    let ux = linear * Vec3::new(half.x, 0.0, 0.0);
    let uy = linear * Vec3::new(0.0, half.y, 0.0);
    let uz = linear * Vec3::new(0.0, 0.0, half.z);

    let mut world = Aabb::empty();
    for sx in [-1.0f32, 1.0] {
        for sy in [-1.0f32, 1.0] {
            for sz in [-1.0f32, 1.0] {
                world.expand_point(center + ux * sx + uy * sy + uz * sz);
            }
        }
    }
    world.padded(epsilon)
}

// Keep the layout in step with WGSL `Instance`
const _: () = assert!(std::mem::size_of::<InstanceData>() == 144);
