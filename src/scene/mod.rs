// src/scene/mod.rs
// Scene assembly: per-mesh BLAS builds packed into combined buffers, instances placed on top, one TLAS over them.
// This file exists to thread node/triangle/vertex offsets through an explicit builder instead of global counters.
// RELEVANT FILES:src/accel/blas.rs,src/accel/tlas.rs,src/accel/instancing.rs,src/accel/traverse.rs,src/shaders/scene_buffers.wgsl

use wgpu::util::DeviceExt;

use crate::accel::blas::{BlasBuilder, BlasOffsets, BlasOptions};
use crate::accel::instancing::{Instance, InstanceData};
use crate::accel::tlas::TlasBuilder;
use crate::accel::types::{Aabb, BuildStats, GpuBvhNode, GpuTlasNode};
use crate::error::{TraceError, TraceResult};
use crate::geometry::{validate_mesh, Mesh, Triangle, Vertex};

/// Scene constants matching WGSL `SceneInfo` (16 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneInfo {
    /// Slot of the TLAS root in the combined node buffer
    pub tlas_offset: u32,
    pub node_count: u32,
    pub instance_count: u32,
    pub triangle_count: u32,
}

/// Where one mesh landed inside the combined buffers
#[derive(Debug, Clone)]
pub struct MeshRecord {
    pub blas_root: u32,
    pub node_count: u32,
    pub first_triangle: u32,
    pub triangle_count: u32,
    pub first_vertex: u32,
    pub vertex_count: u32,
    /// Local-space box of the BLAS root
    pub bounds: Aabb,
    pub stats: BuildStats,
}

/// Builder context for a scene.
///
/// Every mesh is built against the current buffer lengths, so meshes can be
/// added in any order and several scenes can be built side by side.
#[derive(Debug, Default)]
pub struct SceneBuilder {
    blas: BlasBuilder,
    nodes: Vec<GpuBvhNode>,
    triangles: Vec<Triangle>,
    vertices: Vec<Vertex>,
    meshes: Vec<MeshRecord>,
    instances: Vec<Instance>,
}

impl SceneBuilder {
    pub fn new(options: BlasOptions) -> TraceResult<Self> {
        options.validate()?;
        Ok(Self {
            blas: BlasBuilder::new(options),
            ..Default::default()
        })
    }

    /// Build the mesh's BLAS into the combined buffers and return its mesh id
    pub fn add_mesh(&mut self, mesh: &Mesh) -> TraceResult<usize> {
        let id = self.meshes.len();
        if mesh.is_empty() {
            return Err(TraceError::EmptyMesh { mesh: id });
        }

        let issues = validate_mesh(mesh)?;
        if !issues.is_empty() {
            log::warn!("Mesh {} has {} degenerate triangles", id, issues.len());
        }

        let offsets = BlasOffsets {
            node: self.nodes.len() as u32,
            triangle: self.triangles.len() as u32,
        };
        let build = self.blas.build_at(&mesh.triangles, &mesh.vertices, offsets)?;

        let first_vertex = self.vertices.len() as u32;
        self.triangles.extend(build.triangles.iter().map(|tri| {
            Triangle::new(tri.indices.map(|i| i + first_vertex), tri.material)
        }));
        self.vertices.extend_from_slice(&mesh.vertices);
        self.nodes.extend_from_slice(&build.nodes);

        self.meshes.push(MeshRecord {
            blas_root: build.root_offset,
            node_count: build.node_count(),
            first_triangle: offsets.triangle,
            triangle_count: mesh.triangle_count(),
            first_vertex,
            vertex_count: mesh.vertex_count(),
            bounds: build.bounds,
            stats: build.stats,
        });
        Ok(id)
    }

    /// Place a new identity-transformed instance of `mesh`
    pub fn add_instance(&mut self, mesh: usize) -> TraceResult<&mut Instance> {
        let record = self
            .meshes
            .get(mesh)
            .ok_or(TraceError::UnknownMesh { mesh })?;
        let instance = Instance::new(mesh, record.blas_root, record.bounds);
        self.instances.push(instance);
        let last = self.instances.len() - 1;
        Ok(&mut self.instances[last])
    }

    pub fn mesh(&self, id: usize) -> Option<&MeshRecord> {
        self.meshes.get(id)
    }

    pub fn meshes(&self) -> &[MeshRecord] {
        &self.meshes
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instance_mut(&mut self, index: usize) -> Option<&mut Instance> {
        self.instances.get_mut(index)
    }

    /// Cluster the current instances and snapshot every buffer.
    ///
    /// Calling this again after moving instances rebuilds the TLAS wholesale;
    /// the BLAS data is reused as is.
    pub fn build(&self) -> TraceResult<SceneBuffers> {
        let bounds: Vec<Aabb> = self.instances.iter().map(Instance::world_aabb).collect();
        let tlas = TlasBuilder::new().build(&bounds)?;

        Ok(SceneBuffers {
            blas_nodes: self.nodes.clone(),
            tlas_nodes: tlas.nodes,
            triangles: self.triangles.clone(),
            vertices: self.vertices.clone(),
            instances: self.instances.iter().map(Instance::to_gpu).collect(),
            meshes: self.meshes.clone(),
            tlas_stats: tlas.stats,
        })
    }
}

/// Read-only scene data consumed by the intersect and shadow phases
#[derive(Debug, Clone)]
pub struct SceneBuffers {
    /// Every mesh's BLAS, back to back; indices are absolute
    pub blas_nodes: Vec<GpuBvhNode>,
    /// TLAS with child indices local to this array; root at 0
    pub tlas_nodes: Vec<GpuTlasNode>,
    /// Leaf-ordered triangles; vertex indices point into `vertices`
    pub triangles: Vec<Triangle>,
    pub vertices: Vec<Vertex>,
    pub instances: Vec<InstanceData>,
    pub meshes: Vec<MeshRecord>,
    pub tlas_stats: BuildStats,
}

impl SceneBuffers {
    /// Slot of the TLAS root inside the combined node buffer
    pub fn tlas_offset(&self) -> u32 {
        self.blas_nodes.len() as u32
    }

    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }

    pub fn bounds(&self) -> Aabb {
        self.tlas_nodes
            .first()
            .map(GpuTlasNode::aabb)
            .unwrap_or_default()
    }

    /// TLAS nodes with internal child indices moved past the BLAS nodes
    pub fn rebased_tlas_nodes(&self) -> Vec<GpuTlasNode> {
        let offset = self.tlas_offset();
        self.tlas_nodes
            .iter()
            .map(|node| {
                let mut node = *node;
                if !node.is_leaf() {
                    node.index += offset;
                }
                node
            })
            .collect()
    }

    /// Combined node buffer: BLAS nodes then the rebased TLAS nodes
    pub fn combined_node_bytes(&self) -> Vec<u8> {
        let tlas = self.rebased_tlas_nodes();
        let mut bytes = Vec::with_capacity((self.blas_nodes.len() + tlas.len()) * 32);
        bytes.extend_from_slice(bytemuck::cast_slice(&self.blas_nodes));
        bytes.extend_from_slice(bytemuck::cast_slice(&tlas));
        bytes
    }

    pub fn info(&self) -> SceneInfo {
        SceneInfo {
            tlas_offset: self.tlas_offset(),
            node_count: (self.blas_nodes.len() + self.tlas_nodes.len()) as u32,
            instance_count: self.instance_count(),
            triangle_count: self.triangles.len() as u32,
        }
    }

    /// Bytes the scene occupies once uploaded
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of_val(self.blas_nodes.as_slice())
            + std::mem::size_of_val(self.tlas_nodes.as_slice())
            + std::mem::size_of_val(self.triangles.as_slice())
            + std::mem::size_of_val(self.vertices.as_slice())
            + std::mem::size_of_val(self.instances.as_slice())
            + std::mem::size_of::<SceneInfo>()
    }
}

/// Device copies of the scene buffers, bound at group 1 of scene kernels
pub struct GpuScene {
    pub nodes: wgpu::Buffer,
    pub triangles: wgpu::Buffer,
    pub vertices: wgpu::Buffer,
    pub instances: wgpu::Buffer,
    pub info: wgpu::Buffer,
    pub tlas_offset: u32,
    pub node_count: u32,
}

impl GpuScene {
    pub fn upload(device: &wgpu::Device, scene: &SceneBuffers) -> Self {
        let storage = |label: &str, contents: &[u8]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            })
        };

        let scene_info = scene.info();
        let node_bytes = scene.combined_node_bytes();
        let gpu = Self {
            nodes: storage("scene-nodes", &node_bytes),
            triangles: storage("scene-triangles", bytemuck::cast_slice(&scene.triangles)),
            vertices: storage("scene-vertices", bytemuck::cast_slice(&scene.vertices)),
            instances: storage("scene-instances", bytemuck::cast_slice(&scene.instances)),
            info: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("scene-info"),
                contents: bytemuck::bytes_of(&scene_info),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            }),
            tlas_offset: scene_info.tlas_offset,
            node_count: scene_info.node_count,
        };

        log::info!(
            "Scene uploaded: {} nodes (TLAS root at {}), {} triangles, {} instances, {:.1} KiB",
            scene_info.node_count,
            scene_info.tlas_offset,
            scene_info.triangle_count,
            scene_info.instance_count,
            scene.memory_usage() as f32 / 1024.0
        );
        gpu
    }

    /// Layout matching the group 1 declarations in `scene_buffers.wgsl`
    pub fn create_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let storage = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene-buffers-layout"),
            entries: &[
                storage(0),
                storage(1),
                storage(2),
                storage(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<SceneInfo>() as u64,
                        ),
                    },
                    count: None,
                },
            ],
        })
    }

    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> wgpu::BindGroup {
        let buffers = [
            &self.nodes,
            &self.triangles,
            &self.vertices,
            &self.instances,
            &self.info,
        ];
        let entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scene-buffers-bind-group"),
            layout,
            entries: &entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::MeshBuilder;
    use glam::Vec3;

    #[test]
    fn empty_mesh_is_rejected() {
        let mut scene = SceneBuilder::default();
        assert_eq!(
            scene.add_mesh(&Mesh::default()).unwrap_err(),
            TraceError::EmptyMesh { mesh: 0 }
        );
    }

    #[test]
    fn unknown_mesh_is_rejected() {
        let mut scene = SceneBuilder::default();
        assert!(matches!(
            scene.add_instance(3),
            Err(TraceError::UnknownMesh { mesh: 3 })
        ));
    }

    #[test]
    fn no_instances_is_rejected() {
        let mut scene = SceneBuilder::default();
        scene.add_mesh(&MeshBuilder::cube(1.0)).unwrap();
        assert_eq!(scene.build().unwrap_err(), TraceError::NoInstances);
    }

    #[test]
    fn second_mesh_is_rebased() {
        let mut scene = SceneBuilder::default();
        let cube = scene.add_mesh(&MeshBuilder::cube(1.0)).unwrap();
        let tri = scene.add_mesh(&MeshBuilder::triangle()).unwrap();

        let cube_rec = scene.mesh(cube).unwrap().clone();
        let tri_rec = scene.mesh(tri).unwrap().clone();
        assert_eq!(cube_rec.blas_root, 0);
        assert_eq!(tri_rec.blas_root, cube_rec.node_count);
        assert_eq!(tri_rec.first_triangle, 12);
        assert_eq!(tri_rec.first_vertex, 8);

        scene.add_instance(tri).unwrap();
        let buffers = scene.build().unwrap();
        let leaf = buffers.blas_nodes[tri_rec.blas_root as usize];
        assert_eq!(leaf.triangles(), Some((12, 1)));
        assert_eq!(buffers.triangles[12].indices, [8, 9, 10]);
    }

    #[test]
    fn combined_buffer_rebases_tlas() {
        let mut scene = SceneBuilder::default();
        let cube = scene.add_mesh(&MeshBuilder::cube(1.0)).unwrap();
        scene.add_instance(cube).unwrap();
        scene.add_instance(cube).unwrap().translate(Vec3::new(4.0, 0.0, 0.0));

        let buffers = scene.build().unwrap();
        let offset = buffers.tlas_offset();
        let rebased = buffers.rebased_tlas_nodes();
        assert_eq!(rebased[0].children(), Some((offset + 1, offset + 2)));
        assert!(rebased[1].is_leaf());

        let bytes = buffers.combined_node_bytes();
        assert_eq!(bytes.len(), (buffers.blas_nodes.len() + 3) * 32);
        let start = offset as usize * 32;
        let root: GpuTlasNode = bytemuck::pod_read_unaligned(&bytes[start..start + 32]);
        assert_eq!(root, rebased[0]);
    }

    #[test]
    fn scene_info_and_memory_usage() {
        let mut scene = SceneBuilder::default();
        let cube = scene.add_mesh(&MeshBuilder::cube(1.0)).unwrap();
        for x in [0.0, 3.0, 6.0] {
            scene.add_instance(cube).unwrap().translate(Vec3::new(x, 0.0, 0.0));
        }
        let buffers = scene.build().unwrap();

        let info = buffers.info();
        assert_eq!(info.tlas_offset, buffers.blas_nodes.len() as u32);
        assert_eq!(info.node_count, buffers.blas_nodes.len() as u32 + 5);
        assert_eq!(info.instance_count, 3);
        assert_eq!(info.triangle_count, 12);
        assert_eq!(std::mem::size_of::<SceneInfo>(), 16);

        // Nodes, triangles, vertices, instances, then the info block
        let expected = buffers.combined_node_bytes().len() + 12 * 16 + 8 * 32 + 3 * 144 + 16;
        assert_eq!(buffers.memory_usage(), expected);
    }
}
