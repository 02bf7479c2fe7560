//! The three pipelines a frame uses: cull (compute), mesh and bond
//! (render).

use crate::gpu::device::{
    ComputePipelineDesc, DeviceError, GpuDevice, RawPipeline, RawSetLayout, RenderPipelineDesc,
};
use crate::gpu::shader_composer::Shader;

/// Pipelines shared by every frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pipelines {
    /// Replica expansion and culling.
    pub cull: RawPipeline,
    /// Single-colored meshes.
    pub mesh: RawPipeline,
    /// Two-colored bond cylinders.
    pub bond: RawPipeline,
}

impl Pipelines {
    /// Build the pipelines against the cull and mesh set layouts.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if shader composition or pipeline creation
    /// fails. Pipelines created before the failure are destroyed.
    pub fn new<D: GpuDevice>(
        device: &mut D,
        cull_layout: RawSetLayout,
        mesh_layout: RawSetLayout,
    ) -> Result<Self, DeviceError> {
        let cull = device.create_compute_pipeline(&ComputePipelineDesc {
            label: "Cull Pipeline",
            shader: Shader::Cull,
            entry_point: "cs_main",
            set_layouts: &[cull_layout],
        })?;
        let mesh = match device.create_render_pipeline(&RenderPipelineDesc {
            label: "Mesh Pipeline",
            shader: Shader::Mesh,
            vertex_entry: "vs_main",
            fragment_entry: "fs_main",
            set_layouts: &[mesh_layout],
        }) {
            Ok(mesh) => mesh,
            Err(e) => {
                device.destroy_pipeline(cull);
                return Err(e);
            }
        };
        let bond = match device.create_render_pipeline(&RenderPipelineDesc {
            label: "Bond Pipeline",
            shader: Shader::Mesh,
            vertex_entry: "vs_bond",
            fragment_entry: "fs_main",
            set_layouts: &[mesh_layout],
        }) {
            Ok(bond) => bond,
            Err(e) => {
                device.destroy_pipeline(cull);
                device.destroy_pipeline(mesh);
                return Err(e);
            }
        };
        log::debug!("created cull, mesh and bond pipelines");
        Ok(Self { cull, mesh, bond })
    }

    /// Destroy all three pipelines.
    pub fn destroy<D: GpuDevice>(self, device: &mut D) {
        device.destroy_pipeline(self.cull);
        device.destroy_pipeline(self.mesh);
        device.destroy_pipeline(self.bond);
    }
}
