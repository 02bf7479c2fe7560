//! The zero-instance draw-call template copied over each slot's draw buffer
//! before culling.

use crate::gpu::types::{DrawIndexedIndirectCommand, GpuDrawCalls, MESH_COUNT, REPLICA_COUNT};
use crate::mesh::MeshInfo;

/// One indexed-indirect command per mesh type with `instance_count` zero.
///
/// Each type owns `REPLICA_COUNT * max_counts[i]` final-instance slots,
/// laid out in mesh order, so the cull pass can append images of one type
/// without touching another's range.
#[must_use]
pub fn draw_call_template(
    infos: &[MeshInfo; MESH_COUNT],
    max_counts: &[u32; MESH_COUNT],
) -> GpuDrawCalls {
    let mut calls = GpuDrawCalls::default();
    let mut first_instance = 0u32;
    for ((command, info), &max) in calls.commands.iter_mut().zip(infos).zip(max_counts) {
        *command = DrawIndexedIndirectCommand {
            index_count: info.index_count,
            instance_count: 0,
            first_index: info.first_index,
            base_vertex: info.first_vertex,
            first_instance,
        };
        first_instance += REPLICA_COUNT as u32 * max;
    }
    calls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_instances_accumulate_replicated_maxima() {
        let infos = [
            MeshInfo {
                first_index: 0,
                index_count: 36,
                first_vertex: 0,
                radius: 1.0,
            },
            MeshInfo {
                first_index: 36,
                index_count: 12,
                first_vertex: 20,
                radius: 1.0,
            },
            MeshInfo::default(),
            MeshInfo::default(),
            MeshInfo {
                first_index: 48,
                index_count: 24,
                first_vertex: 30,
                radius: 1.0,
            },
        ];
        let calls = draw_call_template(&infos, &[100, 1, 0, 1, 50]);
        let firsts: Vec<u32> = calls.commands.iter().map(|c| c.first_instance).collect();
        assert_eq!(firsts, vec![0, 2700, 2727, 2727, 2754]);
        assert!(calls.commands.iter().all(|c| c.instance_count == 0));
        assert_eq!(calls.commands[4].base_vertex, 30);
        assert_eq!(calls.commands[1].first_index, 36);
    }
}
