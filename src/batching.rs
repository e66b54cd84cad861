//! Render object batching
//!
//! Visible scene objects are grouped by material into a deferred and a
//! forward bucket. Editor objects are kept apart and split by whether they
//! take part in depth testing against the scene.

use crate::resources::{MaterialID, RenderID, RenderObject, ResourceTables};

/// Objects sharing one material, in ascending ID order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderObjectBatch {
    pub material_id: MaterialID,
    pub objects: Vec<RenderID>,
}

/// Result of one batching pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderBatches {
    pub deferred: Vec<RenderObjectBatch>,
    pub forward: Vec<RenderObjectBatch>,
    /// Grid and gizmos drawn against the scene depth
    pub editor_depth_aware: Vec<RenderID>,
    /// Editor geometry drawn on top of everything
    pub editor_depth_unaware: Vec<RenderID>,
}

fn is_batchable(object: &RenderObject) -> bool {
    object.visible && !object.editor_object && object.has_vertex_data()
}

impl RenderBatches {
    /// Partition every visible, non-editor object with geometry by material.
    ///
    /// Materials are visited in table order and each visit scans all objects,
    /// so batch order and object order within a batch are both stable.
    pub fn build(tables: &ResourceTables) -> Self {
        let mut batches = Self::default();

        for (material_id, material) in tables.materials.iter() {
            let Some(shader) = tables.shaders.get(material.shader_id) else {
                log::warn!(
                    "Material {} ({}) has invalid shader {}; its objects are not drawn",
                    material.name,
                    material_id,
                    material.shader_id
                );
                continue;
            };

            let objects: Vec<RenderID> = tables
                .objects
                .iter()
                .filter(|(_, o)| o.material_id == material_id && is_batchable(o))
                .map(|(id, _)| id)
                .collect();
            if objects.is_empty() {
                continue;
            }

            let batch = RenderObjectBatch {
                material_id,
                objects,
            };
            if shader.descriptor.deferred {
                batches.deferred.push(batch);
            } else {
                batches.forward.push(batch);
            }
        }

        for (id, object) in tables.objects.iter() {
            if !object.editor_object || !object.visible || !object.has_vertex_data() {
                continue;
            }
            if object.depth_write {
                batches.editor_depth_aware.push(id);
            } else {
                batches.editor_depth_unaware.push(id);
            }
        }

        if cfg!(debug_assertions) {
            let expected = Self::expected_object_count(tables);
            let batched = batches.object_count();
            if batched != expected {
                log::error!(
                    "Batching dropped objects: {} batched, {} visible scene objects",
                    batched,
                    expected
                );
            }
        }

        log::debug!(
            "Batched {} deferred and {} forward batches ({} editor objects)",
            batches.deferred.len(),
            batches.forward.len(),
            batches.editor_depth_aware.len() + batches.editor_depth_unaware.len()
        );

        batches
    }

    /// Number of visible scene objects with geometry, whatever their material
    pub fn expected_object_count(tables: &ResourceTables) -> usize {
        tables.objects.iter().filter(|(_, o)| is_batchable(o)).count()
    }

    /// Objects across the deferred and forward buckets
    pub fn object_count(&self) -> usize {
        self.deferred
            .iter()
            .chain(self.forward.iter())
            .map(|b| b.objects.len())
            .sum()
    }

    pub fn batch_for(&self, material_id: MaterialID) -> Option<&RenderObjectBatch> {
        self.deferred
            .iter()
            .chain(self.forward.iter())
            .find(|b| b.material_id == material_id)
    }

    pub fn contains(&self, id: RenderID) -> bool {
        self.deferred
            .iter()
            .chain(self.forward.iter())
            .any(|b| b.objects.contains(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::resources::*;

    fn tables_with_builtin_shaders() -> ResourceTables {
        let mut tables = ResourceTables::new();
        for descriptor in builtin_shaders() {
            tables.shaders.insert_at_lowest_free(Shader { descriptor });
        }
        tables
    }

    fn add_material(tables: &mut ResourceTables, name: &str, shader: &str) -> MaterialID {
        let shader_id = tables.shader_id(shader).unwrap();
        let info = MaterialCreateInfo::new(name, shader);
        tables
            .materials
            .insert_at_lowest_free(Material::from_create_info(&info, shader_id))
    }

    fn add_object(
        tables: &mut ResourceTables,
        backend: &mut RecordingBackend,
        material: MaterialID,
        editor: bool,
    ) -> RenderID {
        let mesh = Mesh::triangle();
        let info = RenderObjectCreateInfo {
            editor_object: editor,
            ..RenderObjectCreateInfo::new("tri", material, mesh.vertex_data)
        };
        let mut object = RenderObject::from_create_info(info);
        object.upload(backend, VertexAttributes::POSITION).unwrap();
        tables.objects.insert_at_lowest_free(object)
    }

    #[test]
    fn test_objects_split_by_shader_pass() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut tables = tables_with_builtin_shaders();
        let pbr = add_material(&mut tables, "pbr", "pbr");
        let color = add_material(&mut tables, "color", "color");

        let a = add_object(&mut tables, &mut backend, pbr, false);
        let b = add_object(&mut tables, &mut backend, color, false);
        let c = add_object(&mut tables, &mut backend, pbr, false);

        let batches = RenderBatches::build(&tables);
        assert_eq!(batches.deferred.len(), 1);
        assert_eq!(batches.deferred[0].objects, vec![a, c]);
        assert_eq!(batches.forward[0].objects, vec![b]);
        assert_eq!(batches.object_count(), 3);
    }

    #[test]
    fn test_hidden_and_empty_objects_are_skipped() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut tables = tables_with_builtin_shaders();
        let pbr = add_material(&mut tables, "pbr", "pbr");
        let hidden = add_object(&mut tables, &mut backend, pbr, false);
        tables.objects.get_mut(hidden).unwrap().visible = false;
        let empty = RenderObjectCreateInfo::new("empty", pbr, VertexBufferDataCreateInfo::default());
        tables.objects.insert_at_lowest_free(RenderObject::from_create_info(empty));

        let batches = RenderBatches::build(&tables);
        assert!(batches.deferred.is_empty());
        assert_eq!(RenderBatches::expected_object_count(&tables), 0);
    }

    #[test]
    fn test_editor_objects_split_by_depth_write() {
        let mut backend = RecordingBackend::new(64, 64);
        let mut tables = tables_with_builtin_shaders();
        let color = add_material(&mut tables, "Grid", "color");
        let grid = add_object(&mut tables, &mut backend, color, true);
        let gizmo = add_object(&mut tables, &mut backend, color, true);
        tables.objects.get_mut(gizmo).unwrap().depth_write = false;

        let batches = RenderBatches::build(&tables);
        assert_eq!(batches.editor_depth_aware, vec![grid]);
        assert_eq!(batches.editor_depth_unaware, vec![gizmo]);
        assert!(batches.forward.is_empty());
    }
}
