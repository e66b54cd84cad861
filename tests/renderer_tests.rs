//! End-to-end renderer tests.
//!
//! Every test drives full frames through [`Renderer::update`] and
//! [`Renderer::render`]. The recording backend lets the tests inspect the
//! exact pass sequence and texture allocations; a few tests also run on a
//! headless wgpu device when one is available.
//!
//! ```bash
//! cargo test --test renderer_tests
//! ```

mod common;

use std::collections::HashSet;

use common::{
    add_mesh, command_signature, frame, init_logging, lit_frame, material, object_named, reflection_material, probe_scene,
    recording_renderer, settings, triangle, wgpu_renderer, Backend, HEIGHT, WIDTH,
};
use deferred_renderer::backend::{
    BindGroupEntry, BufferHandle, GraphicsBackend, LoadOp, PolygonMode, RecordedCommand, RecordedPass,
    RecordingBackend, TextureHandle,
};
use deferred_renderer::pipeline::ShadowPassState;
use deferred_renderer::resources::{MaterialCreateInfo, MaterialID, Mesh, RenderID, RenderObjectCreateInfo};
use deferred_renderer::scene::DirectionalLight;
use deferred_renderer::{RenderBatches, Renderer};
use glam::{Mat4, Vec3};
use rstest::rstest;

// ============================================================================
// Resource tables
// ============================================================================

/// Positive entries create an object, negative entries destroy the n-th
/// object created by this sequence (1-based)
#[rstest]
#[case::creates_only(&[1, 1, 1])]
#[case::destroy_middle(&[1, 1, 1, -2])]
#[case::destroy_then_reuse(&[1, 1, -1, 1, 1])]
#[case::destroy_everything(&[1, 1, -1, -2, 1])]
#[case::double_destroy(&[1, -1, -1, 1])]
fn test_render_ids_match_live_slots(#[case] ops: &[i32]) {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let pbr = material(&mut renderer, "pbr", "pbr");

    let mut live: HashSet<RenderID> = renderer.render_ids().into_iter().collect();
    let mut created = Vec::new();
    for &op in ops {
        if op > 0 {
            let lowest_free = renderer.tables().objects.next_available_id();
            let id = triangle(&mut renderer, pbr);
            assert_eq!(id, lowest_free, "new objects take the lowest free slot");
            assert!(live.insert(id), "{} handed out twice", id);
            created.push(id);
        } else {
            let id = created[(-op - 1) as usize];
            let existed = live.remove(&id);
            assert_eq!(renderer.destroy_render_object(id), existed);
        }

        let ids = renderer.render_ids();
        let unique: HashSet<RenderID> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len(), "duplicate ids in {:?}", ids);
        assert_eq!(unique, live);
        assert_eq!(ids.len(), renderer.tables().objects.len());
    }
}

#[test]
fn test_create_destroy_round_trip() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let pbr = material(&mut renderer, "pbr", "pbr");
    triangle(&mut renderer, pbr);

    let slot_count = renderer.tables().objects.slot_count();
    let next_id = renderer.tables().objects.next_available_id();
    let buffers = renderer.backend().live_buffer_count();

    let id = triangle(&mut renderer, pbr);
    assert_eq!(id, next_id);
    assert!(renderer.destroy_render_object(id));

    assert_eq!(renderer.tables().objects.slot_count(), slot_count);
    assert_eq!(renderer.tables().objects.next_available_id(), next_id);
    assert_eq!(renderer.backend().live_buffer_count(), buffers);
    assert!(!renderer.rebatch().contains(id));
}

// ============================================================================
// Batching
// ============================================================================

#[test]
fn test_rebatch_is_idempotent() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    probe_scene(&mut renderer);
    let color = material(&mut renderer, "color", "color");
    triangle(&mut renderer, color);

    let first = renderer.rebatch().clone();
    let second = renderer.rebatch().clone();
    assert_eq!(first, second);
    assert_eq!(first, RenderBatches::build(renderer.tables()));
}

#[rstest]
#[case::all_visible(0, 0)]
#[case::some_hidden(2, 0)]
#[case::editor_objects(0, 3)]
#[case::hidden_and_editor(3, 2)]
fn test_batch_sizes_match_visible_objects(#[case] hidden: usize, #[case] editor: usize) {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let pbr = material(&mut renderer, "pbr", "pbr");
    let color = material(&mut renderer, "color", "color");

    let mut ids = Vec::new();
    for i in 0..6 {
        let material = if i % 2 == 0 { pbr } else { color };
        ids.push(triangle(&mut renderer, material));
    }
    for id in ids.iter().take(hidden) {
        renderer.set_render_object_visible(*id, false);
    }
    for _ in 0..editor {
        let mut info = RenderObjectCreateInfo::new("gizmo", color, Mesh::triangle().vertex_data);
        info.editor_object = true;
        renderer.initialize_render_object(info);
    }

    let expected = renderer
        .tables()
        .objects
        .iter()
        .filter(|(_, o)| o.visible && !o.editor_object && o.vertex_count > 0)
        .count();
    let batches = renderer.rebatch();
    let batched: usize = batches
        .deferred
        .iter()
        .chain(batches.forward.iter())
        .map(|b| b.objects.len())
        .sum();

    assert_eq!(batched, expected);
    assert_eq!(batches.object_count(), batched);
    for id in ids.iter().take(hidden) {
        assert!(!batches.contains(*id));
    }
}

fn pbr_triangle_is_one_deferred_batch<B: GraphicsBackend>(mut renderer: Renderer<B>) {
    let pbr = material(&mut renderer, "pbr", "pbr");
    let id = triangle(&mut renderer, pbr);
    renderer.set_render_object_visible(id, true);

    let frame = lit_frame(WIDTH, HEIGHT);
    renderer.update(&frame);
    renderer.render(&frame);

    let batches = renderer.batches();
    let holding: Vec<_> = batches
        .deferred
        .iter()
        .chain(batches.forward.iter())
        .filter(|b| b.objects.contains(&id))
        .collect();
    assert_eq!(holding.len(), 1);
    assert_eq!(holding[0].material_id, pbr);
    assert_eq!(holding[0].objects, vec![id]);
    assert!(batches.deferred.iter().any(|b| b.material_id == pbr));
    assert_eq!(renderer.frames_rendered(), 1);
    renderer.destroy();
}

#[rstest]
#[case::recording(Backend::Recording)]
#[case::wgpu_headless(Backend::WgpuHeadless)]
fn test_pbr_triangle_is_one_deferred_batch(#[case] backend: Backend) {
    match backend {
        Backend::Recording => pbr_triangle_is_one_deferred_batch(recording_renderer(WIDTH, HEIGHT)),
        Backend::WgpuHeadless => {
            let Some(renderer) = wgpu_renderer(WIDTH, HEIGHT) else {
                eprintln!("Backend {:?} not available, skipping", backend);
                return;
            };
            pbr_triangle_is_one_deferred_batch(renderer);
        }
    }
}

// ============================================================================
// Shadows
// ============================================================================

fn shadow_map_handle(renderer: &Renderer<RecordingBackend>) -> TextureHandle {
    let id = renderer.gpu().targets.shadow_map;
    renderer.tables().textures.get(id).unwrap().handle
}

#[rstest]
#[case::no_light(None)]
#[case::cast_shadow_off(Some(DirectionalLight { cast_shadow: false, ..DirectionalLight::default() }))]
#[case::light_disabled(Some(DirectionalLight { enabled: false, ..DirectionalLight::default() }))]
fn test_shadowless_frame_skips_shadow_pass(#[case] light: Option<DirectionalLight>) {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let pbr = material(&mut renderer, "pbr", "pbr");
    add_mesh(&mut renderer, "cube", pbr, &Mesh::cube(), Mat4::IDENTITY);

    let mut frame = frame(WIDTH, HEIGHT);
    frame.directional_light = light;
    renderer.backend_mut().clear_commands();
    renderer.update(&frame);
    renderer.render(&frame);

    assert_eq!(renderer.shadow_state(), ShadowPassState::Disabled);
    let labels = renderer.backend().pass_labels();
    assert!(!labels.iter().any(|l| l == "Shadow Pass"));
    assert!(labels.iter().any(|l| l == "Shading Pass"));

    let shadow_map = shadow_map_handle(&renderer);
    let backend = renderer.backend();
    for pass in backend.passes() {
        let depth = pass
            .descriptor
            .depth_stencil_attachment
            .as_ref()
            .and_then(|d| backend.view_texture(d.view));
        assert_ne!(depth, Some(shadow_map), "{} wrote the shadow map", pass.label());
    }
}

#[test]
fn test_shadow_caster_renders_shadow_map_first() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let pbr = material(&mut renderer, "pbr", "pbr");
    add_mesh(&mut renderer, "cube", pbr, &Mesh::cube(), Mat4::IDENTITY);

    let frame = lit_frame(WIDTH, HEIGHT);
    renderer.backend_mut().clear_commands();
    renderer.update(&frame);
    renderer.render(&frame);

    assert_eq!(renderer.shadow_state(), ShadowPassState::Rendered);
    let passes = renderer.backend().passes();
    let shadow = &passes[0];
    assert_eq!(shadow.label(), "Shadow Pass");
    assert!(shadow.descriptor.color_attachments.is_empty());
    assert_eq!(shadow.draw_count(), 1);
}

// ============================================================================
// Resize
// ============================================================================

#[test]
fn test_resize_recreates_only_screen_targets() {
    let mut renderer = recording_renderer(800, 600);
    let pbr = material(&mut renderer, "pbr", "pbr");
    triangle(&mut renderer, pbr);
    renderer.render(&frame(800, 600));

    let materials_before: Vec<_> = renderer
        .tables()
        .materials
        .iter()
        .map(|(id, m)| (id, m.name.clone()))
        .collect();
    let targets = renderer.gpu().targets.clone();
    let screen_handles: Vec<_> = targets
        .screen_sized()
        .iter()
        .map(|id| renderer.tables().textures.get(*id).unwrap().handle)
        .collect();
    let shadow_map = shadow_map_handle(&renderer);
    let live_textures = renderer.backend().live_texture_count();
    let destroyed_before = renderer.backend().destroyed_textures().len();

    renderer.on_window_size_changed(1920, 1080);

    let backend = renderer.backend();
    for (id, old) in targets.screen_sized().iter().zip(&screen_handles) {
        let texture = renderer.tables().textures.get(*id).unwrap();
        assert_ne!(texture.handle, *old);
        assert_eq!((texture.descriptor.width, texture.descriptor.height), (1920, 1080));
        assert!(backend.destroyed_textures().contains(old));
    }
    assert_eq!(
        backend.destroyed_textures().len(),
        destroyed_before + screen_handles.len()
    );
    assert_eq!(shadow_map_handle(&renderer), shadow_map);
    assert_eq!(backend.live_texture_count(), live_textures);
    assert_eq!((renderer.gpu().targets.width, renderer.gpu().targets.height), (1920, 1080));

    let materials_after: Vec<_> = renderer
        .tables()
        .materials
        .iter()
        .map(|(id, m)| (id, m.name.clone()))
        .collect();
    assert_eq!(materials_before, materials_after);

    renderer.backend_mut().clear_commands();
    renderer.render(&frame(1920, 1080));
    assert!(renderer
        .backend()
        .pass_labels()
        .iter()
        .any(|l| l == "G-Buffer Pass"));
}

// ============================================================================
// Reflection probes
// ============================================================================

#[test]
fn test_reflection_probe_capture_is_repeatable() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let probe = probe_scene(&mut renderer);
    let frame = lit_frame(WIDTH, HEIGHT);

    renderer.backend_mut().clear_commands();
    renderer.update(&frame);
    let first = command_signature(&renderer.backend_mut().take_commands());
    assert_eq!(renderer.active_probe(), Some(probe));
    assert!(first.iter().any(|c| c.starts_with("pass Probe G-Buffer face 5")));

    renderer.render(&frame);
    renderer.render(&frame);

    renderer.recapture_reflection_probe();
    renderer.backend_mut().clear_commands();
    renderer.update(&frame);
    let second = command_signature(&renderer.backend_mut().take_commands());

    assert_eq!(first, second);
}

#[test]
fn test_probe_without_skybox_is_not_captured() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let probe = renderer
        .initialize_material(&MaterialCreateInfo {
            generate_reflection_probe_maps: true,
            generated_cubemap_size: 16,
            ..MaterialCreateInfo::new("Probe", "pbr")
        })
        .unwrap();
    add_mesh(&mut renderer, "Probe", probe, &Mesh::sphere(8, 4), Mat4::IDENTITY);

    renderer.backend_mut().clear_commands();
    renderer.update(&lit_frame(WIDTH, HEIGHT));
    assert_eq!(renderer.active_probe(), None);
    assert!(renderer.backend().passes().is_empty());
}

#[test]
fn test_probe_follows_its_object() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let probe = probe_scene(&mut renderer);
    let frame = lit_frame(WIDTH, HEIGHT);
    renderer.update(&frame);
    renderer.render(&frame);

    let sphere = renderer
        .render_ids()
        .into_iter()
        .find(|id| renderer.get_render_object(*id).is_some_and(|o| o.material_id == probe))
        .unwrap();
    renderer.set_render_object_transform(sphere, Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)));

    renderer.recapture_reflection_probe();
    renderer.backend_mut().clear_commands();
    renderer.update(&frame);
    let moved = command_signature(&renderer.backend_mut().take_commands());

    renderer.set_render_object_transform(sphere, Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)));
    renderer.recapture_reflection_probe();
    renderer.backend_mut().clear_commands();
    renderer.update(&frame);
    let back = command_signature(&renderer.backend_mut().take_commands());

    assert_ne!(moved, back, "camera position for the capture did not change");
}

#[test]
fn test_skybox_set_after_first_update_starts_capture() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let mirror = reflection_material(&mut renderer, "Mirror");
    add_mesh(&mut renderer, "Mirror", mirror, &Mesh::sphere(8, 4), Mat4::IDENTITY);
    let frame = lit_frame(WIDTH, HEIGHT);
    renderer.update(&frame);
    assert_eq!(renderer.active_probe(), None);

    let sky = material(&mut renderer, "Sky", "skybox");
    let skybox = add_mesh(&mut renderer, "Skybox", sky, &Mesh::skybox(), Mat4::IDENTITY);
    assert!(renderer.set_skybox_mesh(skybox));
    renderer.update(&frame);

    assert_eq!(renderer.active_probe(), Some(mirror));
}

#[test]
fn test_assigning_reflection_material_starts_capture() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let first = probe_scene(&mut renderer);
    let frame = lit_frame(WIDTH, HEIGHT);
    renderer.update(&frame);
    assert_eq!(renderer.active_probe(), Some(first));

    let plain = material(&mut renderer, "Plain", "pbr");
    let ball = add_mesh(
        &mut renderer,
        "Ball",
        plain,
        &Mesh::sphere(8, 4),
        Mat4::from_translation(Vec3::new(-2.0, 1.0, 0.0)),
    );
    let second = reflection_material(&mut renderer, "Second reflection");
    renderer.backend_mut().clear_commands();
    renderer.update(&frame);
    assert!(renderer.backend().passes().is_empty());

    assert!(renderer.set_render_object_material_id(ball, second));
    renderer.update(&frame);

    assert_eq!(renderer.active_probe(), Some(second));
    assert!(renderer
        .backend()
        .pass_labels()
        .iter()
        .any(|l| l.starts_with("Probe G-Buffer")));
}

// ============================================================================
// Editor and overlay passes
// ============================================================================

fn pass_named<'a>(passes: &'a [RecordedPass], label: &str) -> &'a RecordedPass {
    passes
        .iter()
        .find(|p| p.label() == label)
        .unwrap_or_else(|| panic!("no {} recorded", label))
}

fn vertex_buffers(pass: &RecordedPass) -> Vec<BufferHandle> {
    pass.commands
        .iter()
        .filter_map(|c| match c {
            RecordedCommand::SetVertexBuffer { buffer, .. } => Some(*buffer),
            _ => None,
        })
        .collect()
}

fn vertex_buffer_of<B: GraphicsBackend>(renderer: &Renderer<B>, name: &str) -> BufferHandle {
    let id = object_named(renderer, name);
    renderer.get_render_object(id).unwrap().vertex_buffer.unwrap()
}

#[test]
fn test_editor_objects_split_by_depth_awareness() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let pbr = material(&mut renderer, "pbr", "pbr");
    triangle(&mut renderer, pbr);
    renderer.backend_mut().clear_commands();
    renderer.render(&frame(WIDTH, HEIGHT));

    let grid = vertex_buffer_of(&renderer, "Grid");
    let axes = vertex_buffer_of(&renderer, "World origin");
    let passes = renderer.backend().passes();

    let editor = pass_named(&passes, "Editor Pass");
    assert!(vertex_buffers(editor).contains(&grid));
    assert!(!vertex_buffers(editor).contains(&axes));
    let depth = editor.descriptor.depth_stencil_attachment.as_ref().unwrap();
    assert_eq!(depth.depth_load_op, LoadOp::Load);

    let overlay = pass_named(&passes, "Overlay Pass");
    assert!(vertex_buffers(overlay).contains(&axes));
    assert!(!vertex_buffers(overlay).contains(&grid));
    let depth = overlay.descriptor.depth_stencil_attachment.as_ref().unwrap();
    assert!(matches!(depth.depth_load_op, LoadOp::Clear(_)));

    // both test against the offscreen depth the scene was drawn into
    let backend = renderer.backend();
    let offscreen_depth = renderer
        .tables()
        .textures
        .get(renderer.gpu().targets.offscreen_depth)
        .unwrap()
        .handle;
    for pass in [editor, overlay] {
        let view = pass.descriptor.depth_stencil_attachment.as_ref().unwrap().view;
        assert_eq!(backend.view_texture(view), Some(offscreen_depth));
    }
}

#[test]
fn test_hidden_grid_is_not_drawn() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let grid = object_named(&renderer, "Grid");
    renderer.set_render_object_visible(grid, false);
    renderer.backend_mut().clear_commands();
    renderer.render(&frame(WIDTH, HEIGHT));

    let passes = renderer.backend().passes();
    assert_eq!(pass_named(&passes, "Editor Pass").draw_count(), 0);
    assert_eq!(pass_named(&passes, "Overlay Pass").draw_count(), 1);
}

#[rstest]
#[case::wireframe(RecordingBackend::new(WIDTH, HEIGHT), PolygonMode::Line)]
#[case::filled(RecordingBackend::new(WIDTH, HEIGHT).without_wireframe(), PolygonMode::Fill)]
fn test_selection_outline_uses_selection_material(
    #[case] backend: RecordingBackend,
    #[case] mode: PolygonMode,
) {
    init_logging();
    let mut renderer = Renderer::new(backend, settings()).unwrap();
    let pbr = material(&mut renderer, "pbr", "pbr");
    let cube = add_mesh(&mut renderer, "cube", pbr, &Mesh::cube(), Mat4::IDENTITY);
    renderer.set_selected_object(Some(cube));
    renderer.backend_mut().clear_commands();
    renderer.render(&frame(WIDTH, HEIGHT));

    let selection = renderer.get_material_id("Selected object").unwrap();
    let group = renderer.gpu().material_bindings.get(selection, None).unwrap();
    let cube_buffer = renderer.get_render_object(cube).unwrap().vertex_buffer.unwrap();
    let passes = renderer.backend().passes();
    let editor = pass_named(&passes, "Editor Pass");

    let bound = editor
        .commands
        .iter()
        .position(|c| *c == RecordedCommand::SetBindGroup { index: 2, bind_group: group })
        .expect("selection material was not bound");
    assert!(editor.commands[bound..]
        .iter()
        .any(|c| matches!(c, RecordedCommand::SetVertexBuffer { buffer, .. } if *buffer == cube_buffer)));

    let pipeline = editor.commands[..bound]
        .iter()
        .rev()
        .find_map(|c| match c {
            RecordedCommand::SetPipeline(p) => Some(*p),
            _ => None,
        })
        .unwrap();
    let descriptor = renderer.backend().pipeline_descriptor(pipeline).unwrap();
    assert_eq!(descriptor.polygon_mode, mode);
    assert!(!descriptor.depth_stencil.as_ref().unwrap().depth_write_enabled);
}

// ============================================================================
// Material lifetime
// ============================================================================

/// Every bind group set during the recorded passes must still exist and only
/// reference live texture views
fn assert_bindings_are_live(backend: &RecordingBackend) {
    for pass in backend.passes() {
        for command in &pass.commands {
            let RecordedCommand::SetBindGroup { bind_group, .. } = command else {
                continue;
            };
            let entries = backend
                .bind_group_entries(*bind_group)
                .unwrap_or_else(|| panic!("{} bound a destroyed bind group", pass.label()));
            for (binding, entry) in entries {
                if let BindGroupEntry::Texture(view) = entry {
                    assert!(
                        backend.view_texture(*view).is_some(),
                        "{} binding {} samples a destroyed texture",
                        pass.label(),
                        binding
                    );
                }
            }
        }
    }
}

#[test]
fn test_clear_materials_keeps_engine_materials() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    probe_scene(&mut renderer);
    let frame = lit_frame(WIDTH, HEIGHT);
    renderer.update(&frame);
    renderer.render(&frame);

    let engine_materials: Vec<_> = renderer
        .tables()
        .materials
        .iter()
        .filter(|(_, m)| m.engine_material)
        .map(|(id, m)| (id, m.name.clone()))
        .collect();
    let gbuffer = renderer.get_material_id("GBuffer material").unwrap();
    assert!(renderer.gpu().material_bindings.get(gbuffer, None).is_some());
    assert!(!renderer.valid_material_names().is_empty());

    renderer.clear_materials(false);

    let remaining: Vec<_> = renderer
        .tables()
        .materials
        .iter()
        .map(|(id, m)| (id, m.name.clone()))
        .collect();
    assert_eq!(remaining, engine_materials);
    assert!(renderer.valid_material_names().is_empty());
    assert_eq!(renderer.active_probe(), None);
    assert!(renderer.gpu().material_bindings.get(gbuffer, None).is_none());

    for name in ["Skybox", "Ground", "Red cube", "Probe sphere"] {
        let id = object_named(&renderer, name);
        assert_eq!(renderer.get_render_object(id).unwrap().material_id, MaterialID(0), "{}", name);
    }
    let batches = renderer.rebatch().clone();
    for name in ["Ground", "Red cube", "Probe sphere"] {
        assert!(batches.contains(object_named(&renderer, name)), "{} was not batched", name);
    }

    renderer.backend_mut().clear_commands();
    renderer.update(&frame);
    renderer.render(&frame);
    assert_bindings_are_live(renderer.backend());
}

#[test]
fn test_remove_material_releases_generated_maps() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let mirror = probe_scene(&mut renderer);
    let shiny = renderer
        .initialize_material(&MaterialCreateInfo {
            enable_irradiance_sampler: true,
            irradiance_sampler_material: Some(mirror),
            enable_prefiltered_map: true,
            prefilter_map_material: Some(mirror),
            ..MaterialCreateInfo::new("Shiny", "pbr")
        })
        .unwrap();
    triangle(&mut renderer, shiny);
    let frame = lit_frame(WIDTH, HEIGHT);
    renderer.update(&frame);
    renderer.render(&frame);
    assert!(renderer.gpu().material_bindings.get(shiny, None).is_some());

    let maps: Vec<_> = renderer.get_material(mirror).unwrap().generated.all().collect();
    assert!(!maps.is_empty());

    assert!(renderer.remove_material(mirror));

    assert_eq!(renderer.get_material_id("Probe"), None);
    assert_eq!(renderer.active_probe(), None);
    for texture in maps {
        assert!(renderer.tables().textures.get(texture).is_none());
    }
    let shiny_material = renderer.get_material(shiny).unwrap();
    assert_eq!(shiny_material.irradiance_source, None);
    assert_eq!(shiny_material.prefilter_source, None);
    assert!(renderer.gpu().material_bindings.get(shiny, None).is_none());
    let sphere = object_named(&renderer, "Probe sphere");
    assert_eq!(renderer.get_render_object(sphere).unwrap().material_id, MaterialID(0));

    renderer.backend_mut().clear_commands();
    renderer.render(&frame);
    assert_bindings_are_live(renderer.backend());
}

#[test]
fn test_remove_material_refuses_engine_and_missing_materials() {
    let mut renderer = recording_renderer(WIDTH, HEIGHT);
    let pbr = material(&mut renderer, "pbr", "pbr");
    let grid = renderer.get_material_id("Grid").unwrap();

    assert!(!renderer.remove_material(MaterialID(0)));
    assert!(!renderer.remove_material(grid));
    assert!(renderer.remove_material(pbr));
    assert!(!renderer.remove_material(pbr));
    assert_eq!(renderer.get_material_id("Fallback"), Some(MaterialID(0)));
    assert_eq!(renderer.get_material_id("Grid"), Some(grid));
}
