//! Shared fixtures for the renderer integration tests.
//!
//! Most tests drive a [`RecordingBackend`], which needs no GPU. Tests that
//! are worth running on real hardware go through [`Backend`] and skip when
//! the backend cannot be created.

#![allow(dead_code)]

use deferred_renderer::backend::{GraphicsBackend, RecordedCommand, RecordingBackend};
use deferred_renderer::resources::{MaterialCreateInfo, MaterialID, Mesh, RenderID, RenderObjectCreateInfo};
use deferred_renderer::scene::{Camera, CameraView, DirectionalLight, FrameContext};
use deferred_renderer::{AnyBackend, BackendType, Renderer, RendererSettings};
use glam::{Mat4, Vec3};

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;

/// Backends a test can run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Command recorder, always available
    Recording,
    /// Offscreen wgpu device, when an adapter exists
    WgpuHeadless,
}

/// Settings that keep test allocations small
pub fn settings() -> RendererSettings {
    RendererSettings {
        shadow_map_size: 256,
        brdf_lut_size: 32,
        ..Default::default()
    }
}

/// Route `log` output to the test harness; `RUST_LOG=debug` shows it
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn recording_renderer(width: u32, height: u32) -> Renderer<RecordingBackend> {
    init_logging();
    Renderer::new(RecordingBackend::new(width, height), settings()).unwrap()
}

pub fn wgpu_renderer(width: u32, height: u32) -> Option<Renderer<AnyBackend>> {
    init_logging();
    let backend = match AnyBackend::headless(BackendType::Wgpu, width, height) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("wgpu headless backend not available: {}", e);
            return None;
        }
    };
    Renderer::new(backend, settings()).ok()
}

pub fn camera() -> CameraView {
    let mut camera = Camera::new(Vec3::new(0.0, 2.0, 6.0), Vec3::ZERO);
    camera.set_aspect(WIDTH as f32, HEIGHT as f32);
    camera.view()
}

pub fn frame(width: u32, height: u32) -> FrameContext {
    FrameContext::new(camera(), (width, height))
}

pub fn lit_frame(width: u32, height: u32) -> FrameContext {
    frame(width, height).with_directional_light(DirectionalLight::new(
        Vec3::new(-0.3, -1.0, -0.2),
        Vec3::ONE,
        2.0,
    ))
}

pub fn material<B: GraphicsBackend>(renderer: &mut Renderer<B>, name: &str, shader: &str) -> MaterialID {
    renderer
        .initialize_material(&MaterialCreateInfo::new(name, shader))
        .unwrap()
}

pub fn add_mesh<B: GraphicsBackend>(
    renderer: &mut Renderer<B>,
    name: &str,
    material: MaterialID,
    mesh: &Mesh,
    transform: Mat4,
) -> RenderID {
    let mut info = RenderObjectCreateInfo::new(name, material, mesh.vertex_data.clone()).with_transform(transform);
    info.indices = mesh.indices();
    info.topology = mesh.topology;
    renderer.initialize_render_object(info)
}

pub fn triangle<B: GraphicsBackend>(renderer: &mut Renderer<B>, material: MaterialID) -> RenderID {
    add_mesh(renderer, "triangle", material, &Mesh::triangle(), Mat4::IDENTITY)
}

/// Material capturing the scene around its object, with small targets
pub fn reflection_material<B: GraphicsBackend>(renderer: &mut Renderer<B>, name: &str) -> MaterialID {
    renderer
        .initialize_material(&MaterialCreateInfo {
            generate_reflection_probe_maps: true,
            generate_irradiance_sampler: true,
            generate_prefiltered_map: true,
            generated_cubemap_size: 16,
            generated_irradiance_cubemap_size: 8,
            generated_prefiltered_map_size: 16,
            ..MaterialCreateInfo::new(name, "pbr").with_metallic(1.0)
        })
        .unwrap()
}

/// Render object called `name`; engine objects have no ID accessor
pub fn object_named<B: GraphicsBackend>(renderer: &Renderer<B>, name: &str) -> RenderID {
    renderer
        .tables()
        .objects
        .iter()
        .find(|(_, o)| o.name == name)
        .map(|(id, _)| id)
        .unwrap_or_else(|| panic!("no render object named {}", name))
}

/// A skybox plus a probe sphere over a few lit objects
pub fn probe_scene<B: GraphicsBackend>(renderer: &mut Renderer<B>) -> MaterialID {
    let sky = material(renderer, "Sky", "skybox");
    let skybox = add_mesh(renderer, "Skybox", sky, &Mesh::skybox(), Mat4::IDENTITY);
    assert!(renderer.set_skybox_mesh(skybox));

    let ground = material(renderer, "Ground", "pbr");
    add_mesh(renderer, "Ground", ground, &Mesh::plane(10.0, 10.0, 1), Mat4::IDENTITY);
    let red = renderer
        .initialize_material(&MaterialCreateInfo::new("Red", "pbr").with_albedo(Vec3::new(1.0, 0.1, 0.1)))
        .unwrap();
    add_mesh(
        renderer,
        "Red cube",
        red,
        &Mesh::cube(),
        Mat4::from_translation(Vec3::new(2.0, 0.5, 0.0)),
    );

    let probe = reflection_material(renderer, "Probe");
    add_mesh(
        renderer,
        "Probe sphere",
        probe,
        &Mesh::sphere(16, 8),
        Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)),
    );
    probe
}

/// The recorded stream with handles erased: pass labels, viewports, draws
/// and every byte written to a buffer
pub fn command_signature(commands: &[RecordedCommand]) -> Vec<String> {
    commands
        .iter()
        .filter_map(|command| match command {
            RecordedCommand::BeginRenderPass(desc) => Some(format!(
                "pass {} ({} color)",
                desc.label.as_deref().unwrap_or(""),
                desc.color_attachments.len()
            )),
            RecordedCommand::WriteBuffer { offset, data, .. } => Some(format!("write {} {:?}", offset, data)),
            RecordedCommand::SetViewport { width, height } => Some(format!("viewport {}x{}", width, height)),
            RecordedCommand::Draw { vertices } => Some(format!("draw {:?}", vertices)),
            RecordedCommand::DrawIndexed { indices } => Some(format!("draw indexed {:?}", indices)),
            _ => None,
        })
        .collect()
}
