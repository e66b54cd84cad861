//! PBR scene with a captured reflection probe.
//!
//! ```bash
//! # Windowed, wgpu
//! cargo run --example demo
//!
//! # Native Vulkan
//! cargo run --example demo -- --backend vulkan
//!
//! # Render 30 frames without a window and save the last one
//! cargo run --example demo -- --headless --frames 30 --screenshot
//! ```

use clap::Parser;
use deferred_renderer::resources::{
    MaterialCreateInfo, MaterialID, Mesh, RenderID, RenderObjectCreateInfo, TextureData,
};
use deferred_renderer::scene::{Camera, DirectionalLight, FrameContext, PointLight};
use deferred_renderer::{
    window, AnyBackend, BackendType, EngineConfig, Renderer, RendererError, RendererResult, RendererSettings,
};
use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// Cross-platform backend via wgpu
    #[default]
    Wgpu,
    /// Native Vulkan via ash (needs a window)
    Vulkan,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Wgpu => BackendType::Wgpu,
            CliBackend::Vulkan => BackendType::Vulkan,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "demo", about = "Deferred PBR renderer demo")]
struct Args {
    #[arg(long, value_enum, default_value_t = CliBackend::Wgpu)]
    backend: CliBackend,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Render offscreen (wgpu only)
    #[arg(long)]
    headless: bool,

    /// Save a screenshot of the last frame
    #[arg(long)]
    screenshot: bool,

    #[arg(long)]
    no_vsync: bool,
}

struct Demo {
    renderer: Renderer<AnyBackend>,
    camera: Camera,
    spinner: Option<RenderID>,
    frame_index: u64,
    max_frames: Option<u64>,
    screenshot: bool,
}

impl Demo {
    fn new(mut renderer: Renderer<AnyBackend>, args: &Args) -> RendererResult<Self> {
        let spinner = build_scene(&mut renderer)?;
        let mut camera = Camera::new(Vec3::new(0.0, 3.0, 9.0), Vec3::new(0.0, 0.5, 0.0));
        camera.set_aspect(args.width as f32, args.height as f32);
        Ok(Self {
            renderer,
            camera,
            spinner: Some(spinner),
            frame_index: 0,
            max_frames: args.frames,
            screenshot: args.screenshot,
        })
    }

    fn frame_context(&self, size: (u32, u32)) -> FrameContext {
        let time = self.frame_index as f32 / 60.0;
        let mut frame = FrameContext::new(self.camera.view(), size)
            .with_directional_light(DirectionalLight::new(
                Vec3::new(-0.4, -1.0, -0.3),
                Vec3::new(1.0, 0.95, 0.85),
                3.0,
            ))
            .with_point_light(PointLight::new(
                Vec3::new(2.0 * time.cos(), 1.5, 2.0 * time.sin()),
                Vec3::new(0.3, 0.5, 1.0),
                8.0,
            ));
        frame.time = time;
        frame
    }

    /// Advance one frame; `false` once the frame budget is spent
    fn step(&mut self, size: (u32, u32)) -> bool {
        self.camera.orbit(0.004);
        if let Some(spinner) = self.spinner {
            let angle = self.frame_index as f32 * 0.02;
            self.renderer.set_render_object_transform(
                spinner,
                Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0)) * Mat4::from_rotation_y(angle),
            );
        }

        let last = self.max_frames.is_some_and(|max| self.frame_index + 1 >= max);
        if last && self.screenshot {
            if let Err(e) = self.renderer.request_screenshot() {
                log::warn!("Screenshot skipped: {}", e);
            }
        }

        let frame = self.frame_context(size);
        self.renderer.update(&frame);
        self.renderer.render(&frame);
        self.frame_index += 1;
        !last
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.camera.set_aspect(width as f32, height as f32);
        self.renderer.on_window_size_changed(width, height);
    }

    /// Let an in-flight screenshot finish before the renderer goes away
    fn finish(mut self, size: (u32, u32)) {
        let frame = self.frame_context(size);
        while self.renderer.is_saving_screenshot() {
            std::thread::sleep(std::time::Duration::from_millis(10));
            self.renderer.update(&frame);
        }
        log::info!("Rendered {} frames", self.renderer.frames_rendered());
        self.renderer.destroy();
    }
}

/// Spheres over a ground plane, an HDR sky and a mirror-like probe sphere.
/// Returns the cube that spins in the middle.
fn build_scene(renderer: &mut Renderer<AnyBackend>) -> RendererResult<RenderID> {
    let sky_texture = renderer.initialize_texture(&sky_gradient(256, 128))?;
    let sky = renderer.initialize_material(&MaterialCreateInfo {
        enable_hdr_equirectangular_sampler: true,
        hdr_equirectangular_texture: Some(sky_texture),
        generate_hdr_cubemap_sampler: true,
        generate_irradiance_sampler: true,
        generate_prefiltered_map: true,
        ..MaterialCreateInfo::new("Sky", "skybox")
    })?;
    let skybox = add_mesh(renderer, "Skybox", sky, &Mesh::skybox(), Mat4::IDENTITY);
    renderer.set_skybox_mesh(skybox);

    let checker = renderer.initialize_texture(&TextureData::checkerboard(
        8,
        [200, 200, 200, 255],
        [60, 60, 60, 255],
    ))?;
    let ground = renderer.initialize_material(
        &MaterialCreateInfo::new("Ground", "pbr")
            .with_albedo_texture(checker)
            .with_roughness(0.9),
    )?;
    add_mesh(renderer, "Ground", ground, &Mesh::plane(20.0, 20.0, 1), Mat4::IDENTITY);

    for i in 0..5 {
        let t = i as f32 / 4.0;
        let material = renderer.initialize_material(
            &MaterialCreateInfo::new(&format!("Sphere {}", i), "pbr")
                .with_albedo(Vec3::new(0.9, 0.3 + 0.5 * t, 0.2))
                .with_metallic(t)
                .with_roughness(1.0 - 0.8 * t),
        )?;
        let position = Vec3::new(-4.0 + 2.0 * i as f32, 0.5, -2.0);
        add_mesh(
            renderer,
            &format!("Sphere {}", i),
            material,
            &Mesh::sphere(32, 16),
            Mat4::from_translation(position) * Mat4::from_scale(Vec3::splat(0.5)),
        );
    }

    let probe = renderer.initialize_material(&MaterialCreateInfo {
        generate_reflection_probe_maps: true,
        generate_irradiance_sampler: true,
        generate_prefiltered_map: true,
        ..MaterialCreateInfo::new("Chrome", "pbr_ws")
            .with_metallic(1.0)
            .with_roughness(0.1)
    })?;
    add_mesh(
        renderer,
        "Chrome sphere",
        probe,
        &Mesh::sphere(48, 24),
        Mat4::from_translation(Vec3::new(0.0, 1.0, 2.0)),
    );

    let brick = renderer.initialize_material(&MaterialCreateInfo::new("Brick", "pbr").with_albedo(Vec3::new(0.6, 0.2, 0.1)))?;
    Ok(add_mesh(renderer, "Spinner", brick, &Mesh::cube(), Mat4::IDENTITY))
}

fn add_mesh(
    renderer: &mut Renderer<AnyBackend>,
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

/// Horizon-to-zenith gradient with a bright band for the sun
fn sky_gradient(width: u32, height: u32) -> TextureData {
    let mut pixels = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        let v = y as f32 / (height - 1) as f32;
        let up = (1.0 - 2.0 * v).max(0.0);
        let color = Vec3::new(0.9, 0.85, 0.8).lerp(Vec3::new(0.2, 0.4, 0.9), up);
        let band = if (0.3..0.34).contains(&v) { 4.0 } else { 1.0 };
        for _ in 0..width {
            pixels.extend_from_slice(&[color.x * band, color.y * band, color.z * band, 1.0]);
        }
    }
    TextureData::from_rgba32f("Sky gradient", width, height, &pixels)
}

fn run_headless(args: &Args, settings: RendererSettings) -> RendererResult<()> {
    let backend = AnyBackend::headless(args.backend.into(), args.width, args.height)?;
    let renderer = Renderer::new(backend, settings)?;
    let mut demo = Demo::new(renderer, args)?;
    if demo.max_frames.is_none() {
        demo.max_frames = Some(60);
    }
    let size = (args.width, args.height);
    while demo.step(size) {}
    demo.finish(size);
    Ok(())
}

fn run_windowed(args: Args, config: EngineConfig) -> RendererResult<()> {
    let backend_type: BackendType = args.backend.into();
    let vsync = config.settings.vsync;
    let settings = config.settings.clone();

    window::run(
        &config.title,
        config.width,
        config.height,
        move |window| {
            let backend = AnyBackend::new(window.window_arc(), backend_type, vsync)?;
            log::info!("Using {} backend", backend.name());
            let renderer = Renderer::new(backend, settings)?;
            Demo::new(renderer, &args).map(Some)
        },
        |demo, window| {
            if window.was_resized() {
                let (w, h) = window.dimensions();
                if let Some(demo) = demo.as_mut() {
                    demo.resize(w, h);
                }
                window.clear_resize_flag();
            }
            let size = window.dimensions();
            let keep_going = demo.as_mut().is_some_and(|d| d.step(size));
            if !keep_going {
                if let Some(demo) = demo.take() {
                    demo.finish(size);
                }
            }
            keep_going
        },
    )
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = EngineConfig {
        width: args.width,
        height: args.height,
        settings: RendererSettings {
            backend: args.backend.into(),
            vsync: !args.no_vsync,
            ..Default::default()
        },
        ..Default::default()
    };

    let result = if args.headless {
        run_headless(&args, config.settings.clone())
    } else {
        run_windowed(args, config)
    };

    if let Err(e) = result {
        log::error!("Demo failed: {}", e);
        if let RendererError::Backend(_) = e {
            log::error!("Try --backend wgpu, or check that a GPU driver is installed");
        }
        std::process::exit(1);
    }
}
