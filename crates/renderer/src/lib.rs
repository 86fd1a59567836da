//! Renderer: wgpu init + depth + toon-shaded scene.
//!
//! Two fixed passes: a light-ramp toon pass over every object, then an
//! inverted-hull ink pass over the model. The ink pass is best-effort;
//! if its pipeline is rejected the scene still renders, just without
//! outlines.

use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use wgpu::{
    util::DeviceExt, BindGroup, BindGroupLayout, BindGroupLayoutDescriptor, BindGroupLayoutEntry,
    BindingType, BlendState, Buffer, BufferBindingType, BufferUsages, ColorTargetState,
    ColorWrites, CommandEncoderDescriptor, DepthBiasState, DepthStencilState, Device,
    DeviceDescriptor, Extent3d, Features, FragmentState, Instance, InstanceDescriptor, Limits,
    LoadOp, Operations, PipelineLayout, PipelineLayoutDescriptor, PowerPreference, PresentMode,
    Queue, RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline,
    RenderPipelineDescriptor, ShaderModuleDescriptor, ShaderSource, ShaderStages, StoreOp,
    Surface, SurfaceConfiguration, SurfaceError, TextureDescriptor, TextureDimension,
    TextureFormat, TextureUsages, TextureView, TextureViewDescriptor, VertexBufferLayout,
    VertexState, VertexStepMode,
};
use winit::{dpi::PhysicalSize, window::Window};

use asset::{MeshData, MeshVertex};
use corelib::camera::Camera;
use corelib::scene::{LightRig, Material};
use corelib::transform::Transform;

/// Vertex: position + normal.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub normal: [f32; 3],
}
impl Vertex {
    pub const LAYOUT: VertexBufferLayout<'static> = VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: VertexStepMode::Vertex,
        attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3],
    };
}

impl From<MeshVertex> for Vertex {
    fn from(v: MeshVertex) -> Self {
        Self {
            pos: v.position,
            normal: v.normal,
        }
    }
}

/// Cartoon-look knobs: the light ramp and the ink outline.
#[derive(Clone, Copy, Debug)]
pub struct ToonSettings {
    /// Lambert intensity at or above this is "lit".
    pub threshold: f32,
    /// Flat diffuse level applied to lit fragments.
    pub lit_level: f32,
    /// Outline width in pixels.
    pub ink_separation: f32,
    pub ink_enabled: bool,
}

impl Default for ToonSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            lit_level: 0.4,
            ink_separation: 2.5,
            ink_enabled: true,
        }
    }
}

/// Everything the renderer needs to know about the scene: the model
/// mesh, the two materials, the light rig and the toon settings.
#[derive(Clone, Debug)]
pub struct SceneSpec {
    pub model: MeshData,
    pub model_material: Material,
    pub ground_material: Material,
    pub lights: LightRig,
    pub toon: ToonSettings,
}

impl SceneSpec {
    /// Scene with the reference palette and default toon settings.
    pub fn new(model: MeshData) -> Self {
        Self {
            model,
            model_material: Material::model_default(),
            ground_material: Material::ground_default(),
            lights: LightRig::default(),
            toon: ToonSettings::default(),
        }
    }
}

/// Per-frame scene UBO (16-byte aligned).
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct SceneUniform {
    view_proj: [[f32; 4]; 4],
    camera_pos: [f32; 4],
    light_dir: [f32; 4],
    ambient_color: [f32; 4],
    spot_color: [f32; 4],
    ramp: [f32; 4],
    viewport: [f32; 4],
}

/// Per-object UBO: model matrix + material.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ObjectUniform {
    model: [[f32; 4]; 4],
    ambient: [f32; 4],
    diffuse: [f32; 4],
    specular: [f32; 4],
}

fn object_uniform(model: Mat4, material: &Material) -> ObjectUniform {
    ObjectUniform {
        model: model.to_cols_array_2d(),
        ambient: material.ambient,
        diffuse: material.diffuse,
        specular: material.specular,
    }
}

const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// GPU-side buffers and bindings for one drawable object.
struct DrawObject {
    vertex_buf: Buffer,
    index_buf: Buffer,
    index_count: u32,
    object_buf: Buffer,
    object_bg: BindGroup,
}

pub struct GpuState {
    // Surface
    surface: Surface<'static>,
    #[allow(dead_code)]
    surface_format: TextureFormat,
    surface_config: SurfaceConfiguration,

    // Device/queue
    device: Device,
    queue: Queue,

    // Pipelines
    toon_pipeline: RenderPipeline,
    ink_pipeline: Option<RenderPipeline>,

    // Scene
    scene_buf: Buffer,
    scene_bg: BindGroup,
    model: DrawObject,
    ground: DrawObject,
    model_material: Material,
    lights: LightRig,
    toon: ToonSettings,

    // Depth
    depth_view: TextureView,

    // Size cache
    width: u32,
    height: u32,
}

impl GpuState {
    /// Create GPU state bound to an Arc<Window> and upload the scene.
    pub async fn new(
        window: Arc<Window>,
        backends: wgpu::Backends,
        spec: SceneSpec,
    ) -> Result<Self> {
        let PhysicalSize { width, height } = window.inner_size();
        let width = width.max(1);
        let height = height.max(1);

        // Instance & surface
        let instance = Instance::new(&InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let surface: Surface<'static> = instance
            .create_surface(window.clone())
            .context("create_surface failed")?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("No suitable GPU adapter")?;
        log::info!("GPU adapter: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&DeviceDescriptor {
                label: Some("Celview Device"),
                required_features: Features::empty(),
                required_limits: Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .context("request_device failed")?;

        // Surface format (prefer sRGB)
        let caps = surface.get_capabilities(&adapter);
        let surface_format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(caps.formats[0]);

        // Configure surface
        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width,
            height,
            present_mode: PresentMode::AutoVsync,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        // Depth texture
        let depth_view = create_depth_view(&device, &surface_config);

        // ==== Bind group layouts ====
        let scene_bgl = uniform_bgl::<SceneUniform>(&device, "Scene BGL");
        let object_bgl = uniform_bgl::<ObjectUniform>(&device, "Object BGL");

        let scene_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Scene UBO"),
            contents: bytemuck::bytes_of(&SceneUniform::zeroed()),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });
        let scene_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene BG"),
            layout: &scene_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: scene_buf.as_entire_binding(),
            }],
        });

        // ==== Pipelines ====
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("Toon PipelineLayout"),
            bind_group_layouts: &[&scene_bgl, &object_bgl],
            push_constant_ranges: &[],
        });
        let toon_pipeline =
            create_toon_pipeline(&device, &pipeline_layout, surface_format);

        // The ink filter is best-effort: a rejected pipeline downgrades
        // the look instead of killing the viewer.
        let ink_pipeline = if spec.toon.ink_enabled {
            match create_ink_pipeline(&device, &pipeline_layout, surface_format).await {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("Cartoon ink filter unavailable, rendering without it: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        // ==== Geometry ====
        let model = upload_object(
            &device,
            "Model",
            &spec.model,
            &object_bgl,
            object_uniform(Mat4::IDENTITY, &spec.model_material),
        );
        let ground = upload_object(
            &device,
            "Ground",
            &ground_plane(500.0, -100.0),
            &object_bgl,
            object_uniform(Mat4::IDENTITY, &spec.ground_material),
        );

        Ok(Self {
            surface,
            surface_format,
            surface_config,
            device,
            queue,
            toon_pipeline,
            ink_pipeline,
            scene_buf,
            scene_bg,
            model,
            ground,
            model_material: spec.model_material,
            lights: spec.lights,
            toon: spec.toon,
            depth_view,
            width,
            height,
        })
    }

    /// Resize: reconfigure surface & recreate depth view.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.surface_config.width = self.width;
        self.surface_config.height = self.height;
        self.surface.configure(&self.device, &self.surface_config);
        self.depth_view = create_depth_view(&self.device, &self.surface_config);
    }

    /// Render one frame with the model spun to `heading_rad` around +Z.
    pub fn render(&mut self, heading_rad: f32) -> Result<(), SurfaceError> {
        let aspect = self.width as f32 / self.height as f32;
        let camera = Camera::viewer_default(aspect);

        let scene = SceneUniform {
            view_proj: camera.proj_view().to_cols_array_2d(),
            camera_pos: camera.eye.extend(1.0).to_array(),
            light_dir: self.lights.spot_direction().extend(0.0).to_array(),
            ambient_color: self.lights.ambient_color,
            spot_color: self.lights.spot_color,
            ramp: [self.toon.threshold, self.toon.lit_level, 0.0, 0.0],
            viewport: [
                self.width as f32,
                self.height as f32,
                self.toon.ink_separation,
                0.0,
            ],
        };
        self.queue
            .write_buffer(&self.scene_buf, 0, bytemuck::bytes_of(&scene));

        let spin = Transform::from_heading(heading_rad).matrix();
        let model_uniform = object_uniform(spin, &self.model_material);
        self.queue
            .write_buffer(&self.model.object_buf, 0, bytemuck::bytes_of(&model_uniform));

        let frame = self.surface.get_current_texture()?;
        let view = frame.texture.create_view(&Default::default());

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("MainEncoder"),
            });

        {
            let mut rpass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("ToonPass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(wgpu::Color {
                            r: 0.05,
                            g: 0.05,
                            b: 0.08,
                            a: 1.0,
                        }),
                        store: StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(Operations {
                        load: LoadOp::Clear(1.0),
                        store: StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            rpass.set_pipeline(&self.toon_pipeline);
            rpass.set_bind_group(0, &self.scene_bg, &[]);
            for object in [&self.ground, &self.model] {
                rpass.set_bind_group(1, &object.object_bg, &[]);
                rpass.set_vertex_buffer(0, object.vertex_buf.slice(..));
                rpass.set_index_buffer(object.index_buf.slice(..), wgpu::IndexFormat::Uint32);
                rpass.draw_indexed(0..object.index_count, 0, 0..1);
            }

            // Ink outline: model only; the ground plane has no silhouette.
            if let Some(ink) = &self.ink_pipeline {
                rpass.set_pipeline(ink);
                rpass.set_bind_group(1, &self.model.object_bg, &[]);
                rpass.set_vertex_buffer(0, self.model.vertex_buf.slice(..));
                rpass.set_index_buffer(self.model.index_buf.slice(..), wgpu::IndexFormat::Uint32);
                rpass.draw_indexed(0..self.model.index_count, 0, 0..1);
            }
        }

        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    pub fn is_surface_lost(err: &SurfaceError) -> bool {
        matches!(err, SurfaceError::Lost | SurfaceError::Outdated)
    }

    pub fn recreate_surface(&mut self) {
        self.resize(self.width, self.height);
    }
}

/// Single-binding uniform BGL visible to both shader stages.
fn uniform_bgl<T>(device: &Device, label: &str) -> BindGroupLayout {
    device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::VERTEX_FRAGMENT,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: Some(
                    NonZeroU64::new(std::mem::size_of::<T>() as u64).expect("non-zero UBO"),
                ),
            },
            count: None,
        }],
    })
}

fn create_toon_pipeline(
    device: &Device,
    layout: &PipelineLayout,
    surface_format: TextureFormat,
) -> RenderPipeline {
    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: Some("Toon WGSL"),
        source: ShaderSource::Wgsl(include_str!("shaders/toon.wgsl").into()),
    });
    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("Toon Pipeline"),
        layout: Some(layout),
        vertex: VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::LAYOUT],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(ColorTargetState {
                format: surface_format,
                blend: Some(BlendState::REPLACE),
                write_mask: ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            cull_mode: Some(wgpu::Face::Back),
            ..Default::default()
        },
        depth_stencil: Some(DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Build the ink pipeline under a validation error scope so rejection
/// comes back as a `Result` instead of a device panic.
async fn create_ink_pipeline(
    device: &Device,
    layout: &PipelineLayout,
    surface_format: TextureFormat,
) -> Result<RenderPipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let shader = device.create_shader_module(ShaderModuleDescriptor {
        label: Some("Ink WGSL"),
        source: ShaderSource::Wgsl(include_str!("shaders/outline.wgsl").into()),
    });
    let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("Ink Pipeline"),
        layout: Some(layout),
        vertex: VertexState {
            module: &shader,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::LAYOUT],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(FragmentState {
            module: &shader,
            entry_point: Some("fs_main"),
            targets: &[Some(ColorTargetState {
                format: surface_format,
                blend: Some(BlendState::REPLACE),
                write_mask: ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        // Front faces culled: only the expanded back shell survives.
        primitive: wgpu::PrimitiveState {
            cull_mode: Some(wgpu::Face::Front),
            ..Default::default()
        },
        depth_stencil: Some(DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    if let Some(err) = device.pop_error_scope().await {
        anyhow::bail!("pipeline validation failed: {err}");
    }
    Ok(pipeline)
}

/// Upload one mesh + its object UBO and bind group.
fn upload_object(
    device: &Device,
    label: &str,
    mesh: &MeshData,
    object_bgl: &BindGroupLayout,
    uniform: ObjectUniform,
) -> DrawObject {
    let vertices: Vec<Vertex> = mesh.vertices.iter().copied().map(Vertex::from).collect();

    let vertex_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("{label} VB")),
        contents: bytemuck::cast_slice(&vertices),
        usage: BufferUsages::VERTEX,
    });
    let index_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("{label} IB")),
        contents: bytemuck::cast_slice(&mesh.indices),
        usage: BufferUsages::INDEX,
    });
    let object_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(&format!("{label} UBO")),
        contents: bytemuck::bytes_of(&uniform),
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
    });
    let object_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(&format!("{label} BG")),
        layout: object_bgl,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: object_buf.as_entire_binding(),
        }],
    });

    DrawObject {
        vertex_buf,
        index_buf,
        index_count: mesh.indices.len() as u32,
        object_buf,
        object_bg,
    }
}

/// Create a depth texture view matching the surface config.
fn create_depth_view(device: &Device, sc: &SurfaceConfiguration) -> TextureView {
    let tex = device.create_texture(&TextureDescriptor {
        label: Some("DepthTex"),
        size: Extent3d {
            width: sc.width.max(1),
            height: sc.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    tex.create_view(&TextureViewDescriptor::default())
}

/// Flat grey stage floor: a quad in the XY plane facing +Z (CCW).
fn ground_plane(half: f32, z: f32) -> MeshData {
    let corners = [
        [-half, -half, z],
        [half, -half, z],
        [half, half, z],
        [-half, half, z],
    ];
    MeshData::new(
        corners
            .map(|p| MeshVertex::new(p, [0.0, 0.0, 1.0]))
            .to_vec(),
        vec![0, 1, 2, 0, 2, 3],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_struct_size() {
        assert_eq!(Vertex::LAYOUT.array_stride, 24);
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
    }

    #[test]
    fn uniforms_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<SceneUniform>() % 16, 0);
        assert_eq!(std::mem::size_of::<ObjectUniform>() % 16, 0);
    }

    #[test]
    fn ground_plane_faces_up() {
        let mut plane = ground_plane(500.0, -100.0);
        plane.recompute_normals();
        assert!(plane.is_valid());
        for v in &plane.vertices {
            assert_eq!(v.normal, [0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn toon_defaults_match_reference_scene() {
        let t = ToonSettings::default();
        assert_eq!(t.threshold, 0.5);
        assert_eq!(t.lit_level, 0.4);
        assert_eq!(t.ink_separation, 2.5);
        assert!(t.ink_enabled);
    }
}
