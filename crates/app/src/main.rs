//! Entry point for Celview: cartoon-shaded spinning model viewer.
//! Resolves the mesh through the subdivision cache, then hands the
//! scene to the platform layer. Every flag has a default, so plain
//! `app` runs the reference scene.

use std::path::PathBuf;

use anyhow::{Context, Result};
use asset::{stl, MeshCache};
use platform::{SceneSpec, ViewerConfig};
use wgpu;

fn parse_backend_arg() -> wgpu::Backends {
    // Accept: --gpu-backend=auto|vulkan|dx12|metal|gl
    let mut backends = wgpu::Backends::all(); // default = auto
    for arg in std::env::args() {
        if let Some(val) = arg.strip_prefix("--gpu-backend=") {
            backends = match val.to_ascii_lowercase().as_str() {
                "auto" => wgpu::Backends::all(),
                "vulkan" | "vk" => wgpu::Backends::VULKAN,
                "dx12" | "d3d12" => wgpu::Backends::DX12,
                "metal" | "mtl" => wgpu::Backends::METAL,
                "gl" | "opengl" | "gles" => wgpu::Backends::GL,
                other => {
                    eprintln!("[warn] Unknown backend '{}', falling back to auto.", other);
                    wgpu::Backends::all()
                }
            };
        }
    }
    backends
}

fn parse_size_args() -> (u32, u32) {
    let mut w: Option<u32> = None;
    let mut h: Option<u32> = None;

    for arg in std::env::args() {
        if let Some(v) = arg.strip_prefix("--size=") {
            if let Some((sw, sh)) = v.split_once('x').or_else(|| v.split_once('X')) {
                if let (Ok(pw), Ok(ph)) = (sw.parse::<u32>(), sh.parse::<u32>()) {
                    w = Some(pw);
                    h = Some(ph);
                }
            }
        } else if let Some(v) = arg.strip_prefix("--width=") {
            if let Ok(pw) = v.parse::<u32>() {
                w = Some(pw);
            }
        } else if let Some(v) = arg.strip_prefix("--height=") {
            if let Ok(ph) = v.parse::<u32>() {
                h = Some(ph);
            }
        }
    }

    let ww = w.unwrap_or(1280).max(1);
    let hh = h.unwrap_or(720).max(1);
    (ww, hh)
}

fn parse_model_arg() -> PathBuf {
    for arg in std::env::args() {
        if let Some(val) = arg.strip_prefix("--model=") {
            return PathBuf::from(val);
        }
    }
    PathBuf::from("zortrax_voronoi_sphere.stl")
}

fn parse_subdivide_arg() -> u32 {
    for arg in std::env::args() {
        if let Some(val) = arg.strip_prefix("--subdivide=") {
            match val.parse::<u32>() {
                Ok(n) => return n,
                Err(_) => {
                    eprintln!("[warn] Invalid --subdivide '{}', using 0.", val);
                    return 0;
                }
            }
        }
    }
    0
}

fn parse_cache_root_arg() -> Option<PathBuf> {
    for arg in std::env::args() {
        if let Some(val) = arg.strip_prefix("--cache-root=") {
            return Some(PathBuf::from(val));
        }
    }
    None
}

/// --ink=PX sets the outline width; --no-ink disables the pass.
fn parse_ink_args() -> (f32, bool) {
    let mut separation = 2.5_f32;
    let mut enabled = true;
    for arg in std::env::args() {
        if arg == "--no-ink" {
            enabled = false;
        } else if let Some(val) = arg.strip_prefix("--ink=") {
            match val.parse::<f32>() {
                Ok(px) if px >= 0.0 => separation = px,
                _ => eprintln!("[warn] Invalid --ink '{}', keeping {}.", val, separation),
            }
        }
    }
    (separation, enabled)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let backends = parse_backend_arg();
    let (width, height) = parse_size_args();
    let model_path = parse_model_arg();
    let level = parse_subdivide_arg();
    let (ink_separation, ink_enabled) = parse_ink_args();

    log::info!(
        "Starting Celview. Backend: {:?}, window_size={}x{}, model={}, subdivide={}",
        backends,
        width,
        height,
        model_path.display(),
        level
    );

    // The cache root defaults to the model's directory, so derived
    // artifacts land as siblings of the source.
    let cache = match parse_cache_root_arg() {
        Some(root) => MeshCache::new(root),
        None => MeshCache::sibling_of(&model_path),
    };
    let resolved = cache.resolve(&model_path, level).with_context(|| {
        format!(
            "Resolving {} at subdivision level {}",
            model_path.display(),
            level
        )
    })?;
    let mesh = stl::load_stl_from_path(&resolved)?;

    let mut scene = SceneSpec::new(mesh);
    scene.toon.ink_separation = ink_separation;
    scene.toon.ink_enabled = ink_enabled;

    let mut config = ViewerConfig::new("Celview", scene);
    config.width = width;
    config.height = height;
    config.backends = backends;

    platform::run(config)?;

    log::info!("Graceful shutdown. Bye!");
    Ok(())
}
