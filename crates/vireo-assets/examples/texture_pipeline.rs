//! Texture loading pipeline example.
//!
//! This example shows:
//! - Defining an asset kind with a destructor
//! - A three-stage task: read file (worker), parse header (worker), upload (GPU thread)
//! - Falling back to a default texture when loading fails
//! - Driving the scheduler from a frame loop and reporting progress
//! - Load event subscriptions
//!
//! Set `VIREO_PROFILE=1` to serve puffin profiling data on port 8585.

use std::io::Write;
use std::time::Duration;

use vireo_assets::prelude::*;
use vireo_core::logging;
use vireo_core::profiling::{self, ProfilingBackend};

/// A texture as seen by the renderer.
#[derive(Debug, Default)]
struct Texture {
    width: u32,
    height: u32,
    /// Stand-in for a GPU resource handle.
    gpu_handle: Option<u64>,
    fallback: Option<AssetHandle>,
}

impl AssetKind for Texture {
    const TYPE: AssetType = AssetType::Tex;

    fn destroy(&mut self, registry: &AssetRegistry) {
        if let Some(handle) = self.gpu_handle.take() {
            tracing::info!("Freeing GPU texture {}", handle);
        }
        registry.safe_swap_ref(&mut self.fallback, None);
    }
}

/// Data carried between the stages of one texture load.
#[derive(Default)]
struct TextureLoad {
    path: String,
    bytes: Vec<u8>,
    width: u32,
    height: u32,
    fallback: Option<AssetHandle>,
}

const MAGIC: &[u8; 4] = b"VTEX";

fn write_texture(dir: &std::path::Path, name: &str, width: u32, height: u32) {
    let mut file = std::fs::File::create(dir.join(name)).unwrap();
    file.write_all(MAGIC).unwrap();
    file.write_all(&width.to_le_bytes()).unwrap();
    file.write_all(&height.to_le_bytes()).unwrap();
    file.write_all(&vec![0xff; (width * height * 4) as usize]).unwrap();
}

fn parse_header(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 12 || &bytes[..4] != MAGIC {
        return None;
    }
    let width = u32::from_le_bytes(bytes[4..8].try_into().ok()?);
    let height = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
    Some((width, height))
}

fn load_texture(
    scheduler: &AssetScheduler,
    path: &str,
    priority: i32,
    fallback: &AssetHandle,
) -> AssetHandle {
    let (lookup, texture) = scheduler.registry().find_or_create::<Texture>(path);
    if lookup.is_found() {
        return texture;
    }

    let load = TextureLoad {
        path: path.to_string(),
        fallback: Some(fallback.clone()),
        ..Default::default()
    };

    let task = AssetTask::builder(&texture, load)
        .priority(priority)
        .action(ThreadAffinity::Worker, |cx, asset, load| match cx.read_file(&load.path) {
            Ok(bytes) => {
                cx.set_complexity(bytes.len() as i32);
                load.bytes = bytes;
                true
            }
            Err(e) => {
                tracing::warn!("{}", e);
                asset.set_state(e.state());
                false
            }
        })
        .action(ThreadAffinity::Worker, |_, asset, load| match parse_header(&load.bytes) {
            Some((width, height)) => {
                load.width = width;
                load.height = height;
                asset.write(|tex: &mut Texture| {
                    tex.width = width;
                    tex.height = height;
                });
                asset.set_state(AssetState::LoadedMeta);
                true
            }
            None => {
                asset.set_state(AssetState::ErrorUnsupported);
                false
            }
        })
        .action(ThreadAffinity::Gpu, |cx, asset, load| {
            // Pretend to create a GPU texture.
            let handle = asset.id().value() ^ (((load.width as u64) << 32) | load.height as u64);
            asset.write(|tex: &mut Texture| tex.gpu_handle = Some(handle));
            asset.set_state(AssetState::Loaded);
            tracing::info!(
                "Uploaded '{}' ({}x{}) at priority {}",
                load.path,
                load.width,
                load.height,
                cx.priority()
            );
            true
        })
        .on_failure(|registry, asset, load| {
            // Point the renderer at the fallback instead.
            asset.write(|tex: &mut Texture| {
                registry.safe_swap_ref(&mut tex.fallback, load.fallback.as_ref());
            });
        })
        .free_data(|_, _, load| {
            tracing::debug!("Finished with '{}' ({} bytes)", load.path, load.bytes.len());
        })
        .build();
    scheduler.enqueue(task);
    texture
}

fn main() {
    logging::init();
    if std::env::var_os("VIREO_PROFILE").is_some() {
        profiling::init_profiling(ProfilingBackend::PuffinHttp);
    }

    let dir = tempfile::tempdir().unwrap();
    write_texture(dir.path(), "grass.vtex", 64, 64);
    write_texture(dir.path(), "stone.vtex", 256, 256);
    write_texture(dir.path(), "ui_cursor.vtex", 16, 16);
    std::fs::write(dir.path().join("corrupt.vtex"), b"not a texture").unwrap();

    let config = SchedulerConfig::default().with_asset_root(dir.path());
    let scheduler = AssetScheduler::new(config).unwrap();
    tracing::info!("Started asset scheduler with {} workers", scheduler.worker_count());

    // A built-in texture that is always available.
    let fallback = scheduler.registry().create::<Texture>();
    fallback.write(|tex: &mut Texture| {
        tex.width = 1;
        tex.height = 1;
    });
    fallback.set_state(AssetState::Loaded);

    let mut textures = Vec::new();
    for (path, priority) in [
        ("ui_cursor.vtex", 0),
        ("stone.vtex", 10),
        ("grass.vtex", 10),
        ("corrupt.vtex", 10),
        ("missing.vtex", 20),
    ] {
        let texture = load_texture(&scheduler, path, priority, &fallback);
        scheduler.on_load(&texture, |asset| {
            tracing::info!("Loaded {}", asset.display_name());
        });
        textures.push(texture);
    }

    // The UI can't draw anything without its cursor.
    scheduler.block_for_priority(0);

    let mut frame = 0;
    while scheduler.current_task() < scheduler.total_tasks() {
        scheduler.step();
        if frame % 10 == 0 {
            tracing::info!(
                "Frame {}: {}/{} tasks done",
                frame,
                scheduler.current_task(),
                scheduler.total_tasks()
            );
        }
        frame += 1;
        std::thread::sleep(Duration::from_millis(16));
    }
    // Deliver the last load events.
    scheduler.step();

    for texture in &textures {
        let summary = texture.read(|tex: &Texture| {
            (
                tex.width,
                tex.height,
                tex.gpu_handle.is_some(),
                tex.fallback.is_some(),
            )
        });
        tracing::info!(
            "{}: state = {:?}, (width, height, uploaded, fallback) = {:?}",
            texture.display_name(),
            texture.state(),
            summary
        );
    }

    for texture in &textures {
        scheduler.registry().release(texture);
    }
    scheduler.registry().release(&fallback);
    scheduler.shutdown();
}
