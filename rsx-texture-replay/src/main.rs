mod config;
mod replay;
mod scene;

use crate::config::ReplayBackend;
use crate::replay::{HeadlessGpu, WgpuGpu};
use crate::scene::Scene;
use clap::Parser;
use env_logger::Env;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct Args {
    /// Scene file to replay
    scene: PathBuf,

    /// Config file path. Defaults are used if the file does not exist
    #[arg(long, short = 'c', default_value = "rsx-texture-replay.toml")]
    config: PathBuf,

    /// Number of frames to run; overrides the config file
    #[arg(long, short = 'n')]
    frames: Option<u32>,

    /// GPU backend; overrides the config file
    #[arg(long, short = 'b', value_enum)]
    backend: Option<ReplayBackend>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        Env::default().default_filter_or("info,naga=warn,wgpu_core=warn,wgpu_hal=warn"),
    )
    .init();

    let args = Args::parse();

    let mut config = config::read_config(&args.config)?;
    if let Some(frames) = args.frames {
        config.frames = frames;
    }
    if let Some(backend) = args.backend {
        config.backend = backend;
    }

    let scene = Scene::read(&args.scene)?;
    log::info!(
        "Replaying '{}' ({} draws) for {} frames with {} frames in flight on {:?}",
        args.scene.display(),
        scene.draws.len(),
        config.frames,
        config.frames_in_flight,
        config.backend
    );

    let stats = match config.backend {
        ReplayBackend::Headless => replay::run_scene(&mut HeadlessGpu::new(), &scene, &config)?,
        ReplayBackend::Wgpu => {
            let mut gpu = WgpuGpu::new(config.wgpu_backend, config.frames_in_flight.max(1))?;
            replay::run_scene(&mut gpu, &scene, &config)?
        }
    };

    log::info!("Upload statistics: {stats:?}");

    Ok(())
}
