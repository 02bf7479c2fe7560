//! Headless trajview runner: renders a trajectory offscreen on the wgpu
//! backend and logs frame statistics.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use trajview::engine::RenderEngine;
use trajview::error::TrajviewError;
use trajview::gpu::render_context::RenderContext;
use trajview::gpu::wgpu_device::WgpuDevice;
use trajview::options::RenderOptions;
use trajview::scene::{Scene, Trajectory};
use trajview::util::xyz;

#[derive(Debug, Parser)]
#[command(name = "trajview", version, about = "Render a periodic trajectory offscreen")]
struct Args {
    /// Extended-XYZ trajectory. A jittered carbon lattice is generated when
    /// omitted.
    trajectory: Option<PathBuf>,

    /// TOML options file.
    #[arg(long)]
    options: Option<PathBuf>,

    /// Number of frames to render.
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Atoms per lattice edge for the generated trajectory.
    #[arg(long, default_value_t = 12)]
    lattice: u32,

    /// Compute bonds before rendering.
    #[arg(long)]
    bonds: bool,

    /// Write the effective options to this file and exit.
    #[arg(long)]
    dump_options: Option<PathBuf>,
}

fn run(args: &Args) -> Result<(), TrajviewError> {
    let options = match &args.options {
        Some(path) => RenderOptions::load(path)?,
        None => RenderOptions::default(),
    };
    if let Some(path) = &args.dump_options {
        options.save(path)?;
        log::info!("wrote options to {}", path.display());
        return Ok(());
    }

    let mut trajectory = match &args.trajectory {
        Some(path) => Trajectory::from_xyz(xyz::load(path)?)?,
        None => Trajectory::synthetic_lattice(6, [args.lattice; 3], 1.54, 60, 0.05, 42),
    };
    if args.bonds {
        trajectory.create_bonds(options.geometry.bond_tolerance);
    }
    if let Some(atom) = trajectory.pick_freeze_atom() {
        log::debug!("holding atom {atom} still");
    }

    let context = pollster::block_on(RenderContext::new_headless())?;
    let mut engine = RenderEngine::new(WgpuDevice::new(context)?, options)?;
    engine.load_scene(Scene::new(trajectory))?;

    for _ in 0..args.frames {
        let _ = engine.advance_movie();
        let stats = engine.render_frame()?;
        log::debug!(
            "frame {} slot {} trajectory frame {}: {} objects",
            stats.frame,
            stats.slot,
            stats.trajectory_frame,
            stats.objects
        );
    }
    log::info!(
        "rendered {} frames, {:.1} fps",
        engine.frames_rendered(),
        engine.fps()
    );
    let _ = engine.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(TrajviewError::Frame(e)) => {
            log::error!("unrecoverable device fault: {e}");
            std::process::abort()
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
