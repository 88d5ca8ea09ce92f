//! Solar disk reconstruction from the command line
//!
//! Every input is a frame already reconstructed from a spectroheliograph scan.
//! The limb is detected on each frame, then the pipeline writes the corrected
//! disk and its derived products as 16 bit PNG files.
//!
//! # Usage
//!
//! ```bash
//! # Batch: every file is an independent frame
//! solex scan1.png scan2.png -o out --autocrop radius1-2
//!
//! # Series: frames of one scan at several pixel shifts, reference first
//! solex center.png blue.png red.png --shifts 0,-3,3 --ray h-alpha
//! ```

mod args;
mod loader;
mod writer;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use solex_core::events::LogBroadcaster;
use solex_core::workflow::{worker_pool, BatchProcessor};
use solex_core::{ProcessParams, ProcessingError, ProcessingWorkflow};

use args::Args;
use loader::{load_frame, product_stem};
use writer::{FileEmitter, PngWriter};

fn run_series(
    args: &Args,
    params: ProcessParams,
    shifts: &[f64],
    writer: &Arc<PngWriter>,
) -> Result<usize> {
    let frames = args
        .inputs
        .iter()
        .zip(shifts)
        .map(|(path, &shift)| load_frame(path, shift))
        .collect::<Result<Vec<_>>>()?;
    let emitter = FileEmitter::new(writer.clone(), &args.output, product_stem(&args.inputs[0]))
        .with_shift_in_name();
    let workflow = ProcessingWorkflow::new(params, Arc::new(LogBroadcaster), Arc::new(emitter))?
        .with_frame_rate(args.fps);

    let mut failed = 0;
    for (path, result) in args.inputs.iter().zip(workflow.process_series(frames)) {
        if let Err(e) = result {
            log::error!("{}: {e}", path.display());
            failed += 1;
        }
    }
    Ok(failed)
}

fn run_batch(args: &Args, params: ProcessParams, writer: &Arc<PngWriter>) -> Result<usize> {
    let batch = match args.parallel {
        Some(n) => BatchProcessor::new(n),
        None => BatchProcessor::default(),
    };
    let pool = Arc::new(worker_pool()?);
    let inputs: Vec<PathBuf> = args.inputs.clone();
    let results = batch.run(inputs, |_, path| {
        let frame = load_frame(&path, 0.0)
            .map_err(|e| ProcessingError::MissingInput(format!("{e:#}")))?;
        let emitter = FileEmitter::new(writer.clone(), &args.output, product_stem(&path));
        ProcessingWorkflow::in_pool(params, Arc::new(LogBroadcaster), Arc::new(emitter), pool.clone())?
            .with_frame_rate(args.fps)
            .process_frame(frame, None)
    });

    let mut failed = 0;
    for (path, result) in args.inputs.iter().zip(results) {
        match result {
            Ok(frame) => log::info!(
                "{}: disk radius {:.1} px, tilt {:.2}°",
                path.display(),
                frame.geometry.ellipse.semi_axes().0,
                frame.geometry.tilt.to_degrees()
            ),
            Err(e) => {
                log::error!("{}: {e}", path.display());
                failed += 1;
            }
        }
    }
    Ok(failed)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let params = args.process_params()?;

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let writer = Arc::new(PngWriter::new(args.writers, 4 * num_cpus::get()));

    let failed = match args.series_shifts()? {
        Some(shifts) => run_series(&args, params, shifts, &writer)?,
        None => run_batch(&args, params, &writer)?,
    };

    let writer = Arc::try_unwrap(writer)
        .map_err(|_| anyhow::anyhow!("PNG writer still in use"))?;
    let write_failures = writer.wait_for_completion();

    anyhow::ensure!(
        failed == 0 && write_failures == 0,
        "{failed} frame(s) failed, {write_failures} file(s) not written"
    );
    Ok(())
}
