use argh::FromArgs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use voltrack::arap::affinity::AffinityConfig;
use voltrack::arap::forward::{ForwardTracker, TrackerParams};
use voltrack::arap::global::{GlobalOptimizer, OptimizerParams};
use voltrack::arap::observer::TrackingObserver;
use voltrack::arap::stats::deviation_from_uniformity;
use voltrack::arap::TrackingError;
use voltrack::v3d::io::points::{read_points_xyz, write_points_xyz};
use voltrack::v3d::io::transforms::write_transforms;
use voltrack::v3d::io::volume::read_volume;
use voltrack::v3d::volume::{OccupancyVolume, SamplingParams};

#[derive(FromArgs)]
/// Track a point cloud through a sequence of occupancy volumes
struct Args {
    /// path to the JSON configuration
    #[argh(option, short = 'c')]
    config: PathBuf,

    /// skip the global optimization even when configured
    #[argh(switch)]
    no_optimize: bool,
}

#[derive(Deserialize)]
struct DemoConfig {
    /// volume files, one per frame
    volumes: Vec<PathBuf>,
    /// XYZ file with the points of frame 0, sampled from the first volume when absent
    #[serde(default)]
    initial_points: Option<PathBuf>,
    #[serde(default)]
    sampling: SamplingParams,
    #[serde(default)]
    tracker: TrackerParams,
    #[serde(default)]
    affinity: AffinityConfig,
    #[serde(default)]
    optimizer: Option<OptimizerParams>,
    output_dir: PathBuf,
}

/// Logs the duration of every stage.
struct StageLogger;

impl TrackingObserver for StageLogger {
    fn on_stage(&self, name: &str, elapsed: Duration) {
        log::debug!("{name} took {elapsed:?}");
    }

    fn on_sequence_energy(&self, iteration: usize, energy: f64) {
        log::info!("sequence energy after iteration {iteration}: {energy:.6e}");
    }
}

fn load_volume(path: &Path) -> Result<OccupancyVolume, TrackingError> {
    log::debug!("loading volume {}", path.display());
    Ok(read_volume(path)?)
}

fn write_frames(
    dir: &Path,
    prefix: &str,
    frames: &[Vec<voltrack::v3d::DVec3>],
) -> Result<(), TrackingError> {
    for (i, frame) in frames.iter().enumerate() {
        write_points_xyz(dir.join(format!("{prefix}_{i:04}.xyz")), frame)?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let config: DemoConfig = serde_json::from_str(&std::fs::read_to_string(&args.config)?)?;
    if config.volumes.is_empty() {
        return Err("the configuration lists no volumes".into());
    }
    std::fs::create_dir_all(&config.output_dir)?;

    let initial = match &config.initial_points {
        Some(path) => read_points_xyz(path)?,
        None => load_volume(&config.volumes[0])?.initial_sample(&config.sampling)?,
    };
    log::info!(
        "tracking {} points through {} frames",
        initial.len(),
        config.volumes.len()
    );

    let mut affinity = config.affinity.build(std::slice::from_ref(&initial))?;
    let tracker = ForwardTracker::new(config.tracker.clone());
    let sequence = tracker.track_sequence(
        initial,
        config.volumes.len(),
        affinity.as_mut(),
        |i| load_volume(&config.volumes[i]),
        &StageLogger,
    )?;

    write_frames(&config.output_dir, "frame", &sequence.frames)?;
    for (i, transforms) in sequence.transforms.iter().enumerate() {
        let path = config.output_dir.join(format!("transforms_{:04}.txt", i + 1));
        write_transforms(path, transforms)?;
    }
    affinity
        .weights()
        .write(config.output_dir.join("weights.bin"))?;

    let Some(params) = config.optimizer.clone().filter(|_| !args.no_optimize) else {
        return Ok(());
    };

    let volumes = config
        .volumes
        .iter()
        .map(|p| load_volume(p))
        .collect::<Result<Vec<_>, _>>()?;
    let mut frames = sequence.frames;
    let before = deviation_from_uniformity(&frames, &volumes)?;

    let optimizer = GlobalOptimizer::new(params);
    let reports = optimizer.improve(&mut frames, &volumes, affinity.as_mut(), &StageLogger)?;
    let after = deviation_from_uniformity(&frames, &volumes)?;
    log::info!(
        "deviation from uniformity {:.6} -> {:.6} over {} rounds, {} points left",
        before.mean,
        after.mean,
        reports.len(),
        frames.first().map_or(0, Vec::len)
    );

    write_frames(&config.output_dir, "optimized", &frames)?;

    Ok(())
}
