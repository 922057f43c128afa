//! sort_demo - end-to-end sorting run against a synthetic bench.
//!
//! Builds a random scene of cups, bottles and one spoon, runs the full
//! pipeline (synthetic camera, colour-blob detector, tracker, simulated
//! robot) and prints the final statistics as JSON. Sorted objects are lifted
//! out of the scene so the camera stops seeing them.

use anyhow::{anyhow, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use robosort::config::SortdConfig;
use robosort::detect::backends::ColorBlobBackend;
use robosort::ingest::SyntheticConfig;
use robosort::sorting::{ConfidenceBand, SizeBand};
use robosort::{
    BackendRegistry, SimulatedRobot, SortingPipeline, StrategyKind, SyntheticCamera,
    SyntheticObject, Telemetry,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Maximum number of pipeline cycles.
    #[arg(long, default_value_t = 400)]
    cycles: u64,
    /// Seed for scene layout and camera jitter.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// class_based, size_based or confidence_based.
    #[arg(long, default_value = "class_based")]
    strategy: String,
    /// Fail every N-th robot move.
    #[arg(long)]
    fail_every: Option<u64>,
    /// Number of cups and bottles to place.
    #[arg(long, default_value_t = 6)]
    objects: usize,
}

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const CELL_W: u32 = 64;
const CELL_H: u32 = 60;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut cfg = SortdConfig::default();
    cfg.sorting.strategy = args.strategy.parse::<StrategyKind>()?;
    cfg.sorting.size_bands = vec![
        SizeBand {
            max_area: 500.0,
            zone: "zone_a".to_string(),
        },
        SizeBand {
            max_area: 700.0,
            zone: "zone_b".to_string(),
        },
    ];
    cfg.sorting.confidence_bands = vec![ConfidenceBand {
        min_confidence: 0.95,
        zone: "zone_a".to_string(),
    }];
    cfg.robot.gripper_settle = Duration::ZERO;
    cfg.camera.poll_interval = Duration::from_millis(2);
    cfg.idle_backoff = Duration::from_millis(2);
    cfg.max_runtime = None;
    cfg.validate()?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let objects = build_scene(&mut rng, args.objects)?;
    let camera = SyntheticCamera::new(
        SyntheticConfig {
            url: "stub://demo".to_string(),
            width: WIDTH,
            height: HEIGHT,
            jitter_px: 1,
            seed: args.seed,
            ..SyntheticConfig::default()
        },
        objects,
    );
    let scene = camera.scene();

    let mut robot = SimulatedRobot::new("sim://demo");
    if let Some(n) = args.fail_every {
        robot = robot.fail_every_nth_move(n);
    }

    let mut registry = BackendRegistry::new();
    registry.register(ColorBlobBackend::with_default_palette());

    let telemetry = Telemetry::new("sort_demo");
    let mut pipeline = SortingPipeline::from_config(
        &cfg,
        Box::new(camera),
        robot,
        &registry,
        telemetry.clone(),
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let result = pipeline.start().and_then(|()| {
        let mut remaining = args.objects;
        for _ in 0..args.cycles {
            if remaining == 0 || shutdown.load(Ordering::SeqCst) {
                break;
            }
            let report = pipeline.run_cycle()?;
            if report.frame_absent() {
                std::thread::sleep(cfg.idle_backoff);
                continue;
            }
            if report.sorted() {
                if let Some(target) = &report.target {
                    let (x, y) = target.centroid();
                    if let Some(lifted) = scene.remove_nearest(x, y) {
                        log::info!("lifted {} out of the scene", lifted.class_name);
                    }
                    remaining = remaining.saturating_sub(1);
                }
            }
        }
        Ok(())
    });
    let cleanup = pipeline.shutdown();
    result?;
    cleanup?;

    let frames = pipeline.frame_stats();
    let output = serde_json::json!({
        "statistics": pipeline.statistics(),
        "telemetry": telemetry.snapshot(),
        "frames": {
            "url": frames.url,
            "captured": frames.frames_captured,
            "read_errors": frames.read_errors,
        },
        "robot_pose": pipeline.controller().pose(),
        "left_in_scene": scene.len(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Cups and bottles on distinct grid cells, plus one spoon that is never
/// a sort target.
fn build_scene(rng: &mut StdRng, count: usize) -> Result<Vec<SyntheticObject>> {
    let cols = WIDTH / CELL_W;
    let rows = HEIGHT / CELL_H;
    let mut cells: Vec<(u32, u32)> = (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (c, r)))
        .collect();
    if count + 1 > cells.len() {
        return Err(anyhow!(
            "at most {} objects fit on the bench",
            cells.len() - 1
        ));
    }
    cells.shuffle(rng);

    let mut objects = Vec::with_capacity(count + 1);
    for (i, (col, row)) in cells.into_iter().take(count + 1).enumerate() {
        let class = if i == count {
            "spoon"
        } else if rng.gen_bool(0.5) {
            "cup"
        } else {
            "bottle"
        };
        let side = rng.gen_range(18..=30);
        let x1 = col * CELL_W + rng.gen_range(4..=CELL_W - side - 4);
        let y1 = row * CELL_H + rng.gen_range(4..=CELL_H - side - 4);
        objects.push(SyntheticObject::from_palette(
            class,
            (x1, y1, x1 + side, y1 + side),
        ));
    }
    Ok(objects)
}
