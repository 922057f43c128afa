//! sortd - perception-to-action sorting daemon
//!
//! This daemon:
//! 1. Loads configuration (`SORTD_CONFIG` file plus `SORTD_*` overrides)
//! 2. Opens the camera and the robot link; failures here are fatal
//! 3. Runs the detect/track/sort loop until Ctrl-C or the runtime ceiling
//! 4. Always stops the robot, releases the camera and disconnects
//! 5. Logs the final sorting statistics as JSON

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use robosort::config::SortdConfig;
use robosort::detect::backends::ColorBlobBackend;
use robosort::{open_camera, open_robot, BackendRegistry, SortingPipeline, Telemetry};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = SortdConfig::load()?;
    log::info!(
        "sortd {} starting: camera {}, robot {}, strategy {}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera.url,
        cfg.robot.url,
        cfg.sorting.strategy
    );

    let telemetry = Telemetry::new("sortd");
    let camera = open_camera(&cfg.camera.url, cfg.camera.width, cfg.camera.height)?;
    let robot = open_robot(&cfg.robot.url)?;

    let mut registry = BackendRegistry::new();
    registry.register(ColorBlobBackend::with_default_palette());

    let mut pipeline =
        SortingPipeline::from_config(&cfg, camera, robot, &registry, telemetry.clone())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let result = pipeline.start().and_then(|()| pipeline.run(&shutdown));
    if let Err(err) = &result {
        log::error!("sorting loop stopped: {:#}", err);
    }
    let cleanup = pipeline.shutdown();

    log::info!(
        "final statistics: {}",
        serde_json::to_string(&pipeline.statistics())?
    );
    log::info!(
        "telemetry: {}",
        serde_json::to_string(&telemetry.snapshot())?
    );

    let summary = result?;
    log::info!("run summary: {}", serde_json::to_string(&summary)?);
    cleanup
}
