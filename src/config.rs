use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use crate::frame::FrameSourceConfig;
use crate::pipeline::PipelineConfig;
use crate::sorting::{
    CapacityPolicy, ConfidenceBand, ControllerConfig, Projection, SizeBand, SortingStrategy,
    StrategyKind, ZoneManager,
};
use crate::tracker::TrackerConfig;
use crate::Position;

/// Fewer distinct target classes than this makes sorting pointless.
pub const MIN_OBJECT_CLASSES: usize = 2;

const DEFAULT_CAMERA_URL: &str = "stub://workbench";
const DEFAULT_CAMERA_WIDTH: u32 = 320;
const DEFAULT_CAMERA_HEIGHT: u32 = 240;
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_MAX_FRAME_AGE_MS: u64 = 1_000;
const DEFAULT_ROBOT_URL: &str = "sim://";
const DEFAULT_SPEED: f32 = 0.5;
const DEFAULT_GRIPPER_SETTLE_MS: u64 = 500;
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_DETECTION_INTERVAL: u32 = 1;
const DEFAULT_MAX_DISAPPEARED: u32 = 10;
const DEFAULT_TARGET_CLASSES: [&str; 2] = ["bottle", "cup"];
const DEFAULT_ZONE: &str = "zone_default";
const DEFAULT_MAX_RUNTIME_SECS: u64 = 300;
const DEFAULT_IDLE_BACKOFF_MS: u64 = 100;

#[derive(Debug, Deserialize, Default)]
struct SortdConfigFile {
    camera: Option<CameraConfigFile>,
    robot: Option<RobotConfigFile>,
    detection: Option<DetectionConfigFile>,
    tracking: Option<TrackingConfigFile>,
    sorting: Option<SortingConfigFile>,
    zones: Option<Vec<ZoneConfigFile>>,
    runtime: Option<RuntimeConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    poll_interval_ms: Option<u64>,
    max_frame_age_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RobotConfigFile {
    url: Option<String>,
    movement_speed: Option<f32>,
    rotation_speed: Option<f32>,
    gripper_settle_ms: Option<u64>,
    metres_per_pixel: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<String>,
    confidence: Option<f32>,
    iou_threshold: Option<f32>,
    interval: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    max_disappeared: Option<u32>,
    max_match_distance: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SortingConfigFile {
    target_classes: Option<Vec<String>>,
    strategy: Option<StrategyKind>,
    default_zone: Option<String>,
    class_zones: Option<BTreeMap<String, String>>,
    size_bands: Option<Vec<SizeBand>>,
    confidence_bands: Option<Vec<ConfidenceBand>>,
    capacity_policy: Option<CapacityPolicy>,
}

#[derive(Debug, Deserialize)]
struct ZoneConfigFile {
    name: String,
    x: f32,
    y: f32,
    capacity: u32,
}

#[derive(Debug, Deserialize, Default)]
struct RuntimeConfigFile {
    max_runtime_secs: Option<u64>,
    idle_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SortdConfig {
    pub camera: CameraSettings,
    pub robot: RobotSettings,
    pub detection: DetectionSettings,
    pub tracking: TrackerConfig,
    pub sorting: SortingSettings,
    pub zones: Vec<ZoneSettings>,
    /// `None` runs until interrupted.
    pub max_runtime: Option<Duration>,
    pub idle_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub poll_interval: Duration,
    pub max_frame_age: Duration,
}

#[derive(Debug, Clone)]
pub struct RobotSettings {
    pub url: String,
    pub movement_speed: f32,
    /// Reserved for links that turn in place. Validated but not sent, since
    /// sort moves are pure translations issued with `rotation = 0`.
    pub rotation_speed: f32,
    pub gripper_settle: Duration,
    pub metres_per_pixel: f32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Registered backend name; `None` uses the registry default.
    pub backend: Option<String>,
    pub confidence: f32,
    pub iou_threshold: f32,
    /// Run detection on every N-th fresh frame.
    pub interval: u32,
}

#[derive(Debug, Clone)]
pub struct SortingSettings {
    pub target_classes: Vec<String>,
    pub strategy: StrategyKind,
    pub default_zone: String,
    pub class_zones: BTreeMap<String, String>,
    pub size_bands: Vec<SizeBand>,
    pub confidence_bands: Vec<ConfidenceBand>,
    pub capacity_policy: CapacityPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneSettings {
    pub name: String,
    pub position: Position,
    pub capacity: u32,
}

impl Default for SortdConfig {
    fn default() -> Self {
        Self::from_file(SortdConfigFile::default())
    }
}

impl SortdConfig {
    /// Defaults, then the file named by `SORTD_CONFIG`, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SORTD_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SortdConfigFile) -> Self {
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            url: camera_file
                .url
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            poll_interval: Duration::from_millis(
                camera_file
                    .poll_interval_ms
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            max_frame_age: Duration::from_millis(
                camera_file
                    .max_frame_age_ms
                    .unwrap_or(DEFAULT_MAX_FRAME_AGE_MS),
            ),
        };

        let robot_file = file.robot.unwrap_or_default();
        let robot = RobotSettings {
            url: robot_file
                .url
                .unwrap_or_else(|| DEFAULT_ROBOT_URL.to_string()),
            movement_speed: robot_file.movement_speed.unwrap_or(DEFAULT_SPEED),
            rotation_speed: robot_file.rotation_speed.unwrap_or(DEFAULT_SPEED),
            gripper_settle: Duration::from_millis(
                robot_file
                    .gripper_settle_ms
                    .unwrap_or(DEFAULT_GRIPPER_SETTLE_MS),
            ),
            metres_per_pixel: robot_file
                .metres_per_pixel
                .unwrap_or(Projection::default().metres_per_pixel),
        };

        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            backend: detection_file.backend,
            confidence: detection_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            iou_threshold: detection_file.iou_threshold.unwrap_or(DEFAULT_IOU),
            interval: detection_file
                .interval
                .unwrap_or(DEFAULT_DETECTION_INTERVAL),
        };

        let tracking_file = file.tracking.unwrap_or_default();
        let tracking = TrackerConfig {
            max_disappeared: tracking_file
                .max_disappeared
                .unwrap_or(DEFAULT_MAX_DISAPPEARED),
            max_match_distance: tracking_file.max_match_distance,
        };

        let sorting_file = file.sorting.unwrap_or_default();
        let sorting = SortingSettings {
            target_classes: sorting_file.target_classes.unwrap_or_else(|| {
                DEFAULT_TARGET_CLASSES
                    .iter()
                    .map(|c| c.to_string())
                    .collect()
            }),
            strategy: sorting_file.strategy.unwrap_or(StrategyKind::ClassBased),
            default_zone: sorting_file
                .default_zone
                .unwrap_or_else(|| DEFAULT_ZONE.to_string()),
            class_zones: sorting_file.class_zones.unwrap_or_else(default_class_zones),
            size_bands: sorting_file.size_bands.unwrap_or_default(),
            confidence_bands: sorting_file.confidence_bands.unwrap_or_default(),
            capacity_policy: sorting_file.capacity_policy.unwrap_or_default(),
        };

        let zones = match file.zones {
            Some(zones) => zones
                .into_iter()
                .map(|z| ZoneSettings {
                    name: z.name,
                    position: Position::new(z.x, z.y),
                    capacity: z.capacity,
                })
                .collect(),
            None => default_zones(),
        };

        let runtime_file = file.runtime.unwrap_or_default();
        let max_runtime = match runtime_file
            .max_runtime_secs
            .unwrap_or(DEFAULT_MAX_RUNTIME_SECS)
        {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let idle_backoff = Duration::from_millis(
            runtime_file
                .idle_backoff_ms
                .unwrap_or(DEFAULT_IDLE_BACKOFF_MS),
        );

        Self {
            camera,
            robot,
            detection,
            tracking,
            sorting,
            zones,
            max_runtime,
            idle_backoff,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SORTD_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(url) = std::env::var("SORTD_ROBOT_URL") {
            if !url.trim().is_empty() {
                self.robot.url = url;
            }
        }
        if let Ok(classes) = std::env::var("SORTD_TARGET_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.sorting.target_classes = parsed;
            }
        }
        if let Ok(strategy) = std::env::var("SORTD_STRATEGY") {
            if !strategy.trim().is_empty() {
                self.sorting.strategy = strategy.parse()?;
            }
        }
        if let Ok(value) = std::env::var("SORTD_MAX_DISAPPEARED") {
            if !value.trim().is_empty() {
                self.tracking.max_disappeared = value.trim().parse().map_err(|_| {
                    anyhow!("SORTD_MAX_DISAPPEARED must be a non-negative integer")
                })?;
            }
        }
        if let Ok(value) = std::env::var("SORTD_CONFIDENCE") {
            if !value.trim().is_empty() {
                self.detection.confidence = value
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("SORTD_CONFIDENCE must be a number"))?;
            }
        }
        if let Ok(value) = std::env::var("SORTD_MAX_RUNTIME_SECS") {
            if !value.trim().is_empty() {
                let seconds: u64 = value.trim().parse().map_err(|_| {
                    anyhow!("SORTD_MAX_RUNTIME_SECS must be an integer number of seconds")
                })?;
                self.max_runtime = (seconds > 0).then(|| Duration::from_secs(seconds));
            }
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        check_unit("robot.movement_speed", self.robot.movement_speed)?;
        check_unit("robot.rotation_speed", self.robot.rotation_speed)?;
        check_unit("detection.confidence", self.detection.confidence)?;
        check_unit("detection.iou_threshold", self.detection.iou_threshold)?;

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.detection.interval == 0 {
            return Err(anyhow!("detection.interval must be at least 1"));
        }
        if let Some(distance) = self.tracking.max_match_distance {
            if !distance.is_finite() || distance <= 0.0 {
                return Err(anyhow!("tracking.max_match_distance must be positive"));
            }
        }

        let mut seen = BTreeSet::new();
        self.sorting.target_classes = self
            .sorting
            .target_classes
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();
        if self.sorting.target_classes.len() < MIN_OBJECT_CLASSES {
            return Err(anyhow!(
                "at least {} distinct target classes are required, got {}",
                MIN_OBJECT_CLASSES,
                self.sorting.target_classes.len()
            ));
        }

        let zones = self.zone_manager()?;
        self.strategy().validate(&zones)?;
        Ok(())
    }

    /// Fresh zone manager with every configured zone at zero occupancy.
    pub fn zone_manager(&self) -> Result<ZoneManager> {
        if self.zones.is_empty() {
            return Err(anyhow!("at least one zone must be configured"));
        }
        let mut manager = ZoneManager::new();
        for zone in &self.zones {
            manager
                .create_zone(&zone.name, zone.position, zone.capacity)
                .map_err(|e| anyhow!("invalid zone configuration: {}", e))?;
        }
        Ok(manager)
    }

    pub fn strategy(&self) -> SortingStrategy {
        let sorting = &self.sorting;
        match sorting.strategy {
            StrategyKind::ClassBased => {
                SortingStrategy::class_based(sorting.class_zones.clone(), &sorting.default_zone)
            }
            StrategyKind::SizeBased => {
                SortingStrategy::size_based(sorting.size_bands.clone(), &sorting.default_zone)
            }
            StrategyKind::ConfidenceBased => SortingStrategy::confidence_based(
                sorting.confidence_bands.clone(),
                &sorting.default_zone,
            ),
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            movement_speed: self.robot.movement_speed,
            gripper_settle: self.robot.gripper_settle,
            capacity_policy: self.sorting.capacity_policy,
            projection: Projection {
                origin_px: (
                    self.camera.width as f32 * 0.5,
                    self.camera.height as f32,
                ),
                metres_per_pixel: self.robot.metres_per_pixel,
            },
        }
    }

    pub fn frame_source_config(&self) -> FrameSourceConfig {
        FrameSourceConfig {
            poll_interval: self.camera.poll_interval,
            max_frame_age: self.camera.max_frame_age,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            target_classes: self.sorting.target_classes.clone(),
            detection_interval: self.detection.interval,
            idle_backoff: self.idle_backoff,
            max_runtime: self.max_runtime,
        }
    }
}

fn default_class_zones() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("bottle".to_string(), "zone_b".to_string()),
        ("cup".to_string(), "zone_a".to_string()),
    ])
}

fn default_zones() -> Vec<ZoneSettings> {
    vec![
        ZoneSettings {
            name: "zone_a".to_string(),
            position: Position::new(1.0, 0.5),
            capacity: 10,
        },
        ZoneSettings {
            name: "zone_b".to_string(),
            position: Position::new(1.0, 1.5),
            capacity: 10,
        },
        ZoneSettings {
            name: DEFAULT_ZONE.to_string(),
            position: Position::new(0.5, 1.5),
            capacity: 20,
        },
    ]
}

fn check_unit(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> Result<SortdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
