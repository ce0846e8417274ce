//! Tunables for the engine and host shell, loadable from TOML.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PetError;
use crate::sched::Millis;

/// Env var naming an explicit config file.
const CONFIG_ENV: &str = "PETPAL_CONFIG";
/// Looked up in the working directory when the env var is unset.
const DEFAULT_CONFIG_FILE: &str = "petpal.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PetConfig {
    pub energy: EnergyConfig,
    pub behavior: BehaviorConfig,
    pub drag: DragConfig,
    pub motion: MotionConfig,
    pub telemetry: TelemetryConfig,
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Minutes for a full tank to drain while idle.
    pub idle_minutes: f64,
    pub excited_minutes: f64,
    pub chatting_minutes: f64,
    pub decay_tick_ms: Millis,
    pub recovery_tick_ms: Millis,
    /// Percent restored per recovery tick while sleeping.
    pub recovery_step: f64,
    /// Percent restored per accepted interaction.
    pub interaction_recovery: f64,
    pub interaction_cooldown_ms: Millis,
    /// Minimum energy to leave Sleeping.
    pub wake_threshold: f64,
    pub move_cost_min: f64,
    pub move_cost_max: f64,
    /// Glides are refused below this level.
    pub min_move_energy: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            idle_minutes: 60.0,
            excited_minutes: 40.0,
            chatting_minutes: 120.0,
            decay_tick_ms: 1_000,
            recovery_tick_ms: 10_000,
            recovery_step: 1.0,
            interaction_recovery: 1.0,
            interaction_cooldown_ms: 2_000,
            wake_threshold: 20.0,
            move_cost_min: 2.0,
            move_cost_max: 5.0,
            min_move_energy: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Interaction silence while Excited before the pet wanders to the cursor.
    pub proximity_idle_ms: Millis,
    pub proximity_check_ms: Millis,
    pub cursor_poll_ms: Millis,
    pub double_click_ms: Millis,
    /// Naps are refused above this energy.
    pub nap_max_energy: f64,
    pub mood_per_click: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            proximity_idle_ms: 5_000,
            proximity_check_ms: 1_000,
            cursor_poll_ms: 500,
            double_click_ms: 300,
            nap_max_energy: 50.0,
            mood_per_click: 10.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DragConfig {
    /// Delay after release before the state animation resumes.
    pub settle_ms: Millis,
    /// Press/release travel below this is a click, not a drag.
    pub click_slop_px: f32,
}

impl Default for DragConfig {
    fn default() -> Self {
        Self {
            settle_ms: 200,
            click_slop_px: 3.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub steps: u32,
    pub min_duration_ms: Millis,
    pub max_duration_ms: Millis,
    pub ms_per_px: f64,
    /// Distance at which a glide costs the base amount.
    pub cost_base_distance: f32,
    pub offset_min: f32,
    pub offset_max: f32,
    pub safe_margin: f32,
    /// Footprint used to keep glide targets on screen.
    pub pet_extent: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            steps: 30,
            min_duration_ms: 800,
            max_duration_ms: 2_000,
            ms_per_px: 1.5,
            cost_base_distance: 200.0,
            offset_min: 20.0,
            offset_max: 100.0,
            safe_margin: 10.0,
            pet_extent: 120.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Batch endpoint. `None` or empty keeps events in the log only.
    pub endpoint: Option<String>,
    pub health_url: Option<String>,
    /// Queue length that forces a flush.
    pub max_queue: usize,
    /// Hard cap on retained events while the collector is unreachable.
    pub max_backlog: usize,
    pub flush_interval_ms: Millis,
    pub heartbeat_ms: Millis,
    pub request_timeout_ms: Millis,
    pub probe_timeout_ms: Millis,
    pub shutdown_wait_ms: Millis,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: Some("http://localhost:3000/api/behaviors/batch".to_string()),
            health_url: None,
            max_queue: 5,
            max_backlog: 1_000,
            flush_interval_ms: 10_000,
            heartbeat_ms: 5 * 60 * 1_000,
            request_timeout_ms: 5_000,
            probe_timeout_ms: 1_500,
            shutdown_wait_ms: 2_000,
        }
    }
}

impl TelemetryConfig {
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref().filter(|e| !e.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub x: i32,
    pub y: i32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 250,
            height: 250,
            x: 100,
            y: 100,
        }
    }
}

impl PetConfig {
    /// `$PETPAL_CONFIG` if set, else `./petpal.toml` if present, else defaults.
    pub fn load() -> Result<Self, PetError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self, PetError> {
        let raw = std::fs::read_to_string(path).map_err(|source| PetError::ConfigRead {
            path: PathBuf::from(path),
            source,
        })?;
        let cfg = Self::from_toml(&raw).map_err(|source| PetError::ConfigParse {
            path: PathBuf::from(path),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw).map(Self::normalized)
    }

    /// Puts min/max pairs in order so range clamps downstream hold.
    fn normalized(mut self) -> Self {
        let m = &mut self.motion;
        order("motion duration", &mut m.min_duration_ms, &mut m.max_duration_ms);
        order("motion offset", &mut m.offset_min, &mut m.offset_max);

        let e = &mut self.energy;
        if !(e.move_cost_min.is_finite() && e.move_cost_max.is_finite()) {
            log::warn!("Move cost range is not finite, using defaults");
            let d = EnergyConfig::default();
            e.move_cost_min = d.move_cost_min;
            e.move_cost_max = d.move_cost_max;
        }
        order("move cost", &mut e.move_cost_min, &mut e.move_cost_max);
        self
    }
}

fn order<T: PartialOrd + fmt::Debug>(what: &str, min: &mut T, max: &mut T) {
    if *min > *max {
        log::warn!("{what} range {min:?}..{max:?} is inverted, swapping");
        std::mem::swap(min, max);
    }
}
