#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! TOML tuning schema for the dosing decision engine.
//!
//! Every numeric policy constant (zone thresholds and caps, damping
//! multipliers, blender step limits, kernel shape and bounds, basal
//! thresholds, override thresholds) is deserializable here and validated
//! before it reaches the engine. Defaults match the engine's built-in
//! constants, so an empty file is a valid configuration.

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Zones {
    pub max_smb_low_u: f64,
    pub max_smb_high_u: f64,
    pub soft_landing_band_mgdl: f64,
    pub coast_delta_mgdl: f64,
    pub strict_below_mgdl: f64,
    pub reactor_from_mgdl: f64,
    pub uam_rocket_delta_mgdl: f64,
}

impl Default for Zones {
    fn default() -> Self {
        Self {
            max_smb_low_u: 0.5,
            max_smb_high_u: 1.5,
            soft_landing_band_mgdl: 15.0,
            coast_delta_mgdl: 3.0,
            strict_below_mgdl: 120.0,
            reactor_from_mgdl: 160.0,
            uam_rocket_delta_mgdl: 6.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HighBgOverride {
    pub strong_threshold_mgdl: f64,
    pub min_threshold_mgdl: f64,
    pub delta_min_mgdl: f64,
}

impl Default for HighBgOverride {
    fn default() -> Self {
        Self {
            strong_threshold_mgdl: 180.0,
            min_threshold_mgdl: 140.0,
            delta_min_mgdl: 1.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Damping {
    pub tail_fraction_threshold: f64,
    pub tail_floor: f64,
    pub exercise_multiplier: f64,
    pub late_fat_meal_multiplier: f64,
}

impl Default for Damping {
    fn default() -> Self {
        Self {
            tail_fraction_threshold: 0.6,
            tail_floor: 0.5,
            exercise_multiplier: 0.5,
            late_fat_meal_multiplier: 0.7,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Blender {
    pub max_step_pct_per_loop: f64,
    pub max_step_pct_per_hour: f64,
}

impl Default for Blender {
    fn default() -> Self {
        Self {
            max_step_pct_per_loop: 0.2,
            max_step_pct_per_hour: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IsfFusion {
    pub tdd_clamp_min_factor: f64,
    pub tdd_clamp_max_factor: f64,
    pub blender: Blender,
}

impl Default for IsfFusion {
    fn default() -> Self {
        Self {
            tdd_clamp_min_factor: 0.7,
            tdd_clamp_max_factor: 1.3,
            blender: Blender::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Kernel {
    pub dia_min: f64,
    pub peak_min: f64,
    pub sigma: f64,
}

impl Default for Kernel {
    fn default() -> Self {
        Self {
            dia_min: 360.0,
            peak_min: 75.0,
            sigma: 0.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Estimator {
    pub min_window_min: f64,
    pub iob_floor_u: f64,
    pub residual_tol_mgdl: f64,
    pub step_fraction: f64,
    pub dia_min_bound: f64,
    pub dia_max_bound: f64,
    pub peak_min_bound: f64,
    pub peak_max_bound: f64,
}

impl Default for Estimator {
    fn default() -> Self {
        Self {
            min_window_min: 30.0,
            iob_floor_u: 0.5,
            residual_tol_mgdl: 5.0,
            step_fraction: 0.02,
            dia_min_bound: 180.0,
            dia_max_bound: 540.0,
            peak_min_bound: 35.0,
            peak_max_bound: 120.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Smb {
    pub optimizer_candidates: usize,
    pub horizon_min: f64,
    pub dose_weight: f64,
    pub optimizer_blend_span_mgdl: f64,
    pub ml_min_samples: usize,
    pub interval_min: u32,
    pub breakfast_factor: f64,
    pub lunch_factor: f64,
    pub dinner_factor: f64,
    pub snack_factor: f64,
    pub sleep_factor: f64,
    pub high_carb_factor: f64,
}

impl Default for Smb {
    fn default() -> Self {
        Self {
            optimizer_candidates: 20,
            horizon_min: 30.0,
            dose_weight: 50.0,
            optimizer_blend_span_mgdl: 80.0,
            ml_min_samples: 50,
            interval_min: 3,
            breakfast_factor: 1.3,
            lunch_factor: 1.2,
            dinner_factor: 1.2,
            snack_factor: 1.1,
            sleep_factor: 0.7,
            high_carb_factor: 1.4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MealHighIob {
    pub slack_fraction: f64,
}

impl Default for MealHighIob {
    fn default() -> Self {
        Self {
            slack_fraction: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Basal {
    pub hypo_duration_min: u32,
    pub min_stall_min: f64,
    pub resume_floor_uph: f64,
    pub resume_fraction: f64,
    pub resume_adjust_uph: f64,
    pub high_bg_mgdl: f64,
    pub flat_band_mgdl: f64,
    pub r2_min: f64,
    pub plateau_kicker_factor: f64,
    pub anti_stall_factor: f64,
    pub resolving_delta_mgdl: f64,
    pub temp_duration_min: u32,
}

impl Default for Basal {
    fn default() -> Self {
        Self {
            hypo_duration_min: 30,
            min_stall_min: 10.0,
            resume_floor_uph: 0.2,
            resume_fraction: 0.25,
            resume_adjust_uph: 0.05,
            high_bg_mgdl: 140.0,
            flat_band_mgdl: 1.0,
            r2_min: 0.9,
            plateau_kicker_factor: 1.5,
            anti_stall_factor: 1.2,
            resolving_delta_mgdl: -0.5,
            temp_duration_min: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Adjusters {
    pub min_composed_mult: f64,
    pub max_composed_mult: f64,
}

impl Default for Adjusters {
    fn default() -> Self {
        Self {
            min_composed_mult: 0.25,
            max_composed_mult: 4.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Cycle {
    pub period_min: u32,
}

impl Default for Cycle {
    fn default() -> Self {
        Self { period_min: 5 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub zones: Zones,
    pub high_bg_override: HighBgOverride,
    pub damping: Damping,
    pub isf: IsfFusion,
    pub kernel: Kernel,
    pub estimator: Estimator,
    pub smb: Smb,
    pub meal_high_iob: MealHighIob,
    pub basal: Basal,
    pub adjusters: Adjusters,
    pub cycle: Cycle,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Validate cross-field constraints the serde schema cannot express.
pub fn validate(cfg: &Config) -> eyre::Result<()> {
    if cfg.zones.max_smb_low_u <= 0.0 {
        eyre::bail!("zones.max_smb_low_u must be positive");
    }
    if cfg.zones.max_smb_high_u < cfg.zones.max_smb_low_u {
        eyre::bail!("zones.max_smb_high_u must be >= max_smb_low_u");
    }
    if cfg.zones.strict_below_mgdl >= cfg.zones.reactor_from_mgdl {
        eyre::bail!("zones.strict_below_mgdl must be below reactor_from_mgdl");
    }
    if !(0.0..=1.0).contains(&cfg.damping.tail_fraction_threshold) {
        eyre::bail!("damping.tail_fraction_threshold must be in [0, 1]");
    }
    if !(0.0..=1.0).contains(&cfg.damping.tail_floor) {
        eyre::bail!("damping.tail_floor must be in [0, 1]");
    }
    if cfg.isf.tdd_clamp_min_factor <= 0.0
        || cfg.isf.tdd_clamp_max_factor < cfg.isf.tdd_clamp_min_factor
    {
        eyre::bail!("isf tdd clamp factors must satisfy 0 < min <= max");
    }
    if cfg.isf.blender.max_step_pct_per_loop < 0.0 || cfg.isf.blender.max_step_pct_per_hour < 0.0 {
        eyre::bail!("blender step limits must be non-negative");
    }
    if cfg.kernel.peak_min >= cfg.kernel.dia_min {
        eyre::bail!("kernel.peak_min must be shorter than kernel.dia_min");
    }
    if cfg.estimator.dia_min_bound >= cfg.estimator.dia_max_bound
        || cfg.estimator.peak_min_bound >= cfg.estimator.peak_max_bound
    {
        eyre::bail!("estimator parameter bounds must be ordered");
    }
    if !(0.0..=0.5).contains(&cfg.estimator.step_fraction) {
        eyre::bail!("estimator.step_fraction must be in [0, 0.5]");
    }
    if cfg.smb.optimizer_candidates < 2 {
        eyre::bail!("smb.optimizer_candidates must be at least 2");
    }
    if cfg.smb.horizon_min <= 0.0 {
        eyre::bail!("smb.horizon_min must be positive");
    }
    if cfg.meal_high_iob.slack_fraction < 0.0 || cfg.meal_high_iob.slack_fraction > 1.0 {
        eyre::bail!("meal_high_iob.slack_fraction must be in [0, 1]");
    }
    if cfg.basal.r2_min < 0.0 || cfg.basal.r2_min > 1.0 {
        eyre::bail!("basal.r2_min must be in [0, 1]");
    }
    if cfg.cycle.period_min == 0 {
        eyre::bail!("cycle.period_min must be positive");
    }
    Ok(())
}
