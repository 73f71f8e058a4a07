//! Runtime configuration for the decision engine.
//!
//! Every numeric constant of the dosing policy lives here so that it can be
//! reviewed and tuned in one place. Defaults carry the policy constants
//! through unchanged; none of them is a clinical claim.

/// Safety-zone caps and thresholds (mg/dL, units).
#[derive(Debug, Clone)]
pub struct ZoneCfg {
    /// Low-aggression SMB ceiling in units.
    pub max_smb_low_u: f64,
    /// High-aggression SMB ceiling in units.
    pub max_smb_high_u: f64,
    /// Soft Landing band width above target.
    pub soft_landing_band_mgdl: f64,
    /// BG is "coasting" when delta5 is below this.
    pub coast_delta_mgdl: f64,
    /// Strict Guard applies below this BG.
    pub strict_below_mgdl: f64,
    /// Reactor applies at or above this BG; Buffer spans [strict, reactor).
    pub reactor_from_mgdl: f64,
    /// Fast-rise ("UAM rocket") delta threshold that lifts Strict Guard.
    pub uam_rocket_delta_mgdl: f64,
}

impl Default for ZoneCfg {
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

/// High-BG override thresholds.
#[derive(Debug, Clone)]
pub struct HighBgOverrideCfg {
    /// BG at or above this always qualifies.
    pub strong_threshold_mgdl: f64,
    /// BG at or above this qualifies when also rising by `delta_min_mgdl`.
    pub min_threshold_mgdl: f64,
    pub delta_min_mgdl: f64,
}

impl Default for HighBgOverrideCfg {
    fn default() -> Self {
        Self {
            strong_threshold_mgdl: 180.0,
            min_threshold_mgdl: 140.0,
            delta_min_mgdl: 1.5,
        }
    }
}

/// SMB damping multipliers and thresholds.
#[derive(Debug, Clone)]
pub struct DampingCfg {
    /// Tail damping activates when the tail fraction exceeds this.
    pub tail_fraction_threshold: f64,
    /// Strongest tail attenuation (multiplier floor at full tail, no relief).
    pub tail_floor: f64,
    pub exercise_multiplier: f64,
    pub late_fat_meal_multiplier: f64,
}

impl Default for DampingCfg {
    fn default() -> Self {
        Self {
            tail_fraction_threshold: 0.6,
            tail_floor: 0.5,
            exercise_multiplier: 0.5,
            late_fat_meal_multiplier: 0.7,
        }
    }
}

/// Rate limits for the stateful blender (relative change per call).
#[derive(Debug, Clone, Copy)]
pub struct BlenderCfg {
    pub max_step_pct_per_loop: f64,
    pub max_step_pct_per_hour: f64,
}

impl Default for BlenderCfg {
    fn default() -> Self {
        Self {
            max_step_pct_per_loop: 0.2,
            max_step_pct_per_hour: 0.3,
        }
    }
}

/// ISF fusion band around the TDD-derived ISF.
#[derive(Debug, Clone)]
pub struct IsfFusionCfg {
    pub tdd_clamp_min_factor: f64,
    pub tdd_clamp_max_factor: f64,
    pub blender: BlenderCfg,
}

impl Default for IsfFusionCfg {
    fn default() -> Self {
        Self {
            tdd_clamp_min_factor: 0.7,
            tdd_clamp_max_factor: 1.3,
            blender: BlenderCfg::default(),
        }
    }
}

/// Log-normal activity kernel shape.
#[derive(Debug, Clone)]
pub struct KernelCfg {
    /// Duration of insulin action in minutes.
    pub dia_min: f64,
    /// Time of peak activity in minutes.
    pub peak_min: f64,
    /// Log-normal shape parameter.
    pub sigma: f64,
}

impl Default for KernelCfg {
    fn default() -> Self {
        Self {
            dia_min: 360.0,
            peak_min: 75.0,
            sigma: 0.5,
        }
    }
}

/// Learning gates and step sizes for the PK/PD estimator.
#[derive(Debug, Clone)]
pub struct EstimatorCfg {
    /// Minimum observation window before an update is considered (minutes).
    pub min_window_min: f64,
    /// Minimum active IOB for an update (units).
    pub iob_floor_u: f64,
    /// Residuals within this band produce no update (mg/dL).
    pub residual_tol_mgdl: f64,
    /// Fraction of each parameter's range moved per gated update.
    pub step_fraction: f64,
    pub dia_bounds_min: (f64, f64),
    pub peak_bounds_min: (f64, f64),
}

impl Default for EstimatorCfg {
    fn default() -> Self {
        Self {
            min_window_min: 30.0,
            iob_floor_u: 0.5,
            residual_tol_mgdl: 5.0,
            step_fraction: 0.02,
            dia_bounds_min: (180.0, 540.0),
            peak_bounds_min: (35.0, 120.0),
        }
    }
}

/// SMB pipeline tuning.
#[derive(Debug, Clone)]
pub struct SmbCfg {
    /// Number of candidate doses in the discretized cost search.
    pub optimizer_candidates: usize,
    /// Short control horizon for glucose-action translation (minutes).
    pub horizon_min: f64,
    /// Penalty weight on dose magnitude relative to basal rate.
    pub dose_weight: f64,
    /// BG excess over target (mg/dL) at which the blend is fully optimizer-driven.
    pub optimizer_blend_span_mgdl: f64,
    /// Minimum ML history before refinement is trusted.
    pub ml_min_samples: usize,
    /// Default minutes between SMB deliveries.
    pub interval_min: u32,
    pub breakfast_factor: f64,
    pub lunch_factor: f64,
    pub dinner_factor: f64,
    pub snack_factor: f64,
    pub sleep_factor: f64,
    pub high_carb_factor: f64,
}

impl Default for SmbCfg {
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

/// Meal-mode high-IOB relaxation.
#[derive(Debug, Clone)]
pub struct MealHighIobCfg {
    /// Allowed excess over max IOB, as a fraction of max IOB.
    pub slack_fraction: f64,
}

impl Default for MealHighIobCfg {
    fn default() -> Self {
        Self {
            slack_fraction: 0.3,
        }
    }
}

/// Adaptive basal state-machine thresholds.
#[derive(Debug, Clone)]
pub struct BasalCfg {
    /// Zero-temp duration issued under the hypo guard (minutes).
    pub hypo_duration_min: u32,
    /// Minimum zero-temp age before micro-resume fires (minutes).
    pub min_stall_min: f64,
    /// Absolute floor on the micro-resume rate (U/h).
    pub resume_floor_uph: f64,
    /// Fraction of profile basal used by micro-resume.
    pub resume_fraction: f64,
    /// Small additive adjustment on the micro-resume rate (U/h).
    pub resume_adjust_uph: f64,
    /// BG above which plateau/anti-stall branches may fire.
    pub high_bg_mgdl: f64,
    /// Both average deltas must be within this band for a plateau (mg/dL).
    pub flat_band_mgdl: f64,
    /// Trend-fit quality floor for plateau/anti-stall decisions.
    pub r2_min: f64,
    pub plateau_kicker_factor: f64,
    pub anti_stall_factor: f64,
    /// Long-average delta above this means the high is not resolving (mg/dL).
    pub resolving_delta_mgdl: f64,
    /// Duration of plateau/anti-stall temp basals (minutes).
    pub temp_duration_min: u32,
}

impl Default for BasalCfg {
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

/// Aggregate engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineCfg {
    pub zones: ZoneCfg,
    pub high_bg_override: HighBgOverrideCfg,
    pub damping: DampingCfg,
    pub isf: IsfFusionCfg,
    pub kernel: KernelCfg,
    pub estimator: EstimatorCfg,
    pub smb: SmbCfg,
    pub meal_high_iob: MealHighIobCfg,
    pub basal: BasalCfg,
    pub adjusters: AdjusterCfg,
    pub cycle: CycleCfg,
}

/// Bounds on the composed context-adjuster product.
#[derive(Debug, Clone)]
pub struct AdjusterCfg {
    pub min_composed_mult: f64,
    pub max_composed_mult: f64,
}

impl Default for AdjusterCfg {
    fn default() -> Self {
        Self {
            min_composed_mult: 0.25,
            max_composed_mult: 4.0,
        }
    }
}

/// Control-cycle cadence; drives decision staleness.
#[derive(Debug, Clone)]
pub struct CycleCfg {
    pub period_min: u32,
}

impl Default for CycleCfg {
    fn default() -> Self {
        Self { period_min: 5 }
    }
}
