//! `From` implementations bridging `aps_config` types to `aps_core` types.

use crate::config::*;

impl From<&aps_config::Zones> for ZoneCfg {
    fn from(c: &aps_config::Zones) -> Self {
        Self {
            max_smb_low_u: c.max_smb_low_u,
            max_smb_high_u: c.max_smb_high_u,
            soft_landing_band_mgdl: c.soft_landing_band_mgdl,
            coast_delta_mgdl: c.coast_delta_mgdl,
            strict_below_mgdl: c.strict_below_mgdl,
            reactor_from_mgdl: c.reactor_from_mgdl,
            uam_rocket_delta_mgdl: c.uam_rocket_delta_mgdl,
        }
    }
}

impl From<&aps_config::HighBgOverride> for HighBgOverrideCfg {
    fn from(c: &aps_config::HighBgOverride) -> Self {
        Self {
            strong_threshold_mgdl: c.strong_threshold_mgdl,
            min_threshold_mgdl: c.min_threshold_mgdl,
            delta_min_mgdl: c.delta_min_mgdl,
        }
    }
}

impl From<&aps_config::Damping> for DampingCfg {
    fn from(c: &aps_config::Damping) -> Self {
        Self {
            tail_fraction_threshold: c.tail_fraction_threshold,
            tail_floor: c.tail_floor,
            exercise_multiplier: c.exercise_multiplier,
            late_fat_meal_multiplier: c.late_fat_meal_multiplier,
        }
    }
}

impl From<&aps_config::Blender> for BlenderCfg {
    fn from(c: &aps_config::Blender) -> Self {
        Self {
            max_step_pct_per_loop: c.max_step_pct_per_loop,
            max_step_pct_per_hour: c.max_step_pct_per_hour,
        }
    }
}

impl From<&aps_config::IsfFusion> for IsfFusionCfg {
    fn from(c: &aps_config::IsfFusion) -> Self {
        Self {
            tdd_clamp_min_factor: c.tdd_clamp_min_factor,
            tdd_clamp_max_factor: c.tdd_clamp_max_factor,
            blender: BlenderCfg::from(&c.blender),
        }
    }
}

impl From<&aps_config::Kernel> for KernelCfg {
    fn from(c: &aps_config::Kernel) -> Self {
        Self {
            dia_min: c.dia_min,
            peak_min: c.peak_min,
            sigma: c.sigma,
        }
    }
}

impl From<&aps_config::Estimator> for EstimatorCfg {
    fn from(c: &aps_config::Estimator) -> Self {
        Self {
            min_window_min: c.min_window_min,
            iob_floor_u: c.iob_floor_u,
            residual_tol_mgdl: c.residual_tol_mgdl,
            step_fraction: c.step_fraction,
            dia_bounds_min: (c.dia_min_bound, c.dia_max_bound),
            peak_bounds_min: (c.peak_min_bound, c.peak_max_bound),
        }
    }
}

impl From<&aps_config::Smb> for SmbCfg {
    fn from(c: &aps_config::Smb) -> Self {
        Self {
            optimizer_candidates: c.optimizer_candidates,
            horizon_min: c.horizon_min,
            dose_weight: c.dose_weight,
            optimizer_blend_span_mgdl: c.optimizer_blend_span_mgdl,
            ml_min_samples: c.ml_min_samples,
            interval_min: c.interval_min,
            breakfast_factor: c.breakfast_factor,
            lunch_factor: c.lunch_factor,
            dinner_factor: c.dinner_factor,
            snack_factor: c.snack_factor,
            sleep_factor: c.sleep_factor,
            high_carb_factor: c.high_carb_factor,
        }
    }
}

impl From<&aps_config::MealHighIob> for MealHighIobCfg {
    fn from(c: &aps_config::MealHighIob) -> Self {
        Self {
            slack_fraction: c.slack_fraction,
        }
    }
}

impl From<&aps_config::Basal> for BasalCfg {
    fn from(c: &aps_config::Basal) -> Self {
        Self {
            hypo_duration_min: c.hypo_duration_min,
            min_stall_min: c.min_stall_min,
            resume_floor_uph: c.resume_floor_uph,
            resume_fraction: c.resume_fraction,
            resume_adjust_uph: c.resume_adjust_uph,
            high_bg_mgdl: c.high_bg_mgdl,
            flat_band_mgdl: c.flat_band_mgdl,
            r2_min: c.r2_min,
            plateau_kicker_factor: c.plateau_kicker_factor,
            anti_stall_factor: c.anti_stall_factor,
            resolving_delta_mgdl: c.resolving_delta_mgdl,
            temp_duration_min: c.temp_duration_min,
        }
    }
}

impl From<&aps_config::Adjusters> for AdjusterCfg {
    fn from(c: &aps_config::Adjusters) -> Self {
        Self {
            min_composed_mult: c.min_composed_mult,
            max_composed_mult: c.max_composed_mult,
        }
    }
}

impl From<&aps_config::Cycle> for CycleCfg {
    fn from(c: &aps_config::Cycle) -> Self {
        Self {
            period_min: c.period_min,
        }
    }
}

impl From<&aps_config::Config> for EngineCfg {
    fn from(c: &aps_config::Config) -> Self {
        Self {
            zones: ZoneCfg::from(&c.zones),
            high_bg_override: HighBgOverrideCfg::from(&c.high_bg_override),
            damping: DampingCfg::from(&c.damping),
            isf: IsfFusionCfg::from(&c.isf),
            kernel: KernelCfg::from(&c.kernel),
            estimator: EstimatorCfg::from(&c.estimator),
            smb: SmbCfg::from(&c.smb),
            meal_high_iob: MealHighIobCfg::from(&c.meal_high_iob),
            basal: BasalCfg::from(&c.basal),
            adjusters: AdjusterCfg::from(&c.adjusters),
            cycle: CycleCfg::from(&c.cycle),
        }
    }
}
