//! Micro-bolus decision pipeline.
//!
//! Seven stages per cycle: baseline candidate (optionally ML-refined),
//! meal/time context factor, kernel-based horizon translation, discretized
//! cost-minimizing search blended with a proportional correction, zone
//! policy plus bypass-aware damping, high-BG override, quantization. Every
//! stage appends to the audit trail; the final dose must be
//! reconstructable from it.

use aps_traits::MlUamPort;

use crate::audit::{AuditEvent, AuditTrail, DampingKind, OverrideKind};
use crate::config::{DampingCfg, EngineCfg, SmbCfg, ZoneCfg};
use crate::damping::damp_smb;
use crate::kernel::InsulinActivityKernel;
use crate::quantize::CapabilityValidator;
use crate::safety::{
    BypassHeuristics, HighBgOverride, MealHighIobPolicy, SafetyZonePolicy, hypo_blocked,
};
use crate::types::{LoopContext, PkPdSnapshot, SmbPlan};

/// Raw pipeline outcome before the engine assembles the `SmbPlan`.
#[derive(Debug, Clone, Copy)]
pub struct SmbOutcome {
    pub units: f64,
    pub next_interval_min: u32,
    pub meal_bypass: bool,
    pub override_used: bool,
}

#[derive(Debug, Clone)]
pub struct SmbDecisionPipeline {
    cfg: SmbCfg,
    zone_cfg: ZoneCfg,
    damping_cfg: DampingCfg,
    zones: SafetyZonePolicy,
    high_bg: HighBgOverride,
    high_iob: MealHighIobPolicy,
    validator: CapabilityValidator,
}

impl SmbDecisionPipeline {
    pub fn new(cfg: &EngineCfg) -> Self {
        Self {
            cfg: cfg.smb.clone(),
            zone_cfg: cfg.zones.clone(),
            damping_cfg: cfg.damping.clone(),
            zones: SafetyZonePolicy::new(cfg.zones.clone()),
            high_bg: HighBgOverride::new(cfg.high_bg_override.clone()),
            high_iob: MealHighIobPolicy::new(cfg.meal_high_iob.clone()),
            validator: CapabilityValidator,
        }
    }

    /// Meal/time context factor: mutually exclusive, first match wins.
    fn meal_factor(&self, ctx: &LoopContext) -> f64 {
        let m = &ctx.modes;
        if m.breakfast {
            self.cfg.breakfast_factor
        } else if m.lunch {
            self.cfg.lunch_factor
        } else if m.dinner {
            self.cfg.dinner_factor
        } else if m.snack {
            self.cfg.snack_factor
        } else if m.sleep {
            self.cfg.sleep_factor
        } else if m.high_carb {
            self.cfg.high_carb_factor
        } else {
            1.0
        }
    }

    /// Discretized search over candidate doses minimizing a tracking cost.
    fn optimize(&self, ctx: &LoopContext, isf: f64, horizon_frac: f64) -> f64 {
        let target = ctx.profile.target_mgdl;
        let basal_norm = ctx.profile.basal_uph.max(0.1);
        let n = self.cfg.optimizer_candidates.max(2);
        let mut best_u = 0.0;
        let mut best_cost = f64::INFINITY;
        for i in 0..=n {
            let u = ctx.pump.max_smb_u * (i as f64) / (n as f64);
            let predicted = ctx.eventual_bg_mgdl - u * isf * horizon_frac;
            let tracking = (predicted - target).powi(2);
            let effort = self.cfg.dose_weight * (u / basal_norm).powi(2);
            let cost = tracking + effort;
            if cost < best_cost {
                best_cost = cost;
                best_u = u;
            }
        }
        best_u
    }

    /// Run the full pipeline and return the final quantized amount.
    pub fn decide(
        &self,
        ctx: &LoopContext,
        pkpd: &PkPdSnapshot,
        kernel: &InsulinActivityKernel,
        fused_isf: f64,
        smb_mult: f64,
        ml: Option<&mut dyn MlUamPort>,
        confidence: Option<f64>,
        trail: &mut AuditTrail,
    ) -> SmbOutcome {
        let isf = fused_isf.max(5.0);
        let target = ctx.profile.target_mgdl;

        // Stage 1: baseline from predicted eventual excess, optionally
        // refined by the ML collaborator. Refinement is best-effort: a thin
        // history or a failing port leaves the baseline untouched.
        let mut baseline = ((ctx.eventual_bg_mgdl - target).max(0.0)) / isf;
        trail.push(AuditEvent::Stage {
            tag: "smb baseline",
            value: baseline,
        });
        if let Some(ml) = ml {
            if ml.sample_count() >= self.cfg.ml_min_samples {
                match ml.predict_smb_delta(ctx.bg.mgdl, ctx.bg.delta5, ctx.iob_u, ctx.cob_g) {
                    Ok(delta) if delta.is_finite() => {
                        let delta = delta.clamp(-ctx.pump.max_smb_u, ctx.pump.max_smb_u);
                        baseline = (baseline + delta).max(0.0);
                        trail.push(AuditEvent::Stage {
                            tag: "smb ml-refined",
                            value: baseline,
                        });
                    }
                    Ok(_) => {
                        trail.push(AuditEvent::Note {
                            tag: "ml refinement skipped",
                            detail: "non-finite prediction".to_string(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "ml refinement failed, keeping baseline");
                        trail.push(AuditEvent::Note {
                            tag: "ml refinement failed",
                            detail: e.to_string(),
                        });
                    }
                }
            }
        }

        // Stage 2: meal/time context factor.
        let factor = self.meal_factor(ctx);
        baseline *= factor;
        trail.push(AuditEvent::Stage {
            tag: "smb meal-factored",
            value: baseline,
        });

        // Stage 3: proportional correction over the short horizon. The
        // kernel transform scales the current excess by the fraction of a
        // dose that acts within the horizon.
        let horizon_frac = kernel.normalized_cdf(self.cfg.horizon_min);
        let proportional = (ctx.bg.mgdl - target).max(0.0) / isf * horizon_frac;
        trail.push(AuditEvent::Stage {
            tag: "smb proportional",
            value: proportional,
        });
        let pi_candidate = 0.5 * (baseline + proportional);

        // Stage 4: cost-minimizing search, blended toward the optimizer the
        // further BG sits above target.
        let optimal = self.optimize(ctx, isf, horizon_frac);
        trail.push(AuditEvent::Stage {
            tag: "smb optimizer",
            value: optimal,
        });
        let weight = ((ctx.bg.mgdl - target) / self.cfg.optimizer_blend_span_mgdl).clamp(0.0, 1.0);
        let mut dose = weight * optimal + (1.0 - weight) * pi_candidate;
        trail.push(AuditEvent::Stage {
            tag: "smb blended",
            value: dose,
        });

        // Composed context adjusters (exercise/cycle-phase/reactivity).
        if smb_mult != 1.0 {
            trail.push(AuditEvent::DampingApplied {
                kind: DampingKind::ContextAdjusters,
                multiplier: smb_mult,
                applied: true,
            });
            dose *= smb_mult;
        }

        // Stage 5: zone ceiling, then bypass-aware damping.
        let cap = self.zones.max_allowed_smb(ctx, confidence, trail);
        dose = dose.min(cap);
        let bypass = BypassHeuristics::should_bypass(ctx, &self.zone_cfg);
        let damped = damp_smb(
            dose,
            pkpd,
            ctx.modes.exercise,
            ctx.modes.late_fat_meal,
            bypass,
            &self.damping_cfg,
            trail,
        );
        dose = damped.units;

        // IOB ceiling, relaxable only during a confirmed post-prandial rise.
        if ctx.max_iob_u > 0.0 && ctx.iob_u >= ctx.max_iob_u {
            let relax = self.high_iob.evaluate(ctx, trail);
            if relax.relax {
                dose *= relax.damping;
            } else {
                trail.push(AuditEvent::Note {
                    tag: "iob ceiling",
                    detail: format!("iob {:.2}U >= max {:.2}U", ctx.iob_u, ctx.max_iob_u),
                });
                dose = 0.0;
            }
        }

        // Stage 6: high-BG override may bump the dose and force cadence.
        let outcome = self.high_bg.apply(ctx, dose, trail);
        dose = outcome.units;
        let next_interval_min = outcome.next_interval_min.unwrap_or(self.cfg.interval_min);

        // Stage 7: quantize to the pump step.
        let mut quantized = self.validator.validate_smb(dose, &ctx.pump, trail);

        // The hypo guard is re-checked even after overrides and bypasses.
        if quantized > 0.0 && hypo_blocked(ctx) {
            trail.push(AuditEvent::OverrideFired {
                kind: OverrideKind::HypoGuard,
            });
            quantized = 0.0;
        }

        SmbOutcome {
            units: quantized,
            next_interval_min,
            meal_bypass: damped.meal_bypass,
            override_used: outcome.used,
        }
    }

    /// Assemble the final plan from a pipeline outcome.
    pub fn plan(&self, outcome: &SmbOutcome, now_millis: i64, trail: &AuditTrail) -> SmbPlan {
        SmbPlan {
            units: outcome.units,
            deliver_at_millis: now_millis,
            next_interval_min: outcome.next_interval_min,
            reason: trail.render(),
        }
    }
}
