//! Cycle orchestration: one `LoopContext` in, one `Decision` out.
//!
//! `LoopEngine` owns every piece of cross-cycle state (the PK/PD estimator,
//! the ISF fusion and blending rate limiters, the basal state machine, the
//! SMB cadence gate). None of that state is internally synchronized: the
//! engine assumes a single exclusive caller per cycle, enforced by the
//! scheduler, not by this crate. The engine performs no I/O of its own;
//! actuation goes through injected ports.

use aps_traits::{AuditorConfidencePort, BasalActuator, Clock, MlUamPort, SmbActuator, SystemClock};

use crate::audit::{AuditEvent, AuditTrail, OverrideKind};
use crate::basal::BasalDecisionEngine;
use crate::blender::IsfBlender;
use crate::config::EngineCfg;
use crate::error::{BuildError, EngineError, Result};
use crate::estimator::{AdaptivePkPdEstimator, LearnGate};
use crate::isf::{IsfFusion, tdd_isf};
use crate::quantize::CapabilityValidator;
use crate::safety::hypo_blocked;
use crate::smb::SmbDecisionPipeline;
use crate::types::{
    ActivityStage, BasalPlan, Decision, LoopContext, PkPdSnapshot, SafetyReport, sanitize,
};

/// Composed multipliers from the external context adjusters.
#[derive(Debug, Clone, Copy)]
struct ComposedAdjusters {
    basal_mult: f64,
    isf_mult: f64,
    smb_mult: f64,
}

/// Per-port actuation outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActuationOutcome {
    pub basal_accepted: Option<bool>,
    pub smb_accepted: Option<bool>,
}

pub struct LoopEngine {
    cfg: EngineCfg,
    clock: Box<dyn Clock + Send + Sync>,
    basal_actuator: Box<dyn BasalActuator>,
    smb_actuator: Box<dyn SmbActuator>,
    ml: Option<Box<dyn MlUamPort>>,
    auditor: Option<Box<dyn AuditorConfidencePort>>,

    estimator: AdaptivePkPdEstimator,
    isf_fusion: IsfFusion,
    kalman_blender: IsfBlender,
    smb: SmbDecisionPipeline,
    basal: BasalDecisionEngine,
    validator: CapabilityValidator,

    /// Anchor for the estimator's observation window: (epoch millis, BG).
    obs_anchor: Option<(i64, f64)>,
    /// SMB cadence gate; deliveries before this instant are suppressed.
    next_allowed_smb_millis: i64,
}

impl core::fmt::Debug for LoopEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoopEngine")
            .field("dia_min", &self.estimator.dia_min())
            .field("peak_min", &self.estimator.peak_min())
            .field("next_allowed_smb_millis", &self.next_allowed_smb_millis)
            .finish()
    }
}

impl LoopEngine {
    pub fn builder() -> LoopEngineBuilder {
        LoopEngineBuilder::default()
    }

    fn compose_adjusters(&self, ctx: &LoopContext, trail: &mut AuditTrail) -> ComposedAdjusters {
        let lo = self.cfg.adjusters.min_composed_mult;
        let hi = self.cfg.adjusters.max_composed_mult;
        let mut basal = 1.0;
        let mut isf = 1.0;
        let mut smb = 1.0;
        for adj in &ctx.adjusters {
            basal *= adj.basal_mult;
            isf *= adj.isf_mult;
            smb *= adj.smb_mult;
            trail.push(AuditEvent::Note {
                tag: "adjuster",
                detail: format!(
                    "{}: basal x{:.2} isf x{:.2} smb x{:.2}",
                    adj.label, adj.basal_mult, adj.isf_mult, adj.smb_mult
                ),
            });
        }
        let clamp_logged = |v: f64, field: &'static str, trail: &mut AuditTrail| {
            let c = if v.is_finite() { v.clamp(lo, hi) } else { 1.0 };
            if c != v {
                trail.push(AuditEvent::Clamped {
                    field,
                    from: v,
                    to: c,
                });
            }
            c
        };
        ComposedAdjusters {
            basal_mult: clamp_logged(basal, "adjusters.basal_mult", trail),
            isf_mult: clamp_logged(isf, "adjusters.isf_mult", trail),
            smb_mult: clamp_logged(smb, "adjusters.smb_mult", trail),
        }
    }

    /// Fused pharmacology state for this cycle.
    fn pkpd_snapshot(&self, ctx: &LoopContext, fused_isf: f64) -> PkPdSnapshot {
        let kernel = self.estimator.kernel();
        let dia = kernel.dia_min();
        let peak = kernel.peak_min();
        // With no bolus on record the action window is fully elapsed.
        let t_min = match ctx.last_bolus_epoch_millis {
            Some(at) => (ctx.now_epoch_millis.saturating_sub(at).max(0) as f64) / 60_000.0,
            None => dia,
        };
        let stage = if t_min < 0.8 * peak {
            ActivityStage::Rising
        } else if t_min <= 1.6 * peak {
            ActivityStage::Peak
        } else {
            ActivityStage::Tail
        };
        let tail_fraction = ((t_min - peak) / (dia - peak).max(1.0)).clamp(0.0, 1.0);
        let peak_activity = kernel.action_at(peak).max(f64::MIN_POSITIVE);
        PkPdSnapshot {
            dia_min: dia,
            peak_min: peak,
            fused_isf,
            tail_fraction,
            stage,
            relative_activity: (kernel.action_at(t_min) / peak_activity).clamp(0.0, 1.0),
            post_window_fraction: (t_min / dia).clamp(0.0, 1.0),
        }
    }

    /// Feed the gated PK/PD learner from the rolling observation window.
    fn update_estimator(&mut self, ctx: &LoopContext) {
        let now = ctx.now_epoch_millis;
        let bg = ctx.bg.mgdl;
        match self.obs_anchor {
            None => self.obs_anchor = Some((now, bg)),
            Some((t0, bg0)) => {
                let window_min = (now.saturating_sub(t0).max(0) as f64) / 60_000.0;
                let gate = self.estimator.observe(
                    window_min,
                    bg0 - bg,
                    ctx.iob_u,
                    ctx.cob_g,
                    ctx.modes.exercise,
                    ctx.profile.isf_mgdl_per_u,
                );
                match gate {
                    LearnGate::WindowTooShort => {}
                    // Carbs or exercise invalidate the window; restart it.
                    // A consumed window restarts too.
                    _ => self.obs_anchor = Some((now, bg)),
                }
            }
        }
    }

    /// PK/PD-derived ISF candidate: a longer observed action window means
    /// more total effect per unit than the profile assumes.
    fn pkpd_isf(&self, profile_isf: f64) -> f64 {
        profile_isf * (self.estimator.dia_min() / self.cfg.kernel.dia_min.max(60.0))
    }

    /// Decision with everything forced to zero; used when the hypo guard
    /// cannot be evaluated or fires.
    fn fail_closed(&mut self, now: i64, trail: AuditTrail, note: &str) -> Decision {
        self.basal.note_zero_temp(now);
        Decision {
            basal: Some(BasalPlan {
                rate_uph: 0.0,
                duration_min: self.cfg.basal.hypo_duration_min,
                reason: format!("Hypo guard: {note}"),
            }),
            smb: None,
            safety: SafetyReport {
                hypo_blocked: true,
                notes: vec![note.to_string()],
            },
            trail,
            computed_at_millis: now,
            expires_at_millis: now + i64::from(self.cfg.cycle.period_min) * 60_000,
        }
    }

    /// Run one control cycle. Never panics, never returns an error: a cycle
    /// either yields a dose or fails closed to zero.
    pub fn run_cycle(&mut self, ctx: &LoopContext) -> Decision {
        let mut trail = AuditTrail::new();
        let mut ctx = ctx.clone();
        let now = ctx.now_epoch_millis;

        if !sanitize(&mut ctx, &mut trail) {
            tracing::warn!("cycle failed closed: hypo guard unevaluable");
            return self.fail_closed(now, trail, "unevaluable BG inputs, zero dose");
        }

        let adjusters = self.compose_adjusters(&ctx, &mut trail);
        self.update_estimator(&ctx);

        // ISF fusion: median of profile/TDD/PKPD, banded, smoothed, then
        // optionally blended with the fast Kalman signal.
        let profile_isf = ctx.profile.isf_mgdl_per_u;
        let mut fused = self.isf_fusion.fuse(
            profile_isf,
            tdd_isf(ctx.tdd_24h_u),
            self.pkpd_isf(profile_isf),
            now,
            &mut trail,
        );
        if adjusters.isf_mult != 1.0 {
            fused *= adjusters.isf_mult;
            trail.push(AuditEvent::Stage {
                tag: "isf adjusted",
                value: fused,
            });
        }
        if let Some(kalman) = ctx.kalman_isf {
            if kalman.is_finite() && kalman > 0.0 {
                fused = self
                    .kalman_blender
                    .blend(fused, kalman, ctx.kalman_trust, now);
                trail.push(AuditEvent::Stage {
                    tag: "isf kalman-blended",
                    value: fused,
                });
            }
        }

        let pkpd = self.pkpd_snapshot(&ctx, fused);
        let kernel = self.estimator.kernel();

        // Auditor confidence is best-effort; unknown stays conservative.
        let confidence = self.auditor.as_mut().and_then(|a| a.confidence());

        // SMB branch, behind the cadence gate.
        let smb_outcome = if now < self.next_allowed_smb_millis {
            trail.push(AuditEvent::Note {
                tag: "smb cadence",
                detail: format!(
                    "suppressed until t+{}s",
                    (self.next_allowed_smb_millis - now) / 1000
                ),
            });
            None
        } else {
            // Reborrow the boxed port at the call's lifetime; a plain
            // `as_deref_mut` would pin the trait object to 'static.
            let ml = self.ml.as_deref_mut().map(|m| m as &mut dyn MlUamPort);
            let outcome = self.smb.decide(
                &ctx,
                &pkpd,
                &kernel,
                fused,
                adjusters.smb_mult,
                ml,
                confidence,
                &mut trail,
            );
            if outcome.units > 0.0 {
                self.next_allowed_smb_millis =
                    now + i64::from(outcome.next_interval_min) * 60_000;
            }
            Some(outcome)
        };

        // Basal branch, independent of the SMB branch.
        let basal_plan = self.basal.decide(&ctx, &mut trail).map(|mut plan| {
            if adjusters.basal_mult != 1.0 && plan.rate_uph > 0.0 {
                plan.rate_uph *= adjusters.basal_mult;
            }
            let (rate, duration) =
                self.validator
                    .validate_basal(plan.rate_uph, plan.duration_min, &ctx.pump, &mut trail);
            plan.rate_uph = rate;
            plan.duration_min = duration;
            plan
        });

        // Final, unconditional hypo dominance: overrides and bypasses set
        // earlier in the pipeline do not survive this check.
        let mut safety = SafetyReport::default();
        let (basal_plan, smb_plan) = if hypo_blocked(&ctx) {
            safety.hypo_blocked = true;
            safety
                .notes
                .push("hypo guard active: all dosing forced to zero".to_string());
            if smb_outcome.is_some_and(|o| o.units > 0.0)
                || basal_plan.as_ref().is_some_and(|p| p.rate_uph > 0.0)
            {
                trail.push(AuditEvent::OverrideFired {
                    kind: OverrideKind::HypoGuard,
                });
            }
            let zero = BasalPlan {
                rate_uph: 0.0,
                duration_min: self.cfg.basal.hypo_duration_min,
                reason: "Hypo guard: trajectory at or below threshold".to_string(),
            };
            // The state machine must see this zero temp, or micro-resume
            // would never fire after the suspension ends.
            self.basal.note_zero_temp(now);
            (Some(basal_plan.filter(|p| p.rate_uph == 0.0).unwrap_or(zero)), None)
        } else {
            let smb = smb_outcome
                .filter(|o| o.units > 0.0)
                .map(|o| self.smb.plan(&o, now, &trail));
            (basal_plan, smb)
        };

        Decision {
            basal: basal_plan,
            smb: smb_plan,
            safety,
            trail,
            computed_at_millis: now,
            expires_at_millis: now + i64::from(self.cfg.cycle.period_min) * 60_000,
        }
    }

    /// Send a decision to the pump ports.
    ///
    /// Refuses stale decisions outright (no partial dose). Port failures
    /// are surfaced on the decision's audit trail, never silently lost;
    /// retrying is the actuator's job.
    pub fn actuate(&mut self, decision: &mut Decision) -> Result<ActuationOutcome> {
        let now = self.clock.now_millis();
        if now > decision.expires_at_millis {
            decision.trail.push(AuditEvent::Note {
                tag: "actuation refused",
                detail: format!("decision expired at {}", decision.expires_at_millis),
            });
            return Err(eyre::Report::new(EngineError::StaleDecision {
                computed_at_millis: decision.computed_at_millis,
                now_millis: now,
            }));
        }

        let mut outcome = ActuationOutcome::default();
        if let Some(plan) = &decision.basal {
            let accepted = match self
                .basal_actuator
                .set_temp_basal(plan.rate_uph, plan.duration_min)
            {
                Ok(ok) => ok,
                Err(e) => {
                    tracing::warn!(error = %e, "basal actuation failed");
                    decision.trail.push(AuditEvent::Note {
                        tag: "basal actuation failed",
                        detail: e.to_string(),
                    });
                    false
                }
            };
            if !accepted {
                decision.trail.push(AuditEvent::Note {
                    tag: "basal actuation",
                    detail: "pump rejected temp basal".to_string(),
                });
            }
            outcome.basal_accepted = Some(accepted);
        }
        if let Some(plan) = &decision.smb {
            let accepted = match self.smb_actuator.deliver(plan.units) {
                Ok(ok) => ok,
                Err(e) => {
                    tracing::warn!(error = %e, "smb actuation failed");
                    decision.trail.push(AuditEvent::Note {
                        tag: "smb actuation failed",
                        detail: e.to_string(),
                    });
                    false
                }
            };
            if !accepted {
                decision.trail.push(AuditEvent::Note {
                    tag: "smb actuation",
                    detail: "pump rejected micro-bolus".to_string(),
                });
            }
            outcome.smb_accepted = Some(accepted);
        }
        Ok(outcome)
    }
}

/// Builder for `LoopEngine`; actuator ports are required, everything else
/// has defaults. Validation happens in `build()`.
#[derive(Default)]
pub struct LoopEngineBuilder {
    cfg: Option<EngineCfg>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    basal_actuator: Option<Box<dyn BasalActuator>>,
    smb_actuator: Option<Box<dyn SmbActuator>>,
    ml: Option<Box<dyn MlUamPort>>,
    auditor: Option<Box<dyn AuditorConfidencePort>>,
}

impl LoopEngineBuilder {
    pub fn with_cfg(mut self, cfg: EngineCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Box::new(clock));
        self
    }

    pub fn with_basal_actuator(mut self, port: impl BasalActuator + 'static) -> Self {
        self.basal_actuator = Some(Box::new(port));
        self
    }

    pub fn with_smb_actuator(mut self, port: impl SmbActuator + 'static) -> Self {
        self.smb_actuator = Some(Box::new(port));
        self
    }

    pub fn with_ml(mut self, port: impl MlUamPort + 'static) -> Self {
        self.ml = Some(Box::new(port));
        self
    }

    pub fn with_auditor(mut self, port: impl AuditorConfidencePort + 'static) -> Self {
        self.auditor = Some(Box::new(port));
        self
    }

    pub fn build(self) -> Result<LoopEngine> {
        let cfg = self.cfg.unwrap_or_default();
        validate_cfg(&cfg)?;
        let basal_actuator = self
            .basal_actuator
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBasalActuator))?;
        let smb_actuator = self
            .smb_actuator
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSmbActuator))?;
        let clock = self.clock.unwrap_or_else(|| Box::new(SystemClock::new()));

        Ok(LoopEngine {
            estimator: AdaptivePkPdEstimator::new(&cfg.kernel, cfg.estimator.clone()),
            isf_fusion: IsfFusion::new(cfg.isf.clone()),
            kalman_blender: IsfBlender::new(cfg.isf.blender),
            smb: SmbDecisionPipeline::new(&cfg),
            basal: BasalDecisionEngine::new(cfg.basal.clone()),
            validator: CapabilityValidator,
            obs_anchor: None,
            next_allowed_smb_millis: i64::MIN,
            cfg,
            clock,
            basal_actuator,
            smb_actuator,
            ml: self.ml,
            auditor: self.auditor,
        })
    }
}

fn validate_cfg(cfg: &EngineCfg) -> Result<()> {
    if cfg.zones.max_smb_low_u <= 0.0 || cfg.zones.max_smb_high_u < cfg.zones.max_smb_low_u {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "zone caps must satisfy 0 < low <= high",
        )));
    }
    if cfg.zones.strict_below_mgdl >= cfg.zones.reactor_from_mgdl {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "strict-guard bound must be below the reactor bound",
        )));
    }
    if !(0.0..=1.0).contains(&cfg.damping.tail_fraction_threshold) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "tail fraction threshold must be in [0, 1]",
        )));
    }
    if cfg.kernel.peak_min >= cfg.kernel.dia_min {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "peak time must be shorter than DIA",
        )));
    }
    if cfg.cycle.period_min == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "cycle period must be positive",
        )));
    }
    Ok(())
}
