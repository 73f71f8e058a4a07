//! Tiered dose-ceiling policy and its carve-outs.
//!
//! Precedence is an explicit ordered table, first match wins:
//! hypo guard > high-BG override > zone table > damping > bypass. The
//! hypo-guard comparison is the only unconditional rule; every override,
//! bypass, and relaxation re-checks it even when an earlier stage already
//! approved a dose.

use crate::audit::{AuditEvent, AuditTrail, DampingKind, OverrideKind, Zone};
use crate::config::{HighBgOverrideCfg, MealHighIobCfg, ZoneCfg};
use crate::types::{LoopContext, hypo_floor};

/// True when the BG trajectory touches the hypo guard; all dosing must be
/// forced to zero regardless of any override flag set earlier.
#[inline]
pub fn hypo_blocked(ctx: &LoopContext) -> bool {
    hypo_floor(ctx) <= ctx.profile.hypo_guard_mgdl
}

/// BG-relative zones defining the maximum allowed SMB magnitude.
#[derive(Debug, Clone)]
pub struct SafetyZonePolicy {
    cfg: ZoneCfg,
}

impl SafetyZonePolicy {
    pub fn new(cfg: ZoneCfg) -> Self {
        Self { cfg }
    }

    /// Soft Landing boost factor from the external confidence signal.
    /// Unknown or low confidence defaults to no boost.
    fn boost(confidence: Option<f64>) -> f64 {
        match confidence {
            Some(c) if c >= 0.9 => 1.10,
            Some(c) if c >= 0.7 => 1.05,
            _ => 1.0,
        }
    }

    /// Maximum allowed SMB for this cycle, with the selected zone recorded.
    ///
    /// A manual user-triggered action bypasses all zones and returns the
    /// high-aggression cap directly.
    pub fn max_allowed_smb(
        &self,
        ctx: &LoopContext,
        confidence: Option<f64>,
        trail: &mut AuditTrail,
    ) -> f64 {
        let low = self.cfg.max_smb_low_u.min(ctx.pump.max_smb_u);
        let high = self.cfg.max_smb_high_u.min(ctx.pump.max_smb_u);
        let bg = ctx.bg.mgdl;
        let target = ctx.profile.target_mgdl;

        if ctx.modes.manual_dose {
            trail.push(AuditEvent::ZoneApplied {
                zone: Zone::ManualBypass,
                cap_u: high,
            });
            return high;
        }

        // Ordered zone table, first match wins.
        let (zone, cap) = if bg > target
            && bg <= target + self.cfg.soft_landing_band_mgdl
            && ctx.bg.delta5 < self.cfg.coast_delta_mgdl
            && ctx.eventual_bg_mgdl > target
        {
            (Zone::SoftLanding, low * Self::boost(confidence))
        } else if bg < self.cfg.strict_below_mgdl {
            // Fast-rise ("UAM rocket") pattern lifts the 50% strict cap.
            let rocket = ctx.bg.delta5 > self.cfg.uam_rocket_delta_mgdl
                || ctx.bg.short_avg_delta > self.cfg.uam_rocket_delta_mgdl;
            (Zone::StrictGuard, if rocket { low } else { 0.5 * low })
        } else if bg < self.cfg.reactor_from_mgdl {
            // Known discontinuity against Strict Guard at the lower edge:
            // strict-without-rocket yields 0.5*low just below the boundary
            // while progress=0 here yields the full low cap. Reproduced
            // as-is pending clinical sign-off.
            let span = self.cfg.reactor_from_mgdl - self.cfg.strict_below_mgdl;
            let progress = ((bg - self.cfg.strict_below_mgdl) / span).clamp(0.0, 1.0);
            let cap = if ctx.eventual_bg_mgdl < self.cfg.strict_below_mgdl {
                low
            } else {
                low + (high - low) * progress
            };
            (Zone::Buffer, cap)
        } else {
            (Zone::Reactor, high)
        };

        trail.push(AuditEvent::ZoneApplied { zone, cap_u: cap });
        cap
    }
}

/// Outcome of the high-BG override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverrideOutcome {
    pub used: bool,
    pub units: f64,
    /// Minutes until the next SMB is allowed; 0 forces maximum cadence.
    pub next_interval_min: Option<u32>,
}

/// Stronger, orthogonal carve-out above the zone table.
///
/// Qualifies on sustained hyperglycemia or a rising high; the hypo-guard
/// check is evaluated unconditionally and always wins, and IOB headroom is
/// required.
#[derive(Debug, Clone)]
pub struct HighBgOverride {
    cfg: HighBgOverrideCfg,
}

impl HighBgOverride {
    pub fn new(cfg: HighBgOverrideCfg) -> Self {
        Self { cfg }
    }

    pub fn apply(&self, ctx: &LoopContext, units: f64, trail: &mut AuditTrail) -> OverrideOutcome {
        let bg = ctx.bg.mgdl;
        let qualifies = bg >= self.cfg.strong_threshold_mgdl
            || (bg >= self.cfg.min_threshold_mgdl && ctx.bg.delta5 >= self.cfg.delta_min_mgdl);
        if !qualifies {
            return OverrideOutcome {
                used: false,
                units,
                next_interval_min: None,
            };
        }
        if hypo_blocked(ctx) {
            trail.push(AuditEvent::Note {
                tag: "high-bg override denied",
                detail: format!(
                    "hypo guard: floor {:.1} <= {:.1}",
                    hypo_floor(ctx),
                    ctx.profile.hypo_guard_mgdl
                ),
            });
            return OverrideOutcome {
                used: false,
                units,
                next_interval_min: None,
            };
        }
        if ctx.iob_u >= ctx.pump.max_smb_u {
            trail.push(AuditEvent::Note {
                tag: "high-bg override denied",
                detail: format!("no IOB headroom: {:.2} >= {:.2}", ctx.iob_u, ctx.pump.max_smb_u),
            });
            return OverrideOutcome {
                used: false,
                units,
                next_interval_min: None,
            };
        }

        let boosted = units.max(ctx.pump.bolus_step_u).min(ctx.pump.max_smb_u);
        trail.push(AuditEvent::OverrideFired {
            kind: OverrideKind::HighBg,
        });
        if boosted != units {
            trail.push(AuditEvent::Clamped {
                field: "smb.override",
                from: units,
                to: boosted,
            });
        }
        OverrideOutcome {
            used: true,
            units: boosted,
            next_interval_min: Some(0),
        }
    }
}

/// Decides whether `damp_smb` should be skipped this cycle.
pub struct BypassHeuristics;

impl BypassHeuristics {
    /// True on any active meal mode, or on a fast hyperglycemic rise with
    /// IOB headroom and no hypo risk.
    pub fn should_bypass(ctx: &LoopContext, zone_cfg: &ZoneCfg) -> bool {
        if ctx.modes.any_meal() {
            return true;
        }
        let rising_fast = ctx.bg.delta5 >= 1.5 || ctx.bg.combined_delta >= 4.0;
        ctx.bg.mgdl >= zone_cfg.strict_below_mgdl
            && rising_fast
            && ctx.iob_u < ctx.pump.max_smb_u
            && !hypo_blocked(ctx)
    }
}

/// Result of the meal-mode IOB-ceiling relaxation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HighIobRelax {
    pub relax: bool,
    /// Damping applied to the relaxed dose; 1.0 when not relaxing.
    pub damping: f64,
}

/// Relaxes (never removes) the IOB ceiling during a confirmed
/// post-prandial rise. The relaxation decays linearly to nothing as IOB
/// approaches `max_iob + slack`; beyond that it is denied entirely.
#[derive(Debug, Clone)]
pub struct MealHighIobPolicy {
    cfg: MealHighIobCfg,
}

impl MealHighIobPolicy {
    pub fn new(cfg: MealHighIobCfg) -> Self {
        Self { cfg }
    }

    pub fn evaluate(&self, ctx: &LoopContext, trail: &mut AuditTrail) -> HighIobRelax {
        let denied = HighIobRelax {
            relax: false,
            damping: 1.0,
        };
        let target = ctx.profile.target_mgdl;
        let eligible = ctx.modes.any_meal()
            && ctx.max_iob_u > 0.0
            && ctx.iob_u > ctx.max_iob_u
            && ctx.bg.mgdl > 120.0_f64.max(target)
            && ctx.bg.delta5 > 0.5
            && ctx.eventual_bg_mgdl > target + 10.0;
        if !eligible {
            return denied;
        }

        let slack = self.cfg.slack_fraction * ctx.max_iob_u;
        let excess = ctx.iob_u - ctx.max_iob_u;
        if excess > slack {
            trail.push(AuditEvent::Note {
                tag: "meal high-iob relax denied",
                detail: format!("excess {excess:.2}U beyond slack {slack:.2}U"),
            });
            return denied;
        }

        let excess_fraction = (excess / slack).clamp(0.0, 1.0);
        let damping = 1.0 - 0.5 * excess_fraction;
        trail.push(AuditEvent::DampingApplied {
            kind: DampingKind::HighIobRelax,
            multiplier: damping,
            applied: true,
        });
        HighIobRelax {
            relax: true,
            damping,
        }
    }
}
