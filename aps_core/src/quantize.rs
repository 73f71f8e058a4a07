//! Dose quantization and hardware-feasibility validation.
//!
//! All delivered amounts must be exact multiples of the pump's step. A
//! genuinely-intended small dose must never silently vanish to "no action"
//! through rounding, so quantization carries a safety floor.

use crate::audit::{AuditEvent, AuditTrail};
use crate::types::PumpCaps;

/// Magnitudes below this are treated as exactly zero.
pub const ZERO_EPSILON: f64 = 1e-6;
/// Pre-quantization inputs above this must not round down to zero.
pub const INTENT_EPSILON_U: f64 = 0.02;

/// Clamp to `[min, max]` and round to the nearest multiple of `step`.
///
/// The result is step-aligned and within bounds; non-finite inputs map to
/// `min`.
pub fn quantize(x: f64, step: f64, min: f64, max: f64) -> f64 {
    if !x.is_finite() || step <= 0.0 {
        return min;
    }
    let clamped = x.clamp(min, max);
    let mut q = (clamped / step).round() * step;
    if q > max {
        q -= step;
    }
    if q < min {
        q += step;
    }
    if q.abs() < ZERO_EPSILON {
        q = 0.0;
    }
    q
}

/// Quantize a bolus amount to the pump step with the safety floor: a
/// pre-quantization input above `INTENT_EPSILON_U` that would round to zero
/// returns one step instead.
pub fn quantize_to_pump_step(units: f64, step: f64) -> f64 {
    if !units.is_finite() || step <= 0.0 {
        return 0.0;
    }
    let q = (units.max(0.0) / step).round() * step;
    let q = if q.abs() < ZERO_EPSILON { 0.0 } else { q };
    if q == 0.0 && units > INTENT_EPSILON_U {
        return step;
    }
    q
}

/// Final hardware-feasibility pass shared by basal and SMB outputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CapabilityValidator;

impl CapabilityValidator {
    /// Align an SMB amount to the pump, recording pre/post values.
    pub fn validate_smb(&self, units: f64, pump: &PumpCaps, trail: &mut AuditTrail) -> f64 {
        trail.push(AuditEvent::Stage {
            tag: "smb pre-quantize",
            value: units,
        });
        let capped = units.clamp(0.0, pump.max_smb_u);
        let q = quantize_to_pump_step(capped, pump.bolus_step_u).min(pump.max_smb_u);
        if (q - units).abs() > ZERO_EPSILON {
            trail.push(AuditEvent::Clamped {
                field: "smb.units",
                from: units,
                to: q,
            });
        }
        trail.push(AuditEvent::Stage {
            tag: "smb quantized",
            value: q,
        });
        q
    }

    /// Align a basal rate and duration to the pump, recording corrections.
    pub fn validate_basal(
        &self,
        rate_uph: f64,
        duration_min: u32,
        pump: &PumpCaps,
        trail: &mut AuditTrail,
    ) -> (f64, u32) {
        let q = quantize(rate_uph, pump.basal_step_uph, 0.0, pump.max_basal_uph);
        if (q - rate_uph).abs() > ZERO_EPSILON {
            trail.push(AuditEvent::Clamped {
                field: "basal.rate_uph",
                from: rate_uph,
                to: q,
            });
        }
        let duration = if q > 0.0 && duration_min < pump.min_duration_min {
            trail.push(AuditEvent::Clamped {
                field: "basal.duration_min",
                from: duration_min as f64,
                to: pump.min_duration_min as f64,
            });
            pump.min_duration_min
        } else {
            duration_min
        };
        (q, duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditTrail;
    use crate::types::PumpCaps;

    fn pump() -> PumpCaps {
        PumpCaps {
            basal_step_uph: 0.05,
            bolus_step_u: 0.05,
            min_duration_min: 30,
            max_basal_uph: 4.0,
            max_smb_u: 2.0,
        }
    }

    #[test]
    fn small_intended_dose_floors_to_one_step() {
        assert_eq!(quantize_to_pump_step(0.024, 0.05), 0.05);
    }

    #[test]
    fn negligible_dose_rounds_to_zero() {
        assert_eq!(quantize_to_pump_step(0.01, 0.05), 0.0);
    }

    #[test]
    fn quantize_respects_bounds_and_step() {
        let q = quantize(3.97, 0.05, 0.0, 4.0);
        assert!((q - 3.95).abs() < 1e-12);
        assert_eq!(quantize(9.0, 0.05, 0.0, 4.0), 4.0);
        assert_eq!(quantize(-1.0, 0.05, 0.0, 4.0), 0.0);
        assert_eq!(quantize(f64::NAN, 0.05, 0.0, 4.0), 0.0);
    }

    #[test]
    fn quantize_is_idempotent() {
        for &x in &[0.0, 0.024, 0.07, 1.23, 3.999, 7.0] {
            let once = quantize(x, 0.05, 0.0, 4.0);
            assert_eq!(quantize(once, 0.05, 0.0, 4.0), once);
        }
    }

    #[test]
    fn validator_never_exceeds_pump_limits() {
        let mut trail = AuditTrail::new();
        let v = CapabilityValidator;
        assert_eq!(v.validate_smb(5.0, &pump(), &mut trail), 2.0);
        let (rate, dur) = v.validate_basal(7.3, 10, &pump(), &mut trail);
        assert_eq!(rate, 4.0);
        assert_eq!(dur, 30);
    }

    #[test]
    fn zero_rate_keeps_short_duration() {
        let mut trail = AuditTrail::new();
        let (rate, dur) = CapabilityValidator.validate_basal(0.0, 30, &pump(), &mut trail);
        assert_eq!(rate, 0.0);
        assert_eq!(dur, 30);
    }
}
