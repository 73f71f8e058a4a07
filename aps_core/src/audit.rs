//! Structured audit trail for dosing decisions.
//!
//! Every stage of the decision pipeline appends tagged events instead of
//! concatenating free-form text. The final dose must be reconstructable from
//! the trail: which zone applied, which damping multipliers fired and their
//! values, whether an override fired, and the pre- vs post-quantization
//! amounts. A presentation layer renders events to text via `Display`.

use std::fmt;

/// Safety zone selected for the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    SoftLanding,
    StrictGuard,
    Buffer,
    Reactor,
    ManualBypass,
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Zone::SoftLanding => "soft-landing",
            Zone::StrictGuard => "strict-guard",
            Zone::Buffer => "buffer",
            Zone::Reactor => "reactor",
            Zone::ManualBypass => "manual-bypass",
        };
        f.write_str(s)
    }
}

/// Cause of a multiplicative dose attenuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DampingKind {
    Tail,
    Exercise,
    LateFatMeal,
    MealBypass,
    HighIobRelax,
    ContextAdjusters,
}

impl fmt::Display for DampingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DampingKind::Tail => "tail",
            DampingKind::Exercise => "exercise",
            DampingKind::LateFatMeal => "late-fat-meal",
            DampingKind::MealBypass => "meal-bypass",
            DampingKind::HighIobRelax => "high-iob-relax",
            DampingKind::ContextAdjusters => "context-adjusters",
        };
        f.write_str(s)
    }
}

/// Override or guard that fired this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    HighBg,
    HypoGuard,
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverrideKind::HighBg => "high-bg",
            OverrideKind::HypoGuard => "hypo-guard",
        };
        f.write_str(s)
    }
}

/// One tagged audit event.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditEvent {
    /// Intermediate pipeline value, tagged by stage.
    Stage { tag: &'static str, value: f64 },
    ZoneApplied { zone: Zone, cap_u: f64 },
    DampingApplied {
        kind: DampingKind,
        multiplier: f64,
        applied: bool,
    },
    OverrideFired { kind: OverrideKind },
    /// An input or output was clamped; silent correction is forbidden.
    Clamped {
        field: &'static str,
        from: f64,
        to: f64,
    },
    Note { tag: &'static str, detail: String },
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::Stage { tag, value } => write!(f, "{tag}={value:.3}"),
            AuditEvent::ZoneApplied { zone, cap_u } => {
                write!(f, "zone={zone} cap={cap_u:.3}U")
            }
            AuditEvent::DampingApplied {
                kind,
                multiplier,
                applied,
            } => {
                if *applied {
                    write!(f, "damp[{kind}]x{multiplier:.3}")
                } else {
                    write!(f, "damp[{kind}] off")
                }
            }
            AuditEvent::OverrideFired { kind } => write!(f, "override[{kind}]"),
            AuditEvent::Clamped { field, from, to } => {
                write!(f, "clamped {field}: {from:.3} -> {to:.3}")
            }
            AuditEvent::Note { tag, detail } => write!(f, "{tag}: {detail}"),
        }
    }
}

/// Ordered list of audit events for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditTrail {
    events: Vec<AuditEvent>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AuditEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// True if any event matches the predicate.
    pub fn any(&self, pred: impl Fn(&AuditEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }

    /// Render the whole trail as one human-readable line.
    pub fn render(&self) -> String {
        let parts: Vec<String> = self.events.iter().map(|e| e.to_string()).collect();
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_in_order() {
        let mut t = AuditTrail::new();
        t.push(AuditEvent::ZoneApplied {
            zone: Zone::Buffer,
            cap_u: 0.75,
        });
        t.push(AuditEvent::DampingApplied {
            kind: DampingKind::Tail,
            multiplier: 0.8,
            applied: true,
        });
        t.push(AuditEvent::OverrideFired {
            kind: OverrideKind::HighBg,
        });
        let s = t.render();
        assert_eq!(s, "zone=buffer cap=0.750U; damp[tail]x0.800; override[high-bg]");
    }

    #[test]
    fn any_finds_overrides() {
        let mut t = AuditTrail::new();
        assert!(!t.any(|e| matches!(e, AuditEvent::OverrideFired { .. })));
        t.push(AuditEvent::OverrideFired {
            kind: OverrideKind::HypoGuard,
        });
        assert!(t.any(|e| matches!(
            e,
            AuditEvent::OverrideFired {
                kind: OverrideKind::HypoGuard
            }
        )));
    }
}
