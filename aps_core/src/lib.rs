#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Decision core of a closed-loop insulin-dosing controller.
//!
//! Given a periodic physiological snapshot (glucose, trend, active
//! insulin/carbs, pump limits, operating mode), the engine computes a
//! bounded, explainable delivery decision once per control cycle: a
//! temporary basal rate and/or a super micro-bolus (SMB).
//!
//! ## Architecture
//!
//! - **Pharmacology**: log-normal insulin-activity kernel with gated online
//!   parameter learning (`kernel`, `estimator`)
//! - **Sensitivity**: median fusion of profile/TDD/PK-PD ISF candidates,
//!   rate-limited smoothing and fast/slow blending (`isf`, `blender`)
//! - **Safety**: tiered BG zones, high-BG override, bypass heuristics,
//!   meal high-IOB relaxation, unconditional hypo guard (`safety`)
//! - **SMB**: seven-stage cost-optimizing micro-bolus pipeline (`smb`,
//!   `damping`)
//! - **Basal**: priority-ordered adaptive temp-basal state machine
//!   (`basal`)
//! - **Feasibility**: pump-step quantization with a small-dose safety
//!   floor (`quantize`)
//! - **Audit**: structured event trail; every decision is reconstructable
//!   (`audit`)
//!
//! The core is single-threaded and synchronous, performs no I/O, and is
//! invoked once per ~5 minute cycle by an external scheduler. Cross-cycle
//! state lives in explicit structs owned by `engine::LoopEngine`; there is
//! no global mutable state and no internal synchronization, so the caller
//! must guarantee one exclusive invocation at a time.

pub mod audit;
pub mod basal;
pub mod blender;
pub mod config;
pub mod conversions;
pub mod damping;
pub mod engine;
pub mod error;
pub mod estimator;
pub mod isf;
pub mod kernel;
pub mod mocks;
pub mod quantize;
pub mod safety;
pub mod smb;
pub mod types;

pub use audit::{AuditEvent, AuditTrail, DampingKind, OverrideKind, Zone};
pub use config::EngineCfg;
pub use engine::{ActuationOutcome, LoopEngine, LoopEngineBuilder};
pub use error::{BuildError, EngineError, Result};
pub use types::{
    BasalPlan, BgSnapshot, ContextAdjustment, Decision, LoopContext, LoopProfile, ModeState,
    PkPdSnapshot, PumpCaps, SafetyReport, SmbPlan,
};
