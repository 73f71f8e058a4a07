//! Online PK/PD parameter learning.
//!
//! The estimator owns the kernel's `(dia, peak)` parameters across cycles
//! and nudges them toward observed glucose-drop residuals, but only when
//! every learning-validity gate passes. Absence of updates is normal flow,
//! not an error.

use crate::config::{EstimatorCfg, KernelCfg};
use crate::kernel::InsulinActivityKernel;

/// Why an observation did not update the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnGate {
    Updated,
    WindowTooShort,
    IobBelowFloor,
    CarbsActive,
    Exercising,
    ResidualInTolerance,
}

/// Gated online learner for `(dia_min, peak_min)`.
#[derive(Debug, Clone)]
pub struct AdaptivePkPdEstimator {
    cfg: EstimatorCfg,
    sigma: f64,
    dia_min: f64,
    peak_min: f64,
}

impl AdaptivePkPdEstimator {
    pub fn new(kernel: &KernelCfg, cfg: EstimatorCfg) -> Self {
        let dia_min = kernel.dia_min.clamp(cfg.dia_bounds_min.0, cfg.dia_bounds_min.1);
        let peak_min = kernel
            .peak_min
            .clamp(cfg.peak_bounds_min.0, cfg.peak_bounds_min.1);
        Self {
            cfg,
            sigma: kernel.sigma,
            dia_min,
            peak_min,
        }
    }

    pub fn dia_min(&self) -> f64 {
        self.dia_min
    }

    pub fn peak_min(&self) -> f64 {
        self.peak_min
    }

    /// Kernel built from the current parameter estimates.
    pub fn kernel(&self) -> InsulinActivityKernel {
        InsulinActivityKernel::with_params(self.dia_min, self.peak_min, self.sigma)
    }

    /// Feed one observation window.
    ///
    /// `actual_drop_mgdl` is the measured BG drop over `window_min` minutes
    /// (positive = BG fell). The predicted drop is what the current kernel
    /// parameters and ISF would explain from the active insulin. Parameters
    /// move a small step toward reducing the residual; all gates must pass
    /// first.
    pub fn observe(
        &mut self,
        window_min: f64,
        actual_drop_mgdl: f64,
        iob_u: f64,
        cob_g: f64,
        exercising: bool,
        isf_mgdl_per_u: f64,
    ) -> LearnGate {
        if !window_min.is_finite() || window_min < self.cfg.min_window_min {
            return LearnGate::WindowTooShort;
        }
        if !iob_u.is_finite() || iob_u < self.cfg.iob_floor_u {
            return LearnGate::IobBelowFloor;
        }
        if cob_g > 0.0 {
            return LearnGate::CarbsActive;
        }
        if exercising {
            return LearnGate::Exercising;
        }

        let predicted_drop = isf_mgdl_per_u * iob_u * self.kernel().normalized_cdf(window_min);
        let residual = actual_drop_mgdl - predicted_drop;
        if !residual.is_finite() || residual.abs() <= self.cfg.residual_tol_mgdl {
            return LearnGate::ResidualInTolerance;
        }

        // Positive residual: BG fell faster than the model explains, so the
        // insulin is acting earlier and more compactly than parameterized.
        let dia_range = self.cfg.dia_bounds_min.1 - self.cfg.dia_bounds_min.0;
        let peak_range = self.cfg.peak_bounds_min.1 - self.cfg.peak_bounds_min.0;
        let direction = if residual > 0.0 { -1.0 } else { 1.0 };
        let dia_step = direction * self.cfg.step_fraction * dia_range;
        let peak_step = direction * self.cfg.step_fraction * peak_range;

        let before = (self.dia_min, self.peak_min);
        self.dia_min =
            (self.dia_min + dia_step).clamp(self.cfg.dia_bounds_min.0, self.cfg.dia_bounds_min.1);
        self.peak_min = (self.peak_min + peak_step)
            .clamp(self.cfg.peak_bounds_min.0, self.cfg.peak_bounds_min.1);
        tracing::debug!(
            residual,
            dia_from = before.0,
            dia_to = self.dia_min,
            peak_from = before.1,
            peak_to = self.peak_min,
            "pkpd parameters nudged"
        );
        LearnGate::Updated
    }
}
