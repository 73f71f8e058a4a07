//! Parametric insulin-activity model.
//!
//! A log-normal-shaped activity curve parameterized by duration of action
//! and peak time. The shape parameter `sigma` is fixed per configuration;
//! the location parameter is chosen so the curve's mode falls at
//! `peak_min`. The CDF is normalized so it equals 1.0 at `t = dia_min`,
//! which makes "fraction of action occurred by t" well defined even though
//! the raw log-normal has infinite support.

use crate::config::KernelCfg;

const SQRT_2: f64 = std::f64::consts::SQRT_2;
const SQRT_2PI: f64 = 2.506_628_274_631_000_5;

/// Abramowitz & Stegun 7.1.26 rational approximation of erf.
/// Max absolute error ~1.5e-7, far below any dosing granularity.
fn erf(x: f64) -> f64 {
    // The rational coefficients sum to ~1 - 1e-9, so x = 0 would otherwise
    // come back as ~1e-9 instead of exactly 0.
    if x == 0.0 {
        return 0.0;
    }
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard normal CDF.
#[inline]
fn phi(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / SQRT_2))
}

/// Log-normal insulin activity kernel.
#[derive(Debug, Clone, Copy)]
pub struct InsulinActivityKernel {
    dia_min: f64,
    peak_min: f64,
    sigma: f64,
    /// Location parameter; mode of the curve is exp(mu - sigma^2) = peak.
    mu: f64,
    /// Raw CDF mass inside [0, dia]; normalization denominator.
    dia_mass: f64,
}

impl InsulinActivityKernel {
    pub fn new(cfg: &KernelCfg) -> Self {
        Self::with_params(cfg.dia_min, cfg.peak_min, cfg.sigma)
    }

    pub fn with_params(dia_min: f64, peak_min: f64, sigma: f64) -> Self {
        let dia_min = dia_min.max(60.0);
        let peak_min = peak_min.max(10.0).min(dia_min * 0.9);
        let sigma = sigma.clamp(0.1, 1.5);
        let mu = peak_min.ln() + sigma * sigma;
        let dia_mass = phi((dia_min.ln() - mu) / sigma).max(f64::MIN_POSITIVE);
        Self {
            dia_min,
            peak_min,
            sigma,
            mu,
            dia_mass,
        }
    }

    pub fn dia_min(&self) -> f64 {
        self.dia_min
    }

    pub fn peak_min(&self) -> f64 {
        self.peak_min
    }

    /// Instantaneous activity at `t` minutes after delivery. Zero at and
    /// before t = 0, always non-negative.
    pub fn action_at(&self, t_min: f64) -> f64 {
        if t_min <= 0.0 || !t_min.is_finite() {
            return 0.0;
        }
        let z = (t_min.ln() - self.mu) / self.sigma;
        (-0.5 * z * z).exp() / (t_min * self.sigma * SQRT_2PI)
    }

    /// Cumulative action by `t` minutes; monotonically non-decreasing.
    pub fn cdf(&self, t_min: f64) -> f64 {
        if t_min <= 0.0 || !t_min.is_finite() {
            return 0.0;
        }
        phi((t_min.ln() - self.mu) / self.sigma)
    }

    /// CDF rescaled so it equals 1.0 at `t = dia_min`; clamped to [0, 1].
    pub fn normalized_cdf(&self, t_min: f64) -> f64 {
        (self.cdf(t_min) / self.dia_mass).clamp(0.0, 1.0)
    }

    /// Numeric inverse of `normalized_cdf`: the time at which fraction `p`
    /// of the action has occurred. `p` is clamped to [0, 1].
    pub fn find_time_for_normalized_cdf(&self, p: f64) -> f64 {
        let p = if p.is_finite() { p.clamp(0.0, 1.0) } else { 0.0 };
        if p == 0.0 {
            return 0.0;
        }
        if p >= 1.0 {
            return self.dia_min;
        }
        let mut lo = 0.0;
        let mut hi = self.dia_min;
        for _ in 0..60 {
            let mid = 0.5 * (lo + hi);
            if self.normalized_cdf(mid) < p {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }
}
