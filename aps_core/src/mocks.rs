//! Test and helper mocks for aps_core.

use std::sync::{Arc, Mutex};

use aps_traits::{AuditorConfidencePort, BasalActuator, Clock, MlUamPort, SmbActuator};

/// Deterministic clock whose time is set explicitly.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    millis: Arc<Mutex<i64>>,
}

impl ManualClock {
    pub fn at(millis: i64) -> Self {
        Self {
            millis: Arc::new(Mutex::new(millis)),
        }
    }

    pub fn set(&self, millis: i64) {
        if let Ok(mut m) = self.millis.lock() {
            *m = millis;
        }
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.lock().map(|g| *g).unwrap_or(0)
    }
}

/// Basal actuator that records every command.
#[derive(Debug, Clone)]
pub struct RecordingBasal {
    pub calls: Arc<Mutex<Vec<(f64, u32)>>>,
    accept: bool,
}

impl RecordingBasal {
    pub fn accepting() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            accept: true,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            accept: false,
        }
    }
}

impl BasalActuator for RecordingBasal {
    fn set_temp_basal(
        &mut self,
        rate_uph: f64,
        duration_min: u32,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((rate_uph, duration_min));
        }
        Ok(self.accept)
    }
}

/// SMB actuator that records every delivery.
#[derive(Debug, Clone)]
pub struct RecordingSmb {
    pub calls: Arc<Mutex<Vec<f64>>>,
    accept: bool,
}

impl RecordingSmb {
    pub fn accepting() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            accept: true,
        }
    }

    pub fn rejecting() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            accept: false,
        }
    }
}

impl SmbActuator for RecordingSmb {
    fn deliver(&mut self, units: f64) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(units);
        }
        Ok(self.accept)
    }
}

/// ML port returning a fixed delta with a fixed history size.
#[derive(Debug, Clone, Copy)]
pub struct ScriptedMl {
    pub samples: usize,
    pub delta: f64,
}

impl MlUamPort for ScriptedMl {
    fn sample_count(&self) -> usize {
        self.samples
    }

    fn predict_smb_delta(
        &mut self,
        _bg_mgdl: f64,
        _delta5: f64,
        _iob_u: f64,
        _cob_g: f64,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.delta)
    }
}

/// Auditor port with a fixed confidence value.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfidence(pub Option<f64>);

impl AuditorConfidencePort for FixedConfidence {
    fn confidence(&mut self) -> Option<f64> {
        self.0
    }
}
