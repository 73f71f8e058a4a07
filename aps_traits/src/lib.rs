pub mod clock;

pub use clock::{Clock, SystemClock};

/// Port to the pump's temporary-basal channel.
///
/// Returns `Ok(true)` when the pump accepted the command. Retries are the
/// actuator's responsibility, not the decision core's.
pub trait BasalActuator {
    fn set_temp_basal(
        &mut self,
        rate_uph: f64,
        duration_min: u32,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// Port to the pump's bolus channel for super micro-boluses.
pub trait SmbActuator {
    fn deliver(&mut self, units: f64) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
}

/// Optional ML collaborator refining the baseline SMB candidate.
///
/// `sample_count` gates the refinement: predictions from a thin history are
/// ignored by the caller. A failing `predict_smb_delta` is best-effort and
/// never aborts a cycle.
pub trait MlUamPort {
    fn sample_count(&self) -> usize;
    fn predict_smb_delta(
        &mut self,
        bg_mgdl: f64,
        delta5: f64,
        iob_u: f64,
        cob_g: f64,
    ) -> Result<f64, Box<dyn std::error::Error + Send + Sync>>;
}

/// Optional external auditor supplying a 0..1 confidence signal that gates
/// the Soft Landing boost. `None` means unknown; callers must treat unknown
/// conservatively.
pub trait AuditorConfidencePort {
    fn confidence(&mut self) -> Option<f64>;
}
