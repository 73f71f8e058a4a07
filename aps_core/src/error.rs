use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("stale decision: computed at {computed_at_millis}, now {now_millis}")]
    StaleDecision {
        computed_at_millis: i64,
        now_millis: i64,
    },
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing basal actuator")]
    MissingBasalActuator,
    #[error("missing SMB actuator")]
    MissingSmbActuator,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
