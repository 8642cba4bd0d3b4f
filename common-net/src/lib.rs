pub mod error;
pub mod metrics;
pub mod protocol;
pub mod shutdown;
pub mod telemetry;
