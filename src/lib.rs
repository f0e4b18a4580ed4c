pub mod configuration;
pub mod discovery;
pub mod error;
pub mod health;
pub mod probes;
pub mod report;
pub mod telemetry;
