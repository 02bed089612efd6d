pub mod client;
pub mod config;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use client::{PierClient, connect};
