pub mod config;
pub mod error;
pub mod identity;
pub mod pagination;
pub mod pipeline;
pub mod storage;
pub mod telemetry;
