pub mod config;
pub mod health;
pub mod limiters;
pub mod metrics;
