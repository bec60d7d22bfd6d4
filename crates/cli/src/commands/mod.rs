//! Subcommand implementations

pub mod actions;
pub mod anomalies;
pub mod detect;
pub mod evaluate;
pub mod health;
pub mod policies;
pub mod status;
pub mod toggle;
