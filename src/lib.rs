//! Custodian: a progressive self-repair controller.
//!
//! Receives component failure reports, escalates through three repair
//! tiers (restart → dependency verification → AI-assisted research), and
//! protects the host with snapshot-based rollback when a repair leaves
//! the system unstable. All health, attempt, and rollback records are
//! durable in SQLite so escalation decisions survive restarts.
//!
//! Entry point: [`engine::RepairController::handle_component_failure`].

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod logging;

pub use config::RepairConfig;
pub use engine::RepairController;
pub use error::AppError;
