//! attendd — Attendance verification daemon.
//!
//! Wires the SQLite ledger and filesystem evidence sink into the
//! verification orchestrator and exposes it on D-Bus.

pub mod config;
pub mod dbus_interface;
pub mod service;

pub use config::{Config, ConfigError};
pub use service::{Capture, DaySummary, Marked, Rejected, Verification, VerificationService};
