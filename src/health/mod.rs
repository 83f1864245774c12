//! Health Module
//!
//! Probes the live session in the background and reconnects transparently
//! when the remote side stops answering.

mod monitor;

pub(crate) use monitor::probe_session;
pub use monitor::{HealthMonitor, HealthMonitorHandle};
