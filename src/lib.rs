//! Leader election for a group of cooperating processes.
//!
//! Participants share one object that carries an exclusive lock and a
//! watch/notify channel. Whoever owns the lock leads and broadcasts
//! heartbeats; the others watch. A secondary that stops hearing heartbeats
//! breaks the lock (optionally fencing the old holder) and takes over.
//!
//! Storage and transport are supplied by the application through
//! [`LockDriver`] and [`NotificationChannel`]; leadership changes are
//! reported to a [`Listener`] and bracket a [`StatusWatcher`].
mod config;
mod constants;
mod core;
mod errors;
mod listener;
mod lock;
mod metrics;
mod notify;
mod status;
mod type_config;

pub use core::*;

pub use config::*;
pub use errors::*;
pub use listener::*;
pub use lock::*;
pub use metrics::*;
pub use notify::*;
pub use status::*;
pub use type_config::*;


//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
