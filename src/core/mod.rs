//! Election engine: the public [`LeaderWatcher`] handle and the loop that
//! drives it.
mod event;
mod leader_watcher;
mod state;
mod timer;

pub(crate) use event::*;
pub use leader_watcher::*;
pub(crate) use state::ReleaseReason;
pub(crate) use state::ElectionState;
pub use state::Phase;
pub(crate) use timer::*;
