use std::fmt::Debug;

use crate::Listener;
use crate::LockDriver;
use crate::NotificationChannel;
use crate::StatusWatcher;

/// Binds the collaborators a [`crate::LeaderWatcher`] drives.
///
/// **This coding style learned from OpenRaft project type config.**
pub trait TypeConfig:
    Sync + Send + Sized + Debug + Clone + Copy + Default + Eq + PartialEq + Ord + PartialOrd + 'static
{
    type L: LockDriver;

    type N: NotificationChannel;

    type S: StatusWatcher;

    type H: Listener;
}

pub mod alias {
    use super::TypeConfig;

    pub type LOF<T> = <T as TypeConfig>::L;

    pub type NOF<T> = <T as TypeConfig>::N;

    pub type SOF<T> = <T as TypeConfig>::S;

    pub type HOF<T> = <T as TypeConfig>::H;
}
