use std::fmt;

use crate::NotifierId;

/// Identity of whoever currently holds the leader lock
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Locker {
    /// Holder's identity on the notification channel
    pub entity: NotifierId,
    /// Lock owner cookie; empty when the holder is only known by its heartbeats
    pub cookie: String,
    /// Holder's instance address, the unit of fencing
    pub address: String,
}

impl Locker {
    pub fn new(
        entity: NotifierId,
        cookie: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            entity,
            cookie: cookie.into(),
            address: address.into(),
        }
    }

    /// Holder learned from a notification: no cookie, cannot be broken yet.
    pub(crate) fn from_notifier(entity: NotifierId) -> Self {
        Self {
            entity,
            ..Default::default()
        }
    }

    /// A full lock identity, usable for `break_lock`
    pub fn is_valid(&self) -> bool {
        !self.cookie.is_empty()
    }
}

impl fmt::Display for Locker {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "[entity={}, cookie={}, address={}]",
            self.entity, self.cookie, self.address
        )
    }
}
