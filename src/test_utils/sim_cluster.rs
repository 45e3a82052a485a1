//! In-memory stand-in for the shared leader object: one exclusive lock with
//! a blacklist, plus a watch/notify bus delivering every broadcast to all
//! registered watchers, the sender included.
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::test_config;
use crate::Error;
use crate::InboundNotify;
use crate::LeaderWatcher;
use crate::LeaderWatcherConfig;
use crate::Listener;
use crate::LockDriver;
use crate::LockError;
use crate::Locker;
use crate::NotificationChannel;
use crate::NotifierId;
use crate::NotifyError;
use crate::NotifyId;
use crate::Payload;
use crate::Result;
use crate::StatusWatcher;
use crate::TypeConfig;
use crate::WatchHandle;

const NOTIFIER_ID_BASE: NotifierId = 100;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimTypeConfig;

impl TypeConfig for SimTypeConfig {
    type L = SimLock;

    type N = SimChannel;

    type S = RecordingStatusWatcher;

    type H = RecordingListener;
}

/// Side effects of every participant, in the order they happened
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn push(
        &self,
        event: impl Into<String>,
    ) {
        self.events.lock().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Events recorded by `name`, without the name prefix
    pub fn of(
        &self,
        name: &str,
    ) -> Vec<String> {
        let prefix = format!("{name} ");
        self.events
            .lock()
            .iter()
            .filter_map(|event| event.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    object_created: bool,
    holder: Option<Locker>,
    blacklist: HashSet<String>,
    watchers: HashMap<u64, (NotifierId, mpsc::UnboundedSender<InboundNotify>)>,
    next_watch_id: u64,
    next_notify_id: NotifyId,
    unacked: HashSet<NotifyId>,
    acked: Vec<NotifyId>,
    broadcasts: Vec<(NotifierId, Vec<u8>)>,
}

impl ClusterState {
    fn deliver(
        &mut self,
        target: Option<NotifierId>,
        sender: NotifierId,
        payload: &[u8],
    ) -> Vec<NotifyId> {
        let sinks: Vec<_> = self
            .watchers
            .values()
            .filter(|(notifier_id, _)| target.map_or(true, |target| target == *notifier_id))
            .cloned()
            .collect();

        let mut delivered = Vec::new();
        for (_, sink) in sinks {
            self.next_notify_id += 1;
            let notify_id = self.next_notify_id;
            let notify = InboundNotify {
                notify_id,
                notifier_id: sender,
                payload: payload.to_vec(),
            };
            // a dropped participant no longer drains its sink
            if sink.send(notify).is_ok() {
                self.unacked.insert(notify_id);
                delivered.push(notify_id);
            }
        }
        delivered
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimCluster {
    state: Arc<Mutex<ClusterState>>,
    events: EventLog,
}

/// One election participant wired to a [`SimCluster`]
pub struct Participant {
    pub name: String,
    pub watcher: LeaderWatcher<SimTypeConfig>,
    pub lock_driver: Arc<SimLock>,
    pub listener: Arc<RecordingListener>,
    pub status_watcher: Arc<RecordingStatusWatcher>,
}

impl SimCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn join(
        &self,
        name: &str,
    ) -> Result<Participant> {
        self.join_with(name, test_config())
    }

    pub fn join_with(
        &self,
        name: &str,
        config: LeaderWatcherConfig,
    ) -> Result<Participant> {
        let lock_driver = Arc::new(SimLock {
            cluster: self.clone(),
            name: name.to_string(),
            get_locker_delay: Mutex::new(Duration::ZERO),
        });
        let channel = Arc::new(SimChannel {
            cluster: self.clone(),
            notifier_id: Mutex::new(None),
        });
        let status_watcher = Arc::new(RecordingStatusWatcher::new(name, self.events.clone()));
        let listener = Arc::new(RecordingListener::new(name, self.events.clone()));

        let watcher = LeaderWatcher::new(
            config,
            lock_driver.clone(),
            channel,
            status_watcher.clone(),
            listener.clone(),
        )?;

        Ok(Participant {
            name: name.to_string(),
            watcher,
            lock_driver,
            listener,
            status_watcher,
        })
    }

    pub fn holder(&self) -> Option<Locker> {
        self.state.lock().holder.clone()
    }

    pub fn is_blacklisted(
        &self,
        address: &str,
    ) -> bool {
        self.state.lock().blacklist.contains(address)
    }

    pub fn is_acked(
        &self,
        notify_id: NotifyId,
    ) -> bool {
        self.state.lock().acked.contains(&notify_id)
    }

    pub fn ack_count(
        &self,
        notify_id: NotifyId,
    ) -> usize {
        self.state.lock().acked.iter().filter(|id| **id == notify_id).count()
    }

    /// Decoded broadcasts with their senders, oldest first
    pub fn broadcasts(&self) -> Vec<(NotifierId, Payload)> {
        self.state
            .lock()
            .broadcasts
            .iter()
            .filter_map(|(sender, bytes)| Payload::decode(bytes).ok().map(|payload| (*sender, payload)))
            .collect()
    }

    pub fn count_broadcasts(
        &self,
        sender: NotifierId,
        payload: Payload,
    ) -> usize {
        self.broadcasts()
            .into_iter()
            .filter(|(from, p)| *from == sender && *p == payload)
            .count()
    }

    /// Delivers raw `payload` from `sender` to the watcher `target` only,
    /// bypassing the broadcast log.
    pub fn inject(
        &self,
        target: NotifierId,
        sender: NotifierId,
        payload: &[u8],
    ) -> Option<NotifyId> {
        self.state.lock().deliver(Some(target), sender, payload).pop()
    }
}

/// Lock driver of one participant
pub struct SimLock {
    cluster: SimCluster,
    name: String,
    get_locker_delay: Mutex<Duration>,
}

impl SimLock {
    /// `get_locker` reads the holder, then answers only after `delay`
    pub fn delay_get_locker(
        &self,
        delay: Duration,
    ) {
        *self.get_locker_delay.lock() = delay;
    }

    fn check_fenced(
        &self,
        st: &ClusterState,
        owner: &Locker,
    ) -> Result<()> {
        if st.blacklist.contains(&owner.address) {
            return Err(LockError::Blacklisted { expire_secs: 30 }.into());
        }
        Ok(())
    }
}

#[async_trait]
impl LockDriver for SimLock {
    async fn try_acquire(
        &self,
        owner: &Locker,
    ) -> Result<()> {
        let mut st = self.cluster.state.lock();
        self.check_fenced(&st, owner)?;
        if st.holder.is_some() {
            return Err(LockError::Busy.into());
        }
        st.holder = Some(owner.clone());
        self.cluster.events.push(format!("{} acquire", self.name));
        Ok(())
    }

    async fn release(
        &self,
        owner: &Locker,
    ) -> Result<()> {
        let mut st = self.cluster.state.lock();
        self.check_fenced(&st, owner)?;
        if st.holder.as_ref() != Some(owner) {
            return Err(LockError::NotFound.into());
        }
        st.holder = None;
        self.cluster.events.push(format!("{} release", self.name));
        Ok(())
    }

    async fn break_lock(
        &self,
        locker: &Locker,
        fence: bool,
        _fence_expiry: Duration,
    ) -> Result<()> {
        let mut st = self.cluster.state.lock();
        match &st.holder {
            None => return Err(LockError::NotFound.into()),
            Some(holder) if holder != locker => return Err(LockError::HolderChanged.into()),
            Some(_) => {}
        }
        st.holder = None;
        if fence {
            st.blacklist.insert(locker.address.clone());
        }
        self.cluster.events.push(format!("{} break {}", self.name, locker.address));
        Ok(())
    }

    async fn get_locker(&self) -> Result<Option<Locker>> {
        let holder = self.cluster.state.lock().holder.clone();
        let delay = *self.get_locker_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(holder)
    }
}

/// Notification channel of one participant
pub struct SimChannel {
    cluster: SimCluster,
    notifier_id: Mutex<Option<NotifierId>>,
}

#[async_trait]
impl NotificationChannel for SimChannel {
    async fn create_object(
        &self,
        _oid: &str,
    ) -> Result<()> {
        self.cluster.state.lock().object_created = true;
        Ok(())
    }

    async fn register_watch(
        &self,
        oid: &str,
        sink: mpsc::UnboundedSender<InboundNotify>,
    ) -> Result<WatchHandle> {
        let mut st = self.cluster.state.lock();
        if !st.object_created {
            return Err(NotifyError::WatchRegistration {
                oid: oid.to_string(),
                reason: "no such object".to_string(),
            }
            .into());
        }

        st.next_watch_id += 1;
        let watch_id = st.next_watch_id;
        let notifier_id = NOTIFIER_ID_BASE + watch_id;
        st.watchers.insert(watch_id, (notifier_id, sink));
        *self.notifier_id.lock() = Some(notifier_id);

        Ok(WatchHandle { watch_id, notifier_id })
    }

    async fn unregister_watch(
        &self,
        handle: &WatchHandle,
    ) -> Result<()> {
        match self.cluster.state.lock().watchers.remove(&handle.watch_id) {
            Some(_) => Ok(()),
            None => Err(NotifyError::WatchUnregistration {
                watch_id: handle.watch_id,
                reason: "unknown watch".to_string(),
            }
            .into()),
        }
    }

    async fn broadcast(
        &self,
        _oid: &str,
        payload: Vec<u8>,
    ) -> Result<()> {
        let sender = self.notifier_id.lock().unwrap_or_default();
        let mut st = self.cluster.state.lock();
        st.broadcasts.push((sender, payload.clone()));
        st.deliver(None, sender, &payload);
        Ok(())
    }

    async fn ack(
        &self,
        notify_id: NotifyId,
    ) -> Result<()> {
        let mut st = self.cluster.state.lock();
        st.unacked.remove(&notify_id);
        st.acked.push(notify_id);
        Ok(())
    }
}

/// Listener recording its calls; can be told to reject promotions
pub struct RecordingListener {
    name: String,
    events: EventLog,
    reject_post_acquire: AtomicUsize,
    post_acquire_delay: Mutex<Duration>,
    post_acquire_calls: AtomicUsize,
    pre_release_calls: AtomicUsize,
}

impl RecordingListener {
    fn new(
        name: &str,
        events: EventLog,
    ) -> Self {
        Self {
            name: name.to_string(),
            events,
            reject_post_acquire: AtomicUsize::new(0),
            post_acquire_delay: Mutex::new(Duration::ZERO),
            post_acquire_calls: AtomicUsize::new(0),
            pre_release_calls: AtomicUsize::new(0),
        }
    }

    /// The next `times` promotions fail
    pub fn reject_post_acquire(
        &self,
        times: usize,
    ) {
        self.reject_post_acquire.store(times, Ordering::SeqCst);
    }

    /// Promotions take `delay` to complete
    pub fn delay_post_acquire(
        &self,
        delay: Duration,
    ) {
        *self.post_acquire_delay.lock() = delay;
    }

    pub fn post_acquire_calls(&self) -> usize {
        self.post_acquire_calls.load(Ordering::SeqCst)
    }

    pub fn pre_release_calls(&self) -> usize {
        self.pre_release_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Listener for RecordingListener {
    async fn post_acquire_handler(&self) -> Result<()> {
        self.post_acquire_calls.fetch_add(1, Ordering::SeqCst);
        self.events.push(format!("{} post_acquire", self.name));

        let delay = *self.post_acquire_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let rejected = self
            .reject_post_acquire
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(Error::Listener("not ready to lead".to_string()));
        }
        Ok(())
    }

    async fn pre_release_handler(&self) -> Result<()> {
        self.pre_release_calls.fetch_add(1, Ordering::SeqCst);
        self.events.push(format!("{} pre_release", self.name));
        Ok(())
    }
}

pub struct RecordingStatusWatcher {
    name: String,
    events: EventLog,
}

impl RecordingStatusWatcher {
    fn new(
        name: &str,
        events: EventLog,
    ) -> Self {
        Self {
            name: name.to_string(),
            events,
        }
    }
}

#[async_trait]
impl StatusWatcher for RecordingStatusWatcher {
    async fn init(&self) -> Result<()> {
        self.events.push(format!("{} status_init", self.name));
        Ok(())
    }

    async fn shut_down(&self) -> Result<()> {
        self.events.push(format!("{} status_shut_down", self.name));
        Ok(())
    }
}
