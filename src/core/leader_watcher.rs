use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::time::sleep_until;
use tokio::time::Duration;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::Completion;
use super::ElectionState;
use super::LeaderEvent;
use super::Operation;
use super::Phase;
use super::ReleaseReason;
use super::TimerAction;
use super::TimerTask;
use crate::alias::HOF;
use crate::alias::LOF;
use crate::alias::NOF;
use crate::alias::SOF;
use crate::constants::LOCK_COOKIE_PREFIX;
use crate::metrics::HEARTBEATS_SENT;
use crate::metrics::IS_LEADER;
use crate::metrics::LEADER_LOCK_BREAKS;
use crate::metrics::LEADER_TRANSITIONS;
use crate::metrics::NOTIFY_FAILURES;
use crate::metrics::remove_instance_metrics;
use crate::ElectionError;
use crate::Error;
use crate::InboundNotify;
use crate::LeaderWatcherConfig;
use crate::Listener;
use crate::LockDriver;
use crate::Locker;
use crate::NotificationChannel;
use crate::NotifierId;
use crate::NotifyId;
use crate::Payload;
use crate::Result;
use crate::StatusWatcher;
use crate::TypeConfig;
use crate::WatchHandle;

/// Handle to one participant of a leader election.
///
/// Exactly one participant among all watchers of the shared object holds the
/// leader lock at a time. The leader broadcasts heartbeats; secondaries break
/// the lock of a leader that goes silent for
/// `heartbeat_interval * max_missed_heartbeats` and race for it when the
/// leader announces a clean release.
///
/// The election itself runs on a tokio task spawned by [`LeaderWatcher::new`];
/// dropping every handle stops it.
///
/// # Example
/// ```ignore
/// let watcher = LeaderWatcher::<MyTypes>::new(config, lock, channel, status, listener)?;
/// watcher.init().await?;
/// // ... listener.post_acquire_handler() runs once this process leads
/// watcher.shut_down().await?;
/// ```
pub struct LeaderWatcher<T>
where T: TypeConfig
{
    instance_id: String,
    state: Arc<Mutex<ElectionState>>,
    event_tx: mpsc::UnboundedSender<LeaderEvent>,
    leader_rx: watch::Receiver<bool>,
    _phantom: PhantomData<T>,
}

impl<T> Clone for LeaderWatcher<T>
where T: TypeConfig
{
    fn clone(&self) -> Self {
        Self {
            instance_id: self.instance_id.clone(),
            state: self.state.clone(),
            event_tx: self.event_tx.clone(),
            leader_rx: self.leader_rx.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> LeaderWatcher<T>
where T: TypeConfig
{
    /// Validates `config` and spawns the election loop on the current tokio
    /// runtime. Nothing touches the collaborators until [`Self::init`].
    pub fn new(
        config: LeaderWatcherConfig,
        lock_driver: Arc<LOF<T>>,
        channel: Arc<NOF<T>>,
        status_watcher: Arc<SOF<T>>,
        listener: Arc<HOF<T>>,
    ) -> Result<Self> {
        let config = Arc::new(config.validate()?);
        let instance_id = nanoid::nanoid!();
        let state = Arc::new(Mutex::new(ElectionState::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (leader_tx, leader_rx) = watch::channel(false);

        let election = ElectionLoop::<T>::new(
            instance_id.clone(),
            config,
            state.clone(),
            lock_driver,
            channel,
            status_watcher,
            listener,
            event_rx,
            leader_tx,
        );
        tokio::spawn(election.run());

        Ok(Self {
            instance_id,
            state,
            event_tx,
            leader_rx,
            _phantom: PhantomData,
        })
    }

    /// Creates the leader object, registers the watch and starts competing
    /// for the lock.
    ///
    /// Resolves once the watch is registered; losing the lock to another
    /// participant is not an error.
    pub async fn init(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.init_with(tx);
        rx.await.map_err(|_| Error::from(ElectionError::EngineStopped))?
    }

    /// Non-blocking [`Self::init`]: `on_finish` receives the result.
    pub fn init_with(
        &self,
        on_finish: oneshot::Sender<Result<()>>,
    ) {
        if let Err(mpsc::error::SendError(event)) = self.event_tx.send(LeaderEvent::Init(on_finish)) {
            Self::reject(event);
        }
    }

    /// Gives up leadership if held (listener pre-release first), then
    /// unregisters the watch. Succeeds immediately when not initialized.
    pub async fn shut_down(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shut_down_with(tx);
        rx.await.map_err(|_| Error::from(ElectionError::EngineStopped))?
    }

    /// Non-blocking [`Self::shut_down`]: `on_finish` receives the result.
    pub fn shut_down_with(
        &self,
        on_finish: oneshot::Sender<Result<()>>,
    ) {
        if let Err(mpsc::error::SendError(event)) = self.event_tx.send(LeaderEvent::ShutDown(on_finish)) {
            Self::reject(event);
        }
    }

    /// Voluntarily hands leadership over. Peers are told through a
    /// `LockReleased` broadcast; this participant competes again after one
    /// acquisition retry delay. No-op when not leader.
    pub fn release_leader(&self) {
        if self.event_tx.send(LeaderEvent::ReleaseLeader).is_err() {
            warn!("[{}] election loop stopped, cannot release leader", self.instance_id);
        }
    }

    /// True while the leader lock is owned by this participant and not being
    /// released.
    pub fn is_leader(&self) -> bool {
        self.state.lock().is_leader()
    }

    /// Fires `true` once promotion completed and `false` as soon as the
    /// leader lock starts being released.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader_rx.clone()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn acquire_attempts(&self) -> u32 {
        self.state.lock().acquire_attempts
    }

    /// Last known leader lock holder, if any
    pub fn current_locker(&self) -> Option<Locker> {
        let st = self.state.lock();
        st.locker.clone()
    }

    /// Our identity on the notification channel, once the watch is registered
    pub fn notifier_id(&self) -> Option<NotifierId> {
        self.state.lock().watch_handle.as_ref().map(|handle| handle.notifier_id)
    }

    fn reject(event: LeaderEvent) {
        match event {
            LeaderEvent::Init(on_finish) | LeaderEvent::ShutDown(on_finish) => {
                let _ = on_finish.send(Err(ElectionError::EngineStopped.into()));
            }
            LeaderEvent::ReleaseLeader => {}
        }
    }
}

/// Drives one election. Every collaborator call runs on its own task and
/// reports back as a [`Completion`]; the state mutex is never held across
/// such a call.
pub(crate) struct ElectionLoop<T>
where T: TypeConfig
{
    instance_id: String,
    config: Arc<LeaderWatcherConfig>,
    state: Arc<Mutex<ElectionState>>,

    lock_driver: Arc<LOF<T>>,
    channel: Arc<NOF<T>>,
    status_watcher: Arc<SOF<T>>,
    listener: Arc<HOF<T>>,

    // Requests from handles
    event_rx: mpsc::UnboundedReceiver<LeaderEvent>,

    // Watch deliveries
    notify_tx: mpsc::UnboundedSender<InboundNotify>,
    notify_rx: mpsc::UnboundedReceiver<InboundNotify>,

    // Operation results
    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,

    leader_tx: watch::Sender<bool>,
}

impl<T> ElectionLoop<T>
where T: TypeConfig
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        instance_id: String,
        config: Arc<LeaderWatcherConfig>,
        state: Arc<Mutex<ElectionState>>,
        lock_driver: Arc<LOF<T>>,
        channel: Arc<NOF<T>>,
        status_watcher: Arc<SOF<T>>,
        listener: Arc<HOF<T>>,
        event_rx: mpsc::UnboundedReceiver<LeaderEvent>,
        leader_tx: watch::Sender<bool>,
    ) -> Self {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            instance_id,
            config,
            state,
            lock_driver,
            channel,
            status_watcher,
            listener,
            event_rx,
            notify_tx,
            notify_rx,
            completion_tx,
            completion_rx,
            leader_tx,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("[{}] election loop started", self.instance_id);

        loop {
            let deadline = self.state.lock().timer_task.as_ref().map(TimerTask::next_deadline);
            let tick = async move {
                match deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => futures::future::pending::<()>().await,
                }
            };

            tokio::select! {
                // Use biased to ensure branch order
                biased;
                // P0: operation results move the state machine forward
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }
                // P1: requests; all handles dropped stops the election
                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => break,
                    }
                }
                // P2: inbound notifications
                Some(notify) = self.notify_rx.recv() => {
                    self.handle_notify(notify);
                }
                // P3: the single delayed task
                _ = tick => {
                    self.handle_timer();
                }
            }

            self.publish_leadership();
        }

        if self.state.lock().leader_lock.is_owned() {
            warn!("[{}] election loop stopped while owning the leader lock", self.instance_id);
        } else {
            debug!("[{}] election loop stopped", self.instance_id);
        }
        remove_instance_metrics(&self.instance_id);
    }

    fn publish_leadership(&self) {
        let is_leader = self.state.lock().leader_lock.is_locked();
        IS_LEADER.with_label_values(&[self.instance_id.as_str()]).set(is_leader as i64);
        self.leader_tx.send_if_modified(|current| {
            if *current == is_leader {
                return false;
            }
            *current = is_leader;
            true
        });
    }

    //-----------------------------------------------------------
    // Dispatch

    fn handle_event(
        &self,
        event: LeaderEvent,
    ) {
        let state = self.state.clone();
        let mut st = state.lock();
        match event {
            LeaderEvent::Init(on_finish) => self.init(&mut st, on_finish),
            LeaderEvent::ShutDown(on_finish) => self.shut_down(&mut st, on_finish),
            LeaderEvent::ReleaseLeader => self.release_leader(&mut st),
        }
    }

    fn handle_completion(
        &self,
        completion: Completion,
    ) {
        let state = self.state.clone();
        let mut st = state.lock();

        let operation = completion.operation();
        if st.in_flight != Some(operation) {
            warn!(
                "[{}] unexpected {:?} completion, in flight: {:?}",
                self.instance_id, operation, st.in_flight
            );
        }
        st.in_flight = None;
        trace!("[{}] {:?} completed", self.instance_id, operation);

        match completion {
            Completion::CreateObject(r) => self.handle_create_leader_object(&mut st, r),
            Completion::RegisterWatch(r) => self.handle_register_watch(&mut st, r),
            Completion::AcquireLock(r) => self.handle_acquire_leader_lock(&mut st, r),
            Completion::GetLocker(r) => self.handle_get_locker(&mut st, r),
            Completion::BreakLock(r) => self.handle_break_leader_lock(&mut st, r),
            Completion::InitStatusWatcher(r) => self.handle_init_status_watcher(&mut st, r),
            Completion::NotifyListenerPostAcquire(r) => self.handle_notify_listener_post_acquire(&mut st, r),
            Completion::NotifyLockAcquired(r) => self.handle_notify_lock_acquired(&mut st, r),
            Completion::NotifyHeartbeat(r) => self.handle_notify_heartbeat(&mut st, r),
            Completion::NotifyListenerPreRelease(r) => self.handle_notify_listener_pre_release(&mut st, r),
            Completion::ShutDownStatusWatcher(r) => self.handle_shut_down_status_watcher(&mut st, r),
            Completion::ReleaseLock(r) => self.handle_release_leader_lock(&mut st, r),
            Completion::NotifyLockReleased(r) => self.handle_notify_lock_released(&mut st, r),
            Completion::UnregisterWatch(r) => self.handle_unregister_watch(&mut st, r),
        }
    }

    fn handle_timer(&self) {
        let state = self.state.clone();
        let mut st = state.lock();

        let Some(task) = st.cancel_timer_task() else {
            return;
        };
        if !task.is_expired() {
            trace!("[{}] {} woke {:?} early", self.instance_id, task.name, task.remaining());
            st.schedule_timer_task(task);
            return;
        }
        if task.leader != st.is_leader() {
            debug!("[{}] skipping {}: leadership changed", self.instance_id, task.name);
            return;
        }
        if st.shutting_down || st.in_flight.is_some() {
            debug!(
                "[{}] skipping {}: in flight {:?}, shutting down {}",
                self.instance_id, task.name, st.in_flight, st.shutting_down
            );
            return;
        }

        debug!("[{}] timer task {} fired", self.instance_id, task.name);
        match task.action {
            TimerAction::AcquireLeaderLock => self.acquire_leader_lock(&mut st, false),
            TimerAction::GetLocker => self.get_locker(&mut st, false),
            TimerAction::BreakLeaderLock => self.break_leader_lock(&mut st),
            TimerAction::NotifyHeartbeat => self.notify_heartbeat(&mut st),
        }
    }

    //-----------------------------------------------------------
    // Helpers

    fn spawn_op(
        &self,
        st: &mut ElectionState,
        operation: Operation,
        task: BoxFuture<'static, Completion>,
    ) {
        if let Some(previous) = st.in_flight {
            error!(
                "[{}] {:?} started while {:?} is still in flight",
                self.instance_id, operation, previous
            );
        }
        if let Some(timer) = st.cancel_timer_task() {
            trace!("[{}] canceled {}", self.instance_id, timer.name);
        }
        st.in_flight = Some(operation);

        let completion_tx = self.completion_tx.clone();
        let instance_id = self.instance_id.clone();
        tokio::spawn(async move {
            let completion = task.await;
            if completion_tx.send(completion).is_err() {
                debug!("[{}] election loop gone, dropping {:?} completion", instance_id, operation);
            }
        });
    }

    fn schedule_timer_task(
        &self,
        st: &mut ElectionState,
        name: &'static str,
        delay: Duration,
        leader: bool,
        action: TimerAction,
    ) {
        if st.shutting_down {
            debug!("[{}] not scheduling {} while shutting down", self.instance_id, name);
            return;
        }
        debug!("[{}] scheduling {} in {:?}", self.instance_id, name, delay);
        if let Some(previous) = st.schedule_timer_task(TimerTask::new(name, delay, leader, action)) {
            trace!("[{}] {} replaced {}", self.instance_id, name, previous.name);
        }
    }

    fn schedule_acquire_leader_lock(
        &self,
        st: &mut ElectionState,
    ) {
        let delay = self.config.election.acquire_retry_delay(st.acquire_attempts);
        self.schedule_timer_task(st, "acquire leader lock", delay, false, TimerAction::AcquireLeaderLock);
    }

    fn schedule_no_heartbeat_timeout(
        &self,
        st: &mut ElectionState,
    ) {
        let delay = self.config.election.no_heartbeat_timeout();
        self.schedule_timer_task(st, "no heartbeat", delay, false, TimerAction::BreakLeaderLock);
    }

    fn schedule_heartbeat(
        &self,
        st: &mut ElectionState,
    ) {
        let delay = self.config.election.heartbeat_interval();
        self.schedule_timer_task(st, "heartbeat", delay, true, TimerAction::NotifyHeartbeat);
    }

    fn broadcast(
        &self,
        st: &mut ElectionState,
        operation: Operation,
        payload: Payload,
        completion: fn(Result<()>) -> Completion,
    ) {
        let channel = self.channel.clone();
        let oid = self.config.object_name.clone();
        self.spawn_op(
            st,
            operation,
            async move {
                let result = match payload.encode() {
                    Ok(bytes) => channel.broadcast(&oid, bytes).await,
                    Err(e) => Err(e),
                };
                completion(result)
            }
            .boxed(),
        );
    }

    fn count_notify_failure(
        &self,
        op: &str,
    ) {
        NOTIFY_FAILURES.with_label_values(&[self.instance_id.as_str(), op]).inc();
    }

    /// Honors a shut down or release request that arrived mid-promotion
    fn divert_release(
        &self,
        st: &mut ElectionState,
    ) -> bool {
        let reason = if st.shutting_down {
            ReleaseReason::ShutDown
        } else if st.release_pending {
            ReleaseReason::Requested
        } else {
            return false;
        };
        self.release_leader_lock(st, reason);
        true
    }

    //-----------------------------------------------------------
    // Init

    fn init(
        &self,
        st: &mut ElectionState,
        on_finish: oneshot::Sender<Result<()>>,
    ) {
        if st.shutting_down {
            let _ = on_finish.send(Err(ElectionError::ShuttingDown.into()));
            return;
        }
        if st.phase != Phase::Uninitialized {
            warn!("[{}] init called while {:?}", self.instance_id, st.phase);
            let _ = on_finish.send(Err(ElectionError::AlreadyInitialized.into()));
            return;
        }

        info!(
            "[{}] initializing leader watcher on {}",
            self.instance_id, self.config.object_name
        );
        st.leader_lock.reset();
        st.on_finish = Some(on_finish);
        self.create_leader_object(st);
    }

    fn create_leader_object(
        &self,
        st: &mut ElectionState,
    ) {
        st.phase = Phase::CreatingObject;
        let channel = self.channel.clone();
        let oid = self.config.object_name.clone();
        self.spawn_op(
            st,
            Operation::CreateObject,
            async move { Completion::CreateObject(channel.create_object(&oid).await) }.boxed(),
        );
    }

    fn handle_create_leader_object(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = r {
            error!(
                "[{}] error creating {} object: {:?}",
                self.instance_id, self.config.object_name, e
            );
            self.fail_init(st, e);
            return;
        }
        if st.shutting_down {
            self.finish_shut_down(st);
            return;
        }
        self.register_watch(st);
    }

    fn register_watch(
        &self,
        st: &mut ElectionState,
    ) {
        st.phase = Phase::RegisteringWatch;
        let channel = self.channel.clone();
        let oid = self.config.object_name.clone();
        let sink = self.notify_tx.clone();
        self.spawn_op(
            st,
            Operation::RegisterWatch,
            async move { Completion::RegisterWatch(channel.register_watch(&oid, sink).await) }.boxed(),
        );
    }

    fn handle_register_watch(
        &self,
        st: &mut ElectionState,
        r: Result<WatchHandle>,
    ) {
        let handle = match r {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    "[{}] error registering leader watcher for {} object: {:?}",
                    self.instance_id, self.config.object_name, e
                );
                self.fail_init(st, e);
                return;
            }
        };

        debug!(
            "[{}] registered watch {} as notifier {}",
            self.instance_id, handle.watch_id, handle.notifier_id
        );
        st.owner = Some(Locker::new(
            handle.notifier_id,
            format!("{} {}", LOCK_COOKIE_PREFIX, handle.watch_id),
            self.instance_id.clone(),
        ));
        st.watch_handle = Some(handle);
        if let Some(on_finish) = st.on_finish.take() {
            let _ = on_finish.send(Ok(()));
        }

        if st.shutting_down {
            self.shut_down_leader_lock(st);
            return;
        }
        self.acquire_leader_lock(st, true);
    }

    fn fail_init(
        &self,
        st: &mut ElectionState,
        e: Error,
    ) {
        st.phase = Phase::Uninitialized;
        if let Some(on_finish) = st.on_finish.take() {
            let _ = on_finish.send(Err(e));
        }
        if st.shutting_down {
            self.finish_shut_down(st);
        }
    }

    //-----------------------------------------------------------
    // Acquire

    fn acquire_leader_lock(
        &self,
        st: &mut ElectionState,
        reset_attempt_counter: bool,
    ) {
        if reset_attempt_counter {
            st.acquire_attempts = 0;
        }
        st.lock_released_pending = false;
        let Some(owner) = st.owner.clone() else {
            error!("[{}] cannot acquire leader lock without a watch", self.instance_id);
            return;
        };
        if let Err(e) = st.leader_lock.start_acquire() {
            warn!("[{}] cannot acquire leader lock: {:?}", self.instance_id, e);
            return;
        }

        debug!(
            "[{}] acquiring leader lock, acquire_attempts={}",
            self.instance_id, st.acquire_attempts
        );
        st.phase = Phase::AcquiringLock;
        let lock_driver = self.lock_driver.clone();
        self.spawn_op(
            st,
            Operation::AcquireLock,
            async move { Completion::AcquireLock(lock_driver.try_acquire(&owner).await) }.boxed(),
        );
    }

    fn handle_acquire_leader_lock(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = st.leader_lock.handle_acquire(r.is_ok()) {
            error!("[{}] {:?}", self.instance_id, e);
        }

        let e = match r {
            Ok(()) => {
                info!("[{}] acquired leader lock", self.instance_id);
                st.acquire_attempts = 0;
                st.locker = st.owner.clone();
                if st.shutting_down {
                    self.release_leader_lock(st, ReleaseReason::ShutDown);
                    return;
                }
                self.init_status_watcher(st);
                return;
            }
            Err(e) => e,
        };

        if st.shutting_down {
            self.shut_down_leader_lock(st);
            return;
        }

        st.acquire_attempts += 1;
        if self.take_lock_released(st) {
            return;
        }
        if !e.is_contention() {
            error!("[{}] error acquiring leader lock: {:?}", self.instance_id, e);
            st.phase = Phase::NotLeader;
            self.schedule_acquire_leader_lock(st);
            return;
        }

        debug!(
            "[{}] leader lock already held, acquire_attempts={}",
            self.instance_id, st.acquire_attempts
        );
        if st.acquire_attempts > self.config.election.max_acquire_attempts_before_break {
            info!(
                "[{}] breaking leader lock after {} failed attempts",
                self.instance_id, st.acquire_attempts
            );
            self.break_leader_lock(st);
        } else {
            self.get_locker(st, false);
        }
    }

    fn get_locker(
        &self,
        st: &mut ElectionState,
        break_after: bool,
    ) {
        st.phase = Phase::GettingLocker;
        st.break_after_get_locker = break_after;
        let lock_driver = self.lock_driver.clone();
        self.spawn_op(
            st,
            Operation::GetLocker,
            async move { Completion::GetLocker(lock_driver.get_locker().await) }.boxed(),
        );
    }

    fn handle_get_locker(
        &self,
        st: &mut ElectionState,
        r: Result<Option<Locker>>,
    ) {
        let break_after = std::mem::take(&mut st.break_after_get_locker);
        if st.shutting_down {
            self.shut_down_leader_lock(st);
            return;
        }
        // the answer may predate the release
        if self.take_lock_released(st) {
            return;
        }

        let locker = match r {
            Ok(Some(locker)) => locker,
            Err(e) if !e.is_not_found() => {
                warn!("[{}] error retrieving leader locker: {:?}", self.instance_id, e);
                st.phase = Phase::NotLeader;
                let delay = self.config.election.heartbeat_interval();
                self.schedule_timer_task(st, "get locker", delay, false, TimerAction::GetLocker);
                return;
            }
            _ => {
                debug!("[{}] leader lock is free, retrying acquisition", self.instance_id);
                st.locker = None;
                self.acquire_leader_lock(st, true);
                return;
            }
        };

        if st.locker.as_ref() != Some(&locker) {
            info!("[{}] leader lock held by {}", self.instance_id, locker);
        }
        st.locker = Some(locker);
        st.phase = Phase::NotLeader;

        if break_after {
            self.break_leader_lock(st);
        } else {
            self.schedule_no_heartbeat_timeout(st);
        }
    }

    fn break_leader_lock(
        &self,
        st: &mut ElectionState,
    ) {
        if st.shutting_down || st.leader_lock.is_shutdown() {
            return;
        }
        let Some(locker) = st.locker.clone().filter(Locker::is_valid) else {
            debug!("[{}] leader lock cookie unknown, fetching locker first", self.instance_id);
            self.get_locker(st, true);
            return;
        };

        let fence = self.config.fencing.blacklist_on_break_lock;
        let fence_expiry = self.config.fencing.blacklist_expire();
        info!(
            "[{}] breaking leader lock held by {} (fence={})",
            self.instance_id, locker, fence
        );

        st.phase = Phase::BreakingLock;
        let lock_driver = self.lock_driver.clone();
        self.spawn_op(
            st,
            Operation::BreakLock,
            async move { Completion::BreakLock(lock_driver.break_lock(&locker, fence, fence_expiry).await) }.boxed(),
        );
    }

    fn handle_break_leader_lock(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if st.shutting_down {
            self.shut_down_leader_lock(st);
            return;
        }

        match r {
            Ok(()) => {
                LEADER_LOCK_BREAKS.with_label_values(&[self.instance_id.as_str()]).inc();
                if let Some(locker) = &st.locker {
                    info!("[{}] broke leader lock held by {}", self.instance_id, locker);
                }
            }
            Err(e) if e.is_not_found() || e.is_holder_changed() => {
                debug!("[{}] leader lock holder already gone: {:?}", self.instance_id, e);
            }
            Err(e) => {
                error!("[{}] error breaking leader lock: {:?}", self.instance_id, e);
                if self.take_lock_released(st) {
                    return;
                }
                st.phase = Phase::NotLeader;
                self.schedule_acquire_leader_lock(st);
                return;
            }
        }

        st.locker = None;
        self.acquire_leader_lock(st, true);
    }

    //-----------------------------------------------------------
    // Post-acquire

    fn init_status_watcher(
        &self,
        st: &mut ElectionState,
    ) {
        st.phase = Phase::InitializingStatusWatcher;
        let status_watcher = self.status_watcher.clone();
        self.spawn_op(
            st,
            Operation::InitStatusWatcher,
            async move { Completion::InitStatusWatcher(status_watcher.init().await) }.boxed(),
        );
    }

    fn handle_init_status_watcher(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = r {
            error!("[{}] error initializing status watcher: {:?}", self.instance_id, e);
            self.release_leader_lock(st, ReleaseReason::Unwind);
            return;
        }

        st.status_watcher_ready = true;
        if self.divert_release(st) {
            return;
        }
        self.notify_listener_post_acquire(st);
    }

    fn notify_listener_post_acquire(
        &self,
        st: &mut ElectionState,
    ) {
        st.phase = Phase::NotifyingListenersPostAcquire;
        let listener = self.listener.clone();
        self.spawn_op(
            st,
            Operation::NotifyListenerPostAcquire,
            async move { Completion::NotifyListenerPostAcquire(listener.post_acquire_handler().await) }.boxed(),
        );
    }

    fn handle_notify_listener_post_acquire(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = r {
            warn!("[{}] listener rejected leadership: {:?}", self.instance_id, e);
            self.release_leader_lock(st, ReleaseReason::Unwind);
            return;
        }

        st.listener_notified = true;
        if self.divert_release(st) {
            return;
        }
        self.notify_lock_acquired(st);
    }

    fn notify_lock_acquired(
        &self,
        st: &mut ElectionState,
    ) {
        st.phase = Phase::NotifyingLockAcquired;
        self.broadcast(
            st,
            Operation::NotifyLockAcquired,
            Payload::LockAcquired,
            Completion::NotifyLockAcquired,
        );
    }

    fn handle_notify_lock_acquired(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = r {
            warn!("[{}] error notifying lock acquired: {:?}", self.instance_id, e);
            self.count_notify_failure("lock_acquired");
        }
        if let Err(e) = st.leader_lock.mark_locked() {
            error!("[{}] {:?}", self.instance_id, e);
        }

        st.phase = Phase::Leader;
        info!("[{}] became leader", self.instance_id);
        LEADER_TRANSITIONS
            .with_label_values(&[self.instance_id.as_str(), "acquired"])
            .inc();

        if self.divert_release(st) {
            return;
        }
        self.schedule_heartbeat(st);
    }

    fn notify_heartbeat(
        &self,
        st: &mut ElectionState,
    ) {
        if !st.is_leader() {
            return;
        }
        self.broadcast(
            st,
            Operation::NotifyHeartbeat,
            Payload::Heartbeat,
            Completion::NotifyHeartbeat,
        );
    }

    fn handle_notify_heartbeat(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        match r {
            Ok(()) => {
                HEARTBEATS_SENT.with_label_values(&[self.instance_id.as_str()]).inc();
            }
            Err(e) => {
                warn!("[{}] error sending heartbeat: {:?}", self.instance_id, e);
                self.count_notify_failure("heartbeat");
            }
        }

        if self.divert_release(st) {
            return;
        }
        if st.is_leader() {
            self.schedule_heartbeat(st);
        }
    }

    //-----------------------------------------------------------
    // Release

    fn release_leader(
        &self,
        st: &mut ElectionState,
    ) {
        if !st.is_leader() {
            debug!("[{}] not leader, nothing to release", self.instance_id);
            return;
        }
        if st.release_pending {
            return;
        }
        if let Some(operation) = st.in_flight {
            debug!("[{}] deferring release until {:?} completes", self.instance_id, operation);
            st.release_pending = true;
            return;
        }
        self.release_leader_lock(st, ReleaseReason::Requested);
    }

    fn release_leader_lock(
        &self,
        st: &mut ElectionState,
        reason: ReleaseReason,
    ) {
        let reason = if st.shutting_down {
            ReleaseReason::ShutDown
        } else {
            reason
        };
        st.release_pending = false;
        if st.release_reason != Some(ReleaseReason::ShutDown) {
            st.release_reason = Some(reason);
        }
        st.cancel_timer_task();
        if let Err(e) = st.leader_lock.start_release(reason == ReleaseReason::ShutDown) {
            error!("[{}] {:?}", self.instance_id, e);
        }

        debug!("[{}] releasing leader lock: {:?}", self.instance_id, reason);
        self.handle_pre_release_leader_lock(st);
    }

    /// Listener lets go first, then the status watcher stops, then the lock
    /// is released.
    fn handle_pre_release_leader_lock(
        &self,
        st: &mut ElectionState,
    ) {
        if !st.listener_notified {
            self.shut_down_status_watcher(st);
            return;
        }

        st.phase = Phase::NotifyingListenersPreRelease;
        let listener = self.listener.clone();
        self.spawn_op(
            st,
            Operation::NotifyListenerPreRelease,
            async move { Completion::NotifyListenerPreRelease(listener.pre_release_handler().await) }.boxed(),
        );
    }

    fn handle_notify_listener_pre_release(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = r {
            error!("[{}] error notifying listener of release: {:?}", self.instance_id, e);
            if st.shutting_down {
                st.record_teardown_error(e.to_string());
            }
        }
        st.listener_notified = false;
        self.shut_down_status_watcher(st);
    }

    fn shut_down_status_watcher(
        &self,
        st: &mut ElectionState,
    ) {
        if !st.status_watcher_ready {
            self.unlock_leader_lock(st);
            return;
        }

        st.phase = Phase::ShuttingDownStatusWatcher;
        let status_watcher = self.status_watcher.clone();
        self.spawn_op(
            st,
            Operation::ShutDownStatusWatcher,
            async move { Completion::ShutDownStatusWatcher(status_watcher.shut_down().await) }.boxed(),
        );
    }

    fn handle_shut_down_status_watcher(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = r {
            error!("[{}] error shutting down status watcher: {:?}", self.instance_id, e);
            if st.shutting_down {
                st.record_teardown_error(e.to_string());
            }
        }
        st.status_watcher_ready = false;
        self.unlock_leader_lock(st);
    }

    fn unlock_leader_lock(
        &self,
        st: &mut ElectionState,
    ) {
        if let Err(e) = st.leader_lock.start_unlock() {
            error!("[{}] {:?}", self.instance_id, e);
        }

        st.phase = Phase::ReleasingLock;
        let owner = st.owner.clone().unwrap_or_default();
        let lock_driver = self.lock_driver.clone();
        self.spawn_op(
            st,
            Operation::ReleaseLock,
            async move { Completion::ReleaseLock(lock_driver.release(&owner).await) }.boxed(),
        );
    }

    fn handle_release_leader_lock(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = r {
            error!("[{}] error releasing leader lock: {:?}", self.instance_id, e);
            if st.shutting_down {
                st.record_teardown_error(e.to_string());
            }
        }
        // the lock is treated as gone either way; fencing covers a stale one
        if let Err(e) = st.leader_lock.handle_release() {
            error!("[{}] {:?}", self.instance_id, e);
        }

        info!("[{}] released leader lock", self.instance_id);
        LEADER_TRANSITIONS
            .with_label_values(&[self.instance_id.as_str(), "released"])
            .inc();
        st.locker = None;
        self.handle_post_release_leader_lock(st);
    }

    fn handle_post_release_leader_lock(
        &self,
        st: &mut ElectionState,
    ) {
        st.phase = Phase::NotifyingLockReleased;
        self.broadcast(
            st,
            Operation::NotifyLockReleased,
            Payload::LockReleased,
            Completion::NotifyLockReleased,
        );
    }

    fn handle_notify_lock_released(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = r {
            warn!("[{}] error notifying lock released: {:?}", self.instance_id, e);
            self.count_notify_failure("lock_released");
        }

        let reason = st.release_reason.take();
        st.release_pending = false;
        if st.shutting_down {
            if let Err(e) = st.leader_lock.shut_down() {
                error!("[{}] {:?}", self.instance_id, e);
            }
            self.unregister_watch(st);
            return;
        }

        st.phase = Phase::NotLeader;
        if reason == Some(ReleaseReason::Unwind) {
            st.acquire_attempts += 1;
        }
        self.schedule_acquire_leader_lock(st);
    }

    //-----------------------------------------------------------
    // Shut down

    fn shut_down(
        &self,
        st: &mut ElectionState,
        on_finish: oneshot::Sender<Result<()>>,
    ) {
        if st.phase == Phase::Uninitialized && st.in_flight.is_none() {
            debug!("[{}] already uninitialized", self.instance_id);
            let _ = on_finish.send(Ok(()));
            return;
        }

        st.on_shut_down_finish.push(on_finish);
        if st.shutting_down {
            debug!("[{}] shut down already in progress", self.instance_id);
            return;
        }

        info!("[{}] shutting down leader watcher", self.instance_id);
        st.shutting_down = true;
        st.cancel_timer_task();
        if let Some(operation) = st.in_flight {
            debug!("[{}] deferring shut down until {:?} completes", self.instance_id, operation);
            return;
        }
        self.shut_down_leader_lock(st);
    }

    fn shut_down_leader_lock(
        &self,
        st: &mut ElectionState,
    ) {
        st.phase = Phase::ShuttingDownLeaderLock;
        st.cancel_timer_task();
        if st.leader_lock.is_owned() {
            self.release_leader_lock(st, ReleaseReason::ShutDown);
            return;
        }

        if let Err(e) = st.leader_lock.shut_down() {
            error!("[{}] {:?}", self.instance_id, e);
        }
        self.unregister_watch(st);
    }

    fn unregister_watch(
        &self,
        st: &mut ElectionState,
    ) {
        let Some(handle) = st.watch_handle.clone() else {
            self.finish_shut_down(st);
            return;
        };

        st.phase = Phase::UnregisteringWatch;
        let channel = self.channel.clone();
        self.spawn_op(
            st,
            Operation::UnregisterWatch,
            async move { Completion::UnregisterWatch(channel.unregister_watch(&handle).await) }.boxed(),
        );
    }

    fn handle_unregister_watch(
        &self,
        st: &mut ElectionState,
        r: Result<()>,
    ) {
        if let Err(e) = r {
            error!("[{}] error unregistering leader watcher: {:?}", self.instance_id, e);
            st.record_teardown_error(e.to_string());
        }
        self.finish_shut_down(st);
    }

    fn finish_shut_down(
        &self,
        st: &mut ElectionState,
    ) {
        if !st.leader_lock.is_shutdown() {
            if let Err(e) = st.leader_lock.shut_down() {
                error!("[{}] {:?}", self.instance_id, e);
            }
        }
        st.reset_session();

        if let Some(on_finish) = st.on_finish.take() {
            let _ = on_finish.send(Err(ElectionError::ShuttingDown.into()));
        }

        let teardown_error = st.teardown_error.take();
        info!("[{}] leader watcher shut down", self.instance_id);
        for on_finish in st.on_shut_down_finish.drain(..) {
            let result = match &teardown_error {
                Some(reason) => Err(ElectionError::ShutDownFailed(reason.clone()).into()),
                None => Ok(()),
            };
            let _ = on_finish.send(result);
        }
    }

    //-----------------------------------------------------------
    // Notifications

    fn handle_notify(
        &self,
        notify: InboundNotify,
    ) {
        let InboundNotify {
            notify_id,
            notifier_id,
            payload,
        } = notify;

        {
            let state = self.state.clone();
            let mut st = state.lock();
            let own_notifier_id = st.watch_handle.as_ref().map(|handle| handle.notifier_id);

            if own_notifier_id == Some(notifier_id) {
                trace!("[{}] our own notification, ignoring", self.instance_id);
            } else {
                match Payload::decode(&payload) {
                    Ok(Payload::Heartbeat) => self.handle_heartbeat(&mut st, notifier_id),
                    Ok(Payload::LockAcquired) => self.handle_lock_acquired(&mut st, notifier_id),
                    Ok(Payload::LockReleased) => self.handle_lock_released(&mut st, notifier_id),
                    Ok(Payload::Unknown(op)) => {
                        debug!("[{}] unknown notification op {}, ignoring", self.instance_id, op);
                    }
                    Err(e) => {
                        error!(
                            "[{}] error decoding notification from {}: {:?}",
                            self.instance_id, notifier_id, e
                        );
                    }
                }
            }
        }

        self.acknowledge_notify(notify_id);
    }

    fn acknowledge_notify(
        &self,
        notify_id: NotifyId,
    ) {
        let channel = self.channel.clone();
        let instance_id = self.instance_id.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.ack(notify_id).await {
                warn!("[{}] error acknowledging notification {}: {:?}", instance_id, notify_id, e);
                NOTIFY_FAILURES.with_label_values(&[instance_id.as_str(), "ack"]).inc();
            }
        });
    }

    fn is_watching(
        &self,
        st: &ElectionState,
    ) -> bool {
        st.watch_handle.is_some() && !st.shutting_down
    }

    fn handle_heartbeat(
        &self,
        st: &mut ElectionState,
        notifier_id: NotifierId,
    ) {
        if st.is_leader() {
            debug!(
                "[{}] got another leader heartbeat from {}, ignoring",
                self.instance_id, notifier_id
            );
            return;
        }
        if self.is_watching(st) {
            self.note_leader_alive(st, notifier_id);
        }
    }

    fn handle_lock_acquired(
        &self,
        st: &mut ElectionState,
        notifier_id: NotifierId,
    ) {
        if st.is_leader() {
            debug!(
                "[{}] got another leader lock_acquired from {}, ignoring",
                self.instance_id, notifier_id
            );
            return;
        }
        if self.is_watching(st) {
            self.note_leader_alive(st, notifier_id);
        }
    }

    /// Another participant proved it leads: back off and restart the
    /// no-heartbeat countdown.
    fn note_leader_alive(
        &self,
        st: &mut ElectionState,
        notifier_id: NotifierId,
    ) {
        if st.locker.as_ref().map(|locker| locker.entity) != Some(notifier_id) {
            debug!("[{}] leader is now notifier {}", self.instance_id, notifier_id);
            st.locker = Some(Locker::from_notifier(notifier_id));
        }
        st.acquire_attempts = 0;

        if st.in_flight.is_none() && st.phase == Phase::NotLeader {
            self.schedule_no_heartbeat_timeout(st);
        }
    }

    fn handle_lock_released(
        &self,
        st: &mut ElectionState,
        notifier_id: NotifierId,
    ) {
        if st.is_leader() {
            debug!(
                "[{}] got another leader lock_released from {}, ignoring",
                self.instance_id, notifier_id
            );
            return;
        }
        if !self.is_watching(st) {
            return;
        }
        if let Some(operation) = st.in_flight {
            debug!(
                "[{}] lock released by {} while {:?} in flight, acquiring afterwards",
                self.instance_id, notifier_id, operation
            );
            st.lock_released_pending = true;
            return;
        }

        debug!("[{}] leader {} released the lock, acquiring", self.instance_id, notifier_id);
        st.locker = None;
        self.acquire_leader_lock(st, true);
    }

    /// Acquires right away if a release arrived while the finished
    /// operation was in flight. Returns whether it did.
    fn take_lock_released(
        &self,
        st: &mut ElectionState,
    ) -> bool {
        if !std::mem::take(&mut st.lock_released_pending) {
            return false;
        }
        debug!("[{}] leader lock was released meanwhile, acquiring", self.instance_id);
        st.locker = None;
        self.acquire_leader_lock(st, true);
        true
    }
}
