use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::runtime::Handle;

use dmpolicy_core::error::DmPolicyError;
use dmpolicy_core::handle::{LoopProxy, WeakHandle};
use dmpolicy_core::policy::{PolicyDefinitionList, PolicySnapshot, PolicyStore};

use crate::backend::{BackendError, ManagementBackend, PolicyResponse, RegisterResponse};
use crate::cache::{CachedState, PolicyCache};
use crate::config::RefreshConfig;
use crate::obs::ClientMetrics;
use crate::token::{ObserverId, TokenEvent, TokenSource};

use super::refresh::next_refresh_delay;
use super::state::{FetchState, Phase, RequestKind, ScheduledTimer, TimerAction};

/// External collaborators injected at construction.
pub struct Collaborators {
    pub backend: Arc<dyn ManagementBackend>,
    pub cache: Arc<dyn PolicyCache>,
    pub token_source: Rc<dyn TokenSource>,
    pub metrics: Arc<ClientMetrics>,
}

/// Emitted once per successful snapshot replacement.
#[derive(Debug, Clone)]
pub struct PolicyChanged {
    pub snapshot: Arc<PolicySnapshot>,
}

pub type PolicyObserver = Box<dyn Fn(&PolicyChanged)>;

/// Policy provider bound to the owning context it was built on.
///
/// Not `Send`: build it, call it, and drop it on the thread that runs the
/// [`OwnerLoop`](dmpolicy_core::handle::OwnerLoop) behind `owner`. Backend
/// calls and timers run on the tokio runtime current at construction, so the
/// loop may be driven from outside that runtime's context.
pub struct PolicyProvider {
    inner: Rc<ProviderInner>,
}

struct ProviderInner {
    handle: WeakHandle<ProviderInner>,
    rt: Handle,
    cfg: RefreshConfig,
    definitions: PolicyDefinitionList,
    backend: Arc<dyn ManagementBackend>,
    cache: Arc<dyn PolicyCache>,
    // cleared on shutdown; never touched afterwards
    token_source: RefCell<Option<Rc<dyn TokenSource>>>,
    token_subscription: Cell<Option<ObserverId>>,
    metrics: Arc<ClientMetrics>,
    snapshot: RefCell<Option<Arc<PolicySnapshot>>>,
    state: RefCell<FetchState>,
    observers: RefCell<Vec<PolicyObserver>>,
}

impl PolicyProvider {
    /// Load the cache and subscribe to the token source. Network work starts
    /// from a task posted to `owner`, i.e. once its loop is being driven.
    ///
    /// Fails outside a tokio runtime context.
    pub fn new(
        cfg: RefreshConfig,
        definitions: PolicyDefinitionList,
        deps: Collaborators,
        owner: &LoopProxy,
    ) -> dmpolicy_core::Result<Self> {
        let rt = Handle::try_current()
            .map_err(|e| DmPolicyError::Internal(format!("policy provider needs a tokio runtime: {e}")))?;
        let cached = deps.cache.load().unwrap_or_default();
        let has_snapshot = cached.snapshot.is_some();
        let registered = cached.device_token.is_some();

        let inner = Rc::new_cyclic(|weak| ProviderInner {
            handle: WeakHandle::from_weak(weak.clone(), owner),
            rt,
            cfg,
            definitions,
            backend: deps.backend,
            cache: deps.cache,
            token_source: RefCell::new(Some(Rc::clone(&deps.token_source))),
            token_subscription: Cell::new(None),
            metrics: deps.metrics,
            snapshot: RefCell::new(cached.snapshot.map(Arc::new)),
            state: RefCell::new(FetchState::new(cached.device_token)),
            observers: RefCell::new(Vec::new()),
        });

        let sink = inner.handle.clone();
        let subscription = deps.token_source.add_observer(Box::new(move |ev| {
            sink.invoke(move |p| p.on_token_event(ev));
        }));
        inner.token_subscription.set(Some(subscription));

        inner.handle.invoke(|p| p.initialize());
        inner.record_snapshot_size();

        tracing::info!(cached_policy = has_snapshot, registered, "policy provider created");
        Ok(Self { inner })
    }

    /// Write the current snapshot into `store`. Never blocks and never
    /// triggers network activity; with no snapshot nothing is applied.
    pub fn provide(&self, store: &mut dyn PolicyStore) {
        let snapshot = self.inner.snapshot.borrow().clone();
        if let Some(s) = snapshot {
            s.apply_to(store);
        }
    }

    pub fn snapshot(&self) -> Option<Arc<PolicySnapshot>> {
        self.inner.snapshot.borrow().clone()
    }

    /// True iff a register or policy request is outstanding.
    pub fn is_request_pending(&self) -> bool {
        self.inner.state.borrow().pending.is_some()
    }

    pub fn phase(&self) -> Phase {
        self.inner.phase()
    }

    pub fn is_registered(&self) -> bool {
        self.inner.state.borrow().device_token.is_some()
    }

    /// Consecutive register failures since the last successful register.
    pub fn register_failures(&self) -> u32 {
        self.inner.state.borrow().register_failures
    }

    /// Consecutive policy failures since the last successful fetch.
    pub fn policy_failures(&self) -> u32 {
        self.inner.state.borrow().policy_failures
    }

    pub fn add_observer(&self, observer: impl Fn(&PolicyChanged) + 'static) {
        self.inner.observers.borrow_mut().push(Box::new(observer));
    }

    /// Fetch now instead of waiting for the scheduled refresh. Coalesced with
    /// an outstanding request.
    pub fn refresh_now(&self) {
        self.inner.refresh_now();
    }

    /// Stop all background work. Pending timers and late backend responses
    /// become no-ops and the token source is released. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for PolicyProvider {
    fn drop(&mut self) {
        if self.inner.phase() != Phase::ShuttingDown {
            tracing::debug!("policy provider dropped without shutdown");
            self.inner.shutdown();
        }
    }
}

impl ProviderInner {
    fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    fn set_phase(&self, phase: Phase) {
        let mut st = self.state.borrow_mut();
        if st.phase != phase {
            tracing::debug!(from = st.phase.as_str(), to = phase.as_str(), "phase change");
            st.phase = phase;
        }
    }

    fn auth_token(&self) -> Option<String> {
        self.token_source.borrow().as_ref().and_then(|t| t.auth_token())
    }

    fn initialize(&self) {
        if self.phase() != Phase::Uninitialized {
            // shut down before the loop got to us
            return;
        }
        if self.state.borrow().device_token.is_some() {
            tracing::debug!("cached registration; refreshing policy");
            self.send_policy_request();
        } else if self.auth_token().is_some() {
            self.send_register_request();
        } else {
            self.set_phase(Phase::AwaitingToken);
        }
    }

    fn on_token_event(&self, ev: TokenEvent) {
        let phase = self.phase();
        if phase.is_terminal() || phase == Phase::Uninitialized {
            tracing::debug!(event = ?ev, phase = phase.as_str(), "token event ignored");
            return;
        }
        match ev {
            TokenEvent::Available => {
                let waiting = {
                    let st = self.state.borrow();
                    st.device_token.is_none() && st.pending.is_none()
                };
                if waiting {
                    self.state.borrow_mut().cancel_timer();
                    self.send_register_request();
                }
            }
            TokenEvent::Error => {
                let idle_unregistered = {
                    let st = self.state.borrow();
                    st.device_token.is_none() && st.pending.is_none()
                };
                if idle_unregistered {
                    tracing::warn!(
                        delay_ms = self.cfg.token_fetch_error_delay_ms,
                        "auth token fetch failed; retry scheduled"
                    );
                    self.schedule(self.cfg.token_error_delay(), TimerAction::RetryToken);
                }
            }
            TokenEvent::NotManaged => self.enter_unmanaged("token source"),
        }
    }

    fn send_register_request(&self) {
        if self.state.borrow().pending.is_some() {
            tracing::debug!("request outstanding; register coalesced");
            return;
        }
        let Some(auth_token) = self.auth_token() else {
            self.set_phase(Phase::AwaitingToken);
            return;
        };
        self.begin_request(RequestKind::Register, Phase::Registering);

        let backend = Arc::clone(&self.backend);
        let handle = self.handle.clone();
        self.rt.spawn(async move {
            let result = backend.register(auth_token).await;
            handle.invoke(move |p| p.on_register_response(result));
        });
    }

    fn send_policy_request(&self) {
        let device_token = {
            let st = self.state.borrow();
            if st.pending.is_some() {
                tracing::debug!("request outstanding; policy fetch coalesced");
                return;
            }
            st.device_token.clone()
        };
        let Some(device_token) = device_token else {
            self.send_register_request();
            return;
        };
        self.begin_request(RequestKind::Policy, Phase::FetchingPolicy);

        let backend = Arc::clone(&self.backend);
        let handle = self.handle.clone();
        self.rt.spawn(async move {
            let result = backend.fetch_policy(device_token).await;
            handle.invoke(move |p| p.on_policy_response(result));
        });
    }

    fn begin_request(&self, kind: RequestKind, phase: Phase) {
        self.state.borrow_mut().pending = Some(kind);
        self.set_phase(phase);
        self.metrics.requests_sent.inc(&[("kind", kind.as_str())]);
        self.metrics.request_pending.set(&[("kind", kind.as_str())], 1);
        tracing::debug!(kind = kind.as_str(), "request sent");
    }

    /// Resolve the outstanding request of `kind`. Returns false if the
    /// response must be ignored (not outstanding, or after shutdown/unmanaged).
    fn finish_request(&self, kind: RequestKind, outcome: &str) -> bool {
        let mut st = self.state.borrow_mut();
        if st.pending != Some(kind) {
            tracing::warn!(kind = kind.as_str(), "response for a request that is not outstanding");
            return false;
        }
        st.pending = None;
        self.metrics.request_pending.set(&[("kind", kind.as_str())], 0);
        self.metrics
            .request_outcomes
            .inc(&[("kind", kind.as_str()), ("outcome", outcome)]);
        if st.phase.is_terminal() {
            tracing::debug!(kind = kind.as_str(), phase = st.phase.as_str(), "late response ignored");
            return false;
        }
        true
    }

    fn on_register_response(&self, result: Result<RegisterResponse, BackendError>) {
        let outcome = result.as_ref().map_or_else(|e| e.as_str(), |_| "ok");
        if !self.finish_request(RequestKind::Register, outcome) {
            return;
        }
        match result {
            Ok(resp) => {
                {
                    let mut st = self.state.borrow_mut();
                    st.device_token = Some(resp.device_token);
                    st.register_failures = 0;
                }
                tracing::info!("device registered");
                self.persist("register");
                self.send_policy_request();
            }
            Err(e) if e.is_not_managed() => self.enter_unmanaged("register response"),
            Err(e) => {
                let failures = {
                    let mut st = self.state.borrow_mut();
                    st.register_failures += 1;
                    st.register_failures
                };
                tracing::warn!(
                    error = %e,
                    failures,
                    delay_ms = self.cfg.policy_refresh_error_delay_ms,
                    "register failed; retry scheduled"
                );
                self.schedule(self.cfg.error_delay(), TimerAction::RetryRegister);
            }
        }
    }

    fn on_policy_response(&self, result: Result<PolicyResponse, BackendError>) {
        let outcome = result.as_ref().map_or_else(|e| e.as_str(), |_| "ok");
        if !self.finish_request(RequestKind::Policy, outcome) {
            return;
        }
        match result {
            Ok(resp) => {
                let snapshot = Arc::new(
                    self.definitions
                        .decode(resp.into_pairs())
                        .with_fetched_at(unix_now_ms()),
                );
                *self.snapshot.borrow_mut() = Some(Arc::clone(&snapshot));
                self.state.borrow_mut().policy_failures = 0;
                self.record_snapshot_size();
                self.persist("policy");

                let delay = next_refresh_delay(&self.cfg);
                tracing::info!(keys = snapshot.len(), next_refresh_ms = delay.as_millis() as u64, "policy updated");
                self.schedule(delay, TimerAction::Refresh);
                self.notify_changed(&PolicyChanged { snapshot });
            }
            Err(e) if e.is_not_managed() => self.enter_unmanaged("policy response"),
            Err(e) if e.invalidates_registration() => {
                self.state.borrow_mut().device_token = None;
                tracing::warn!(error = %e, "registration rejected; re-registering");
                self.persist("invalidate");
                self.schedule(self.cfg.error_delay(), TimerAction::RetryRegister);
            }
            Err(e) => {
                let failures = {
                    let mut st = self.state.borrow_mut();
                    st.policy_failures += 1;
                    st.policy_failures
                };
                tracing::warn!(
                    error = %e,
                    failures,
                    delay_ms = self.cfg.policy_refresh_error_delay_ms,
                    "policy fetch failed; retry scheduled"
                );
                self.schedule(self.cfg.error_delay(), TimerAction::RetryPolicy);
            }
        }
    }

    /// Replace any scheduled timer with one firing `action` after `delay`.
    fn schedule(&self, delay: Duration, action: TimerAction) {
        let mut st = self.state.borrow_mut();
        st.cancel_timer();
        st.timer_generation += 1;
        let generation = st.timer_generation;

        let handle = self.handle.clone();
        let task = self.rt.spawn(async move {
            tokio::time::sleep(delay).await;
            handle.invoke(move |p| p.on_timer(generation));
        });
        st.timer = Some(ScheduledTimer {
            generation,
            action,
            abort: task.abort_handle(),
        });
        drop(st);

        self.set_phase(match action {
            TimerAction::Refresh => Phase::Idle,
            _ => Phase::ErrorBackoff,
        });
        tracing::debug!(action = ?action, delay_ms = delay.as_millis() as u64, "timer scheduled");
    }

    fn on_timer(&self, generation: u64) {
        let action = {
            let mut st = self.state.borrow_mut();
            if st.phase.is_terminal() {
                return;
            }
            match &st.timer {
                Some(t) if t.generation == generation => {}
                // cancelled or superseded after it fired
                _ => return,
            }
            st.timer.take().map(|t| t.action)
        };
        match action {
            Some(TimerAction::Refresh) | Some(TimerAction::RetryPolicy) => self.send_policy_request(),
            Some(TimerAction::RetryRegister) | Some(TimerAction::RetryToken) => {
                self.send_register_request()
            }
            None => {}
        }
    }

    fn refresh_now(&self) {
        {
            let mut st = self.state.borrow_mut();
            if st.phase.is_terminal() || st.phase == Phase::Uninitialized {
                return;
            }
            if st.pending.is_some() {
                tracing::debug!("request outstanding; refresh coalesced");
                return;
            }
            st.cancel_timer();
        }
        self.send_policy_request();
    }

    fn enter_unmanaged(&self, source: &str) {
        self.state.borrow_mut().cancel_timer();
        self.set_phase(Phase::Unmanaged);
        tracing::info!(source, "client is not managed; policy fetching stopped");
    }

    fn shutdown(&self) {
        {
            let mut st = self.state.borrow_mut();
            if st.phase == Phase::ShuttingDown {
                return;
            }
            st.cancel_timer();
        }
        self.set_phase(Phase::ShuttingDown);
        let source = self.token_source.borrow_mut().take();
        if let (Some(source), Some(id)) = (source, self.token_subscription.take()) {
            source.remove_observer(id);
        }
        tracing::info!("policy provider shut down");
    }

    fn persist(&self, reason: &str) {
        let state = CachedState {
            device_token: self.state.borrow().device_token.clone(),
            snapshot: self.snapshot.borrow().as_deref().cloned(),
        };
        self.cache.store(state);
        self.metrics.cache_writes.inc(&[("reason", reason)]);
    }

    fn record_snapshot_size(&self) {
        let keys = self.snapshot.borrow().as_ref().map_or(0, |s| s.len());
        self.metrics.snapshot_keys.set(&[], keys as i64);
    }

    fn notify_changed(&self, ev: &PolicyChanged) {
        // Detach the list so observers may register further observers.
        let observers = std::mem::take(&mut *self.observers.borrow_mut());
        for observer in &observers {
            observer(ev);
        }
        let mut current = self.observers.borrow_mut();
        let added = std::mem::replace(&mut *current, observers);
        current.extend(added);
        drop(current);

        self.metrics.policy_changes.inc(&[]);
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use dmpolicy_core::handle::OwnerLoop;

    use super::*;
    use crate::backend::PolicySetting;
    use crate::token::TokenService;

    struct Offline;

    #[async_trait]
    impl ManagementBackend for Offline {
        async fn register(&self, _auth_token: String) -> Result<RegisterResponse, BackendError> {
            Err(BackendError::NetworkUnavailable)
        }

        async fn fetch_policy(&self, _device_token: String) -> Result<PolicyResponse, BackendError> {
            Err(BackendError::NetworkUnavailable)
        }
    }

    #[derive(Default)]
    struct CountingCache {
        stores: AtomicUsize,
    }

    impl CountingCache {
        fn stores(&self) -> usize {
            self.stores.load(Ordering::SeqCst)
        }
    }

    impl PolicyCache for CountingCache {
        fn load(&self) -> Option<CachedState> {
            None
        }

        fn store(&self, _state: CachedState) {
            self.stores.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn spdy(disabled: bool) -> Result<PolicyResponse, BackendError> {
        Ok(PolicyResponse {
            settings: vec![PolicySetting {
                name: "DisableSpdy".into(),
                value: json!(disabled),
            }],
        })
    }

    fn build(owner: &OwnerLoop, cache: &Arc<CountingCache>) -> (PolicyProvider, Rc<Cell<u32>>) {
        let provider = PolicyProvider::new(
            RefreshConfig::default(),
            PolicyDefinitionList::permissive(),
            Collaborators {
                backend: Arc::new(Offline),
                cache: cache.clone(),
                token_source: Rc::new(TokenService::new()),
                metrics: Arc::new(ClientMetrics::default()),
            },
            &owner.proxy(),
        )
        .unwrap();
        let changes = Rc::new(Cell::new(0));
        let c = Rc::clone(&changes);
        provider.add_observer(move |_| c.set(c.get() + 1));
        (provider, changes)
    }

    #[tokio::test]
    async fn response_with_nothing_outstanding_is_ignored() {
        let owner = OwnerLoop::new();
        let cache = Arc::new(CountingCache::default());
        let (provider, changes) = build(&owner, &cache);

        // loop never driven: no request was sent
        provider.inner.on_policy_response(spdy(true));

        assert!(provider.snapshot().is_none());
        assert_eq!(changes.get(), 0);
        assert_eq!(cache.stores(), 0);
        let st = provider.inner.state.borrow();
        assert_eq!(st.timer_generation, 0);
        assert!(st.timer.is_none());
        assert_eq!(st.phase, Phase::Uninitialized);
    }

    #[tokio::test]
    async fn duplicate_policy_response_is_ignored() {
        let owner = OwnerLoop::new();
        let cache = Arc::new(CountingCache::default());
        let (provider, changes) = build(&owner, &cache);
        provider.inner.state.borrow_mut().device_token = Some("device".into());

        provider
            .inner
            .begin_request(RequestKind::Policy, Phase::FetchingPolicy);
        provider.inner.on_policy_response(spdy(true));

        let first = provider.snapshot().unwrap();
        let generation = provider.inner.state.borrow().timer_generation;
        assert_eq!(changes.get(), 1);
        assert_eq!(cache.stores(), 1);
        assert_eq!(provider.phase(), Phase::Idle);

        provider.inner.on_policy_response(spdy(false));

        assert!(Arc::ptr_eq(&first, &provider.snapshot().unwrap()));
        assert_eq!(first.get("DisableSpdy"), Some(&json!(true)));
        assert_eq!(changes.get(), 1);
        assert_eq!(cache.stores(), 1);
        assert_eq!(provider.inner.state.borrow().timer_generation, generation);
        assert!(!provider.is_request_pending());
        assert_eq!(provider.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn register_response_while_policy_outstanding_is_ignored() {
        let owner = OwnerLoop::new();
        let cache = Arc::new(CountingCache::default());
        let (provider, _changes) = build(&owner, &cache);
        provider.inner.state.borrow_mut().device_token = Some("device".into());
        provider
            .inner
            .begin_request(RequestKind::Policy, Phase::FetchingPolicy);

        provider.inner.on_register_response(Ok(RegisterResponse {
            device_token: "other".into(),
        }));

        let st = provider.inner.state.borrow();
        assert_eq!(st.pending, Some(RequestKind::Policy));
        assert_eq!(st.device_token.as_deref(), Some("device"));
        assert_eq!(cache.stores(), 0);
    }
}
