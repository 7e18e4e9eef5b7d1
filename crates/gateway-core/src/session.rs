//! Session registry: one lazily created agent per client-supplied session id.
//!
//! The map lock is only held for short lookups and inserts; agent creation
//! runs outside it, inside a per-session `OnceCell`, so sessions never block
//! each other and concurrent first requests for one id build a single agent.

use crate::agent::{Agent, AgentFactory};
use crate::config::{AgentConfig, SessionConfig};
use crate::error::AgentError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{OnceCell, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

/// A live conversation bound to one agent instance.
pub struct Session {
    id: String,
    agent: Arc<dyn Agent>,
    /// Configuration the agent was built with; later requests cannot change it.
    config: AgentConfig,
    created_at: DateTime<Utc>,
    last_used: Mutex<Instant>,
    turn: Arc<tokio::sync::Mutex<()>>,
}

impl Session {
    fn new(id: &str, agent: Arc<dyn Agent>, config: AgentConfig) -> Self {
        Self {
            id: id.to_string(),
            agent,
            config,
            created_at: Utc::now(),
            last_used: Mutex::new(Instant::now()),
            turn: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used().elapsed()
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Wait for exclusive use of the agent for one turn.
    ///
    /// Requests on the same session are served one at a time; the guard may
    /// be moved into a spawned task for streamed turns.
    pub async fn begin_turn(&self) -> OwnedMutexGuard<()> {
        self.turn.clone().lock_owned().await
    }

    /// Whether a turn is currently running.
    pub fn is_busy(&self) -> bool {
        self.turn.try_lock().is_err()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("agent", &self.agent.name())
            .field("config", &self.config)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Bounds on how many sessions the registry keeps and for how long.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionLimits {
    pub idle_ttl: Option<Duration>,
    pub max_sessions: Option<usize>,
}

impl From<&SessionConfig> for SessionLimits {
    fn from(config: &SessionConfig) -> Self {
        Self {
            idle_ttl: config.idle_ttl_secs.map(Duration::from_secs),
            max_sessions: config.max_sessions,
        }
    }
}

type Slot = Arc<OnceCell<Arc<Session>>>;

/// Maps session ids to live agents, creating them on first use.
pub struct SessionRegistry {
    factory: Arc<dyn AgentFactory>,
    limits: SessionLimits,
    slots: RwLock<HashMap<String, Slot>>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn AgentFactory>, limits: SessionLimits) -> Self {
        Self {
            factory,
            limits,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &Arc<dyn AgentFactory> {
        &self.factory
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// Return the session for `session_id`, creating its agent from `config`
    /// on first use.
    ///
    /// An existing session is returned as-is: `config` is ignored on a hit.
    /// Use [`close`](Self::close) first to rebuild with new settings.
    pub async fn resolve(
        &self,
        session_id: &str,
        config: &AgentConfig,
    ) -> Result<Arc<Session>, AgentError> {
        let slot = self.slot(session_id);

        let result = slot
            .get_or_try_init(|| async {
                debug!(session_id, model = %config.model_name, "Creating agent for new session");
                let agent = self.factory.create(config).await?;
                Ok::<_, AgentError>(Arc::new(Session::new(session_id, agent, config.clone())))
            })
            .await;

        match result {
            Ok(session) => {
                session.touch();
                let session = Arc::clone(session);
                self.enforce_capacity(session_id);
                Ok(session)
            }
            Err(e) => {
                self.discard_failed(session_id, &slot);
                Err(e)
            }
        }
    }

    /// Look up a live session without creating one.
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.read().get(session_id).and_then(|slot| slot.get().cloned())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.get(session_id).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.read().values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop a session. Its next request builds a fresh agent.
    ///
    /// A turn already in progress finishes on the old agent. A session whose
    /// agent is still being built is left alone so its creator stays the
    /// only owner of that id.
    pub fn close(&self, session_id: &str) -> bool {
        let mut slots = self.write();
        if !slots.get(session_id).is_some_and(|slot| slot.initialized()) {
            return false;
        }
        slots.remove(session_id);
        info!(session_id, "Closed session");
        true
    }

    /// Remove sessions idle for longer than the configured TTL. Sessions in
    /// the middle of a turn are kept. Returns the number removed.
    pub fn evict_idle(&self) -> usize {
        let Some(ttl) = self.limits.idle_ttl else {
            return 0;
        };

        let mut slots = self.write();
        let before = slots.len();
        slots.retain(|id, slot| match slot.get() {
            Some(session) if !session.is_busy() && session.idle_for() >= ttl => {
                debug!(session_id = %id, "Evicting idle session");
                false
            }
            _ => true,
        });
        let evicted = before - slots.len();
        if evicted > 0 {
            info!("Evicted {} idle session(s)", evicted);
        }
        evicted
    }

    fn slot(&self, session_id: &str) -> Slot {
        if let Some(slot) = self.read().get(session_id) {
            return Arc::clone(slot);
        }
        Arc::clone(self.write().entry(session_id.to_string()).or_default())
    }

    /// Remove a slot whose creation failed, unless another caller is still
    /// waiting on it and will retry the creation.
    fn discard_failed(&self, session_id: &str, slot: &Slot) {
        let mut slots = self.write();
        let unused = slots.get(session_id).is_some_and(|current| {
            Arc::ptr_eq(current, slot) && !current.initialized() && Arc::strong_count(current) == 2
        });
        if unused {
            slots.remove(session_id);
        }
    }

    /// Evict least recently used sessions until the capacity bound holds.
    fn enforce_capacity(&self, keep: &str) {
        let Some(max) = self.limits.max_sessions else {
            return;
        };

        let mut slots = self.write();
        while slots.len() > max {
            let victim = slots
                .iter()
                .filter(|(id, _)| id.as_str() != keep)
                .filter_map(|(id, slot)| slot.get().map(|s| (id, s.last_used())))
                .min_by_key(|(_, last_used)| *last_used)
                .map(|(id, _)| id.clone());

            match victim {
                Some(id) => {
                    slots.remove(&id);
                    info!(session_id = %id, "Evicted least recently used session");
                }
                None => break,
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Reply;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Notify};

    struct MockAgent {
        model: String,
    }

    #[async_trait]
    impl Agent for MockAgent {
        fn name(&self) -> &str {
            "Mock"
        }

        fn model(&self) -> &str {
            &self.model
        }

        async fn invoke(&self, utterance: &str) -> Result<Reply, AgentError> {
            Ok(Reply {
                bot_name: "Mock".into(),
                response: utterance.to_string(),
                tool: None,
                tool_input: None,
                action_output: None,
                model_name: self.model.clone(),
            })
        }

        async fn stream_invoke(
            &self,
            utterance: &str,
            tokens: mpsc::Sender<String>,
        ) -> Result<(), AgentError> {
            tokens
                .send(utterance.to_string())
                .await
                .map_err(|_| AgentError::Cancelled)
        }
    }

    /// Counts constructions; optionally slow, failing, or blocked per session model.
    #[derive(Default)]
    struct CountingFactory {
        created: AtomicUsize,
        failures_left: AtomicUsize,
        delay: Option<Duration>,
        gate: Option<Arc<Notify>>,
    }

    impl CountingFactory {
        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentFactory for CountingFactory {
        async fn create(&self, config: &AgentConfig) -> Result<Arc<dyn Agent>, AgentError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if config.model_name == "blocked" {
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
            }
            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(AgentError::Config("catalog missing".into()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockAgent {
                model: config.model_name.clone(),
            }))
        }
    }

    fn config(model: &str) -> AgentConfig {
        AgentConfig {
            config_path: PathBuf::from("setup.json"),
            product_catalog_path: PathBuf::from("catalog.txt"),
            model_name: model.into(),
            use_tools: true,
        }
    }

    fn registry(factory: Arc<CountingFactory>, limits: SessionLimits) -> SessionRegistry {
        SessionRegistry::new(factory, limits)
    }

    #[tokio::test]
    async fn test_second_resolve_reuses_agent_and_ignores_config() {
        let factory = Arc::new(CountingFactory::default());
        let reg = registry(factory.clone(), SessionLimits::default());

        let first = reg.resolve("abc", &config("gpt-a")).await.unwrap();
        let second = reg.resolve("abc", &config("gpt-b")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(first.agent(), second.agent()));
        assert_eq!(second.agent().model(), "gpt-a");
        assert_eq!(second.config().model_name, "gpt-a");
        assert_eq!(factory.created(), 1);
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_resolves_create_once() {
        let factory = Arc::new(CountingFactory {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let reg = Arc::new(registry(factory.clone(), SessionLimits::default()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let reg = reg.clone();
                tokio::spawn(async move { reg.resolve("same", &config("gpt")).await.unwrap() })
            })
            .collect();

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        assert_eq!(factory.created(), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_block_each_other() {
        let gate = Arc::new(Notify::new());
        let factory = Arc::new(CountingFactory {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let reg = Arc::new(registry(factory.clone(), SessionLimits::default()));

        let slow = {
            let reg = reg.clone();
            tokio::spawn(async move { reg.resolve("slow", &config("blocked")).await })
        };
        tokio::task::yield_now().await;

        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            reg.resolve("fast", &config("gpt")),
        )
        .await;
        assert!(fast.is_ok(), "resolve on another session was blocked");
        assert!(fast.unwrap().is_ok());
        assert!(!slow.is_finished());

        gate.notify_one();
        assert!(slow.await.unwrap().is_ok());
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_failed_creation_leaves_no_entry() {
        let factory = Arc::new(CountingFactory {
            failures_left: AtomicUsize::new(1),
            ..Default::default()
        });
        let reg = registry(factory.clone(), SessionLimits::default());

        let err = reg.resolve("abc", &config("gpt")).await.unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
        assert!(!reg.contains("abc"));
        assert!(reg.read().get("abc").is_none());

        let session = reg.resolve("abc", &config("gpt")).await.unwrap();
        assert_eq!(session.id(), "abc");
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_close_resets_session() {
        let factory = Arc::new(CountingFactory::default());
        let reg = registry(factory.clone(), SessionLimits::default());

        let first = reg.resolve("abc", &config("gpt-a")).await.unwrap();
        assert!(reg.close("abc"));
        assert!(!reg.close("abc"));
        assert!(reg.is_empty());

        let second = reg.resolve("abc", &config("gpt-b")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.agent().model(), "gpt-b");
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_close_leaves_session_under_construction() {
        let gate = Arc::new(Notify::new());
        let factory = Arc::new(CountingFactory {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let reg = Arc::new(registry(factory.clone(), SessionLimits::default()));

        let building = {
            let reg = reg.clone();
            tokio::spawn(async move { reg.resolve("abc", &config("blocked")).await })
        };
        while !reg.read().contains_key("abc") {
            tokio::task::yield_now().await;
        }

        assert!(!reg.close("abc"));
        gate.notify_one();
        let first = building.await.unwrap().unwrap();

        let second = reg.resolve("abc", &config("gpt")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.created(), 1);
        assert!(reg.close("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let factory = Arc::new(CountingFactory::default());
        let reg = registry(
            factory,
            SessionLimits {
                idle_ttl: None,
                max_sessions: Some(2),
            },
        );

        reg.resolve("a", &config("gpt")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        reg.resolve("b", &config("gpt")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        // Touch "a" so "b" becomes the oldest.
        reg.resolve("a", &config("gpt")).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        reg.resolve("c", &config("gpt")).await.unwrap();

        assert_eq!(reg.len(), 2);
        assert!(reg.contains("a"));
        assert!(!reg.contains("b"));
        assert!(reg.contains("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_sessions() {
        let factory = Arc::new(CountingFactory::default());
        let reg = registry(
            factory,
            SessionLimits {
                idle_ttl: Some(Duration::from_secs(30)),
                max_sessions: None,
            },
        );

        reg.resolve("old", &config("gpt")).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        reg.resolve("new", &config("gpt")).await.unwrap();

        assert_eq!(reg.evict_idle(), 1);
        assert!(!reg.contains("old"));
        assert!(reg.contains("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_idle_keeps_busy_session() {
        let factory = Arc::new(CountingFactory::default());
        let reg = registry(
            factory,
            SessionLimits {
                idle_ttl: Some(Duration::from_secs(30)),
                max_sessions: None,
            },
        );

        let session = reg.resolve("streaming", &config("gpt")).await.unwrap();
        let turn = session.begin_turn().await;
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(reg.evict_idle(), 0);
        drop(turn);
        assert_eq!(reg.evict_idle(), 1);
    }

    #[tokio::test]
    async fn test_evict_idle_without_ttl_is_noop() {
        let reg = registry(Arc::new(CountingFactory::default()), SessionLimits::default());
        reg.resolve("abc", &config("gpt")).await.unwrap();
        assert_eq!(reg.evict_idle(), 0);
        assert!(reg.contains("abc"));
    }

    #[test]
    fn test_limits_from_config() {
        let limits = SessionLimits::from(&SessionConfig {
            idle_ttl_secs: Some(120),
            max_sessions: Some(50),
            sweep_interval_secs: 10,
        });
        assert_eq!(limits.idle_ttl, Some(Duration::from_secs(120)));
        assert_eq!(limits.max_sessions, Some(50));
    }
}
