use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::WorldCache;
use crate::model::account::RoleSet;
use crate::model::{Account, WorldObject};
use crate::values::{user_object, Failure, ObjId};

/// Bound on each session's outbound channel. A full channel blocks the
/// sending invocation, which is the backpressure the interpreter relies on.
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransportKind {
    Telnet,
    WebSocket,
}

/// The interpreter-facing side of message delivery: route a line to whatever
/// session currently embodies the target, if any.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, target: &ObjId, line: &str) -> Result<bool, Failure>;
}

/// Sink that swallows everything; used where no transport exists.
pub struct NoopSink;

#[async_trait]
impl MessageSink for NoopSink {
    async fn deliver(&self, _target: &ObjId, _line: &str) -> Result<bool, Failure> {
        Ok(false)
    }
}

/// Records deliveries for assertions; used throughout the tests.
#[derive(Default)]
pub struct MockSink {
    lines: StdMutex<Vec<(ObjId, String)>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(ObjId, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn lines_for(&self, target: &ObjId) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == target)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

#[async_trait]
impl MessageSink for MockSink {
    async fn deliver(&self, target: &ObjId, line: &str) -> Result<bool, Failure> {
        self.lines
            .lock()
            .unwrap()
            .push((target.clone(), line.to_string()));
        Ok(true)
    }
}

struct SessionRecord {
    kind: TransportKind,
    account: Option<Account>,
    character: Option<ObjId>,
    transient: ObjId,
    outbound: mpsc::Sender<String>,
    cancel: Arc<AtomicBool>,
    failed_logins: AtomicU32,
    last_interacted: StdMutex<Option<ObjId>>,
    connected_at: Instant,
}

/// Registry of live connections. Sessions are ephemeral: created on connect,
/// destroyed on disconnect, never outliving the transport. Each owns a
/// transient user object (parent `#user`) that exists only in the cache.
pub struct SessionHub {
    cache: Arc<WorldCache>,
    sessions: DashMap<SessionId, SessionRecord>,
    by_character: DashMap<ObjId, SessionId>,
    by_transient: DashMap<ObjId, SessionId>,
    shutdown: mpsc::Sender<Option<String>>,
}

impl SessionHub {
    pub fn new(cache: Arc<WorldCache>, shutdown: mpsc::Sender<Option<String>>) -> Self {
        Self {
            cache,
            sessions: DashMap::new(),
            by_character: DashMap::new(),
            by_transient: DashMap::new(),
            shutdown,
        }
    }

    /// Registers a new connection and mints its transient user object.
    /// Returns the receiving end of the session's outbound channel for the
    /// transport to pump.
    pub fn connect(&self, kind: TransportKind) -> (SessionId, mpsc::Receiver<String>) {
        let id = SessionId::new();
        let transient = ObjId::new(format!("user-{}", Uuid::new_v4().simple()));
        let mut user = WorldObject::with_parent(transient.clone(), user_object());
        user.name = "guest".to_string();
        self.cache.put_transient(user);

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        self.sessions.insert(
            id,
            SessionRecord {
                kind,
                account: None,
                character: None,
                transient: transient.clone(),
                outbound: tx,
                cancel: Arc::new(AtomicBool::new(false)),
                failed_logins: AtomicU32::new(0),
                last_interacted: StdMutex::new(None),
                connected_at: Instant::now(),
            },
        );
        self.by_transient.insert(transient, id);
        info!(session = %id, ?kind, "session connected");
        (id, rx)
    }

    /// Tears a session down: cancels in-flight work, unbinds the character,
    /// evicts the transient user object.
    pub fn disconnect(&self, id: SessionId) {
        let Some((_, record)) = self.sessions.remove(&id) else {
            return;
        };
        record.cancel.store(true, Ordering::Relaxed);
        if let Some(character) = &record.character {
            self.by_character
                .remove_if(character, |_, owner| *owner == id);
        }
        self.by_transient.remove(&record.transient);
        self.cache.evict(&record.transient);
        info!(session = %id, "session disconnected");
    }

    pub fn authenticate(&self, id: SessionId, account: Account) -> Result<(), Failure> {
        let mut record = self.record_mut(id)?;
        record.account = Some(account);
        Ok(())
    }

    /// Binds a character to this session. At most one session embodies a
    /// character; an earlier session holding it is displaced.
    pub async fn embody(&self, id: SessionId, character: ObjId) -> Result<(), Failure> {
        if let Some(previous) = self.by_character.get(&character).map(|e| *e.value()) {
            if previous != id {
                self.send_line(
                    previous,
                    "** This character has been taken over by another connection. **",
                )
                .await
                .ok();
                if let Some(mut old) = self.sessions.get_mut(&previous) {
                    old.character = None;
                }
                debug!(session = %previous, character = %character, "displaced");
            }
        }
        {
            let mut record = self.record_mut(id)?;
            if let Some(old_character) = record.character.take() {
                self.by_character
                    .remove_if(&old_character, |_, owner| *owner == id);
            }
            record.character = Some(character.clone());
        }
        self.by_character.insert(character, id);
        Ok(())
    }

    /// The object acting for this session: the embodied character, or the
    /// transient user when unembodied.
    pub fn actor_of(&self, id: SessionId) -> Result<ObjId, Failure> {
        let record = self.record(id)?;
        Ok(record
            .character
            .clone()
            .unwrap_or_else(|| record.transient.clone()))
    }

    pub fn transient_of(&self, id: SessionId) -> Result<ObjId, Failure> {
        Ok(self.record(id)?.transient.clone())
    }

    pub fn roles_of(&self, id: SessionId) -> RoleSet {
        self.sessions
            .get(&id)
            .and_then(|r| r.account.as_ref().map(|a| a.roles.clone()))
            .unwrap_or_default()
    }

    pub fn account_of(&self, id: SessionId) -> Option<Account> {
        self.sessions.get(&id).and_then(|r| r.account.clone())
    }

    pub fn is_authenticated(&self, id: SessionId) -> bool {
        self.sessions
            .get(&id)
            .map(|r| r.account.is_some())
            .unwrap_or(false)
    }

    pub fn is_embodied(&self, id: SessionId) -> bool {
        self.sessions
            .get(&id)
            .map(|r| r.character.is_some())
            .unwrap_or(false)
    }

    pub fn is_admin(&self, id: SessionId) -> bool {
        self.sessions
            .get(&id)
            .and_then(|r| r.account.as_ref().map(|a| a.is_admin()))
            .unwrap_or(false)
    }

    pub fn kind_of(&self, id: SessionId) -> Option<TransportKind> {
        self.sessions.get(&id).map(|r| r.kind)
    }

    pub fn cancel_flag(&self, id: SessionId) -> Option<Arc<AtomicBool>> {
        self.sessions.get(&id).map(|r| r.cancel.clone())
    }

    /// Consecutive failed logins; the telnet transport disconnects at three.
    pub fn bump_failed_logins(&self, id: SessionId) -> u32 {
        self.sessions
            .get(&id)
            .map(|r| r.failed_logins.fetch_add(1, Ordering::Relaxed) + 1)
            .unwrap_or(0)
    }

    pub fn record_interaction(&self, id: SessionId, object: ObjId) {
        if let Some(record) = self.sessions.get(&id) {
            *record.last_interacted.lock().unwrap() = Some(object);
        }
    }

    pub fn last_interaction(&self, id: SessionId) -> Option<ObjId> {
        self.sessions
            .get(&id)
            .and_then(|r| r.last_interacted.lock().unwrap().clone())
    }

    pub fn session_for_actor(&self, actor: &ObjId) -> Option<SessionId> {
        if let Some(entry) = self.by_character.get(actor) {
            return Some(*entry.value());
        }
        self.by_transient.get(actor).map(|e| *e.value())
    }

    /// Connected, authenticated sessions with their display names.
    pub fn who(&self) -> Vec<(SessionId, String, u64)> {
        self.sessions
            .iter()
            .filter_map(|entry| {
                entry.account.as_ref().map(|account| {
                    (
                        *entry.key(),
                        account.display_name.clone(),
                        entry.connected_at.elapsed().as_secs(),
                    )
                })
            })
            .collect()
    }

    pub async fn send_line(&self, id: SessionId, line: &str) -> Result<(), Failure> {
        let outbound = self.record(id)?.outbound.clone();
        outbound
            .send(line.to_string())
            .await
            .map_err(|_| Failure::Transport("session output channel closed".to_string()))
    }

    pub async fn broadcast(&self, line: &str) {
        let targets: Vec<mpsc::Sender<String>> =
            self.sessions.iter().map(|e| e.outbound.clone()).collect();
        for target in targets {
            target.send(line.to_string()).await.ok();
        }
    }

    pub async fn request_shutdown(&self, message: Option<String>) {
        self.shutdown.send(message).await.ok();
    }

    fn record(
        &self,
        id: SessionId,
    ) -> Result<dashmap::mapref::one::Ref<'_, SessionId, SessionRecord>, Failure> {
        self.sessions.get(&id).ok_or_else(|| {
            Failure::Transport(format!("no such session: {}", id))
        })
    }

    fn record_mut(
        &self,
        id: SessionId,
    ) -> Result<dashmap::mapref::one::RefMut<'_, SessionId, SessionRecord>, Failure> {
        self.sessions.get_mut(&id).ok_or_else(|| {
            Failure::Transport(format!("no such session: {}", id))
        })
    }
}

#[async_trait]
impl MessageSink for SessionHub {
    async fn deliver(&self, target: &ObjId, line: &str) -> Result<bool, Failure> {
        match self.session_for_actor(target) {
            Some(id) => {
                self.send_line(id, line).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
