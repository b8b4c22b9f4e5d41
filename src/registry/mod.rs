//! In-memory peer registry (§4.1). Modeled after the teacher's
//! `StreamManager`: a global `DashMap` keyed by a monotonic connection id,
//! generalized from "one stream per user" to "many concurrently-registered
//! peers per classroom session."
//!
//! All mutations are serialized per entry by `DashMap`'s shard locking;
//! reads (`peers_in_session`, `active_snapshot`) are snapshot-consistent but
//! may miss concurrent writes, per §5.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};

/// Items a peer's single writer task consumes, in send order (§5: per-peer
/// outbound ordering, including "error frame then close").
#[derive(Debug, Clone)]
pub enum OutboundItem {
    Frame(String),
    Ping,
    Close { code: u16, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Unset,
    Teacher,
    Student,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerSettings {
    #[serde(default, rename = "ttsServiceType")]
    pub tts_service_type: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PeerSettings {
    /// Shallow-merge, per §4.8: new keys win, untouched keys survive.
    pub fn merge(&mut self, patch: &PeerSettings) {
        if patch.tts_service_type.is_some() {
            self.tts_service_type = patch.tts_service_type.clone();
        }
        for (key, value) in &patch.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

/// One open WebSocket connection. Every mutable field is independently
/// lockable so a reader (fan-out) never blocks on an unrelated writer
/// (settings update) for the same peer.
/// Outbound queue depth per peer. Chosen generously above the steady-state
/// fan-out rate of one frame per transcription; a peer whose reader has
/// wedged badly enough to fill this is treated as dead rather than given
/// unbounded memory (§5 backpressure).
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

pub struct PeerState {
    pub connection_id: u64,
    sender: mpsc::Sender<OutboundItem>,
    session_id: RwLock<Option<String>>,
    role: RwLock<Role>,
    language: RwLock<Option<String>>,
    name: RwLock<Option<String>>,
    settings: RwLock<PeerSettings>,
    alive: AtomicBool,
    counted: AtomicBool,
    terminate: Arc<Notify>,
}

pub type PeerHandle = Arc<PeerState>;

impl PeerState {
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().expect("lock poisoned").clone()
    }

    pub fn role(&self) -> Role {
        *self.role.read().expect("lock poisoned")
    }

    pub fn language(&self) -> Option<String> {
        self.language.read().expect("lock poisoned").clone()
    }

    pub fn name(&self) -> Option<String> {
        self.name.read().expect("lock poisoned").clone()
    }

    pub fn settings(&self) -> PeerSettings {
        self.settings.read().expect("lock poisoned").clone()
    }

    pub fn set_role(&self, role: Role) {
        *self.role.write().expect("lock poisoned") = role;
    }

    pub fn set_language(&self, language: String) {
        *self.language.write().expect("lock poisoned") = Some(language);
    }

    pub fn set_name(&self, name: String) {
        *self.name.write().expect("lock poisoned") = Some(name);
    }

    pub fn merge_settings(&self, patch: &PeerSettings) {
        self.settings.write().expect("lock poisoned").merge(patch);
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// Returns the previous liveness flag and clears it, for the
    /// HealthMonitor's check-then-reset sweep (§4.10).
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::SeqCst)
    }

    /// Flips false -> true exactly once; returns whether this call made the
    /// transition (§3: "counted transitions false->true at most once").
    pub fn mark_counted(&self) -> bool {
        self.counted
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_counted(&self) -> bool {
        self.counted.load(Ordering::SeqCst)
    }

    /// Best-effort, non-blocking send. A closed channel means the peer is
    /// dead; a full channel means its writer can't keep up and the frame is
    /// dropped rather than the fan-out path blocking on a single slow
    /// socket (§5 backpressure). Both cases surface as `Err` to the caller.
    pub fn send_item(&self, item: OutboundItem) -> Result<(), mpsc::error::TrySendError<OutboundItem>> {
        self.sender.try_send(item)
    }

    pub fn send_frame(&self, frame: String) -> Result<(), mpsc::error::TrySendError<OutboundItem>> {
        self.send_item(OutboundItem::Frame(frame))
    }

    /// Queues a close after whatever is already pending, so an error frame
    /// sent just before always lands first (§4.12).
    pub fn close(&self, code: u16, reason: String) {
        let _ = self.send_item(OutboundItem::Close { code, reason });
    }

    /// Unconditional termination from [`crate::ws::health::HealthMonitor`];
    /// the reader task observes this and runs the close-drain path exactly
    /// once (§8 invariant).
    pub fn terminate(&self) {
        self.terminate.notify_one();
    }

    pub async fn terminated(&self) {
        self.terminate.notified().await;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSnapshot {
    pub active_sessions: usize,
    pub students: usize,
    pub teachers: usize,
    pub languages_in_use: Vec<String>,
}

/// Primary handle -> Peer table plus a per-session secondary index,
/// following the teacher's `StreamManager` concurrency model.
pub struct ConnectionRegistry {
    peers: DashMap<u64, PeerHandle>,
    sessions: DashMap<String, HashSet<u64>>,
    next_connection_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            peers: DashMap::new(),
            sessions: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Registers a freshly-opened connection with no session binding yet,
    /// in `Role::Unset`. Idempotent in the sense that each call always
    /// allocates a fresh connection id, per the monotonic race guard.
    pub fn add(&self, sender: mpsc::Sender<OutboundItem>) -> PeerHandle {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let peer = Arc::new(PeerState {
            connection_id,
            sender,
            session_id: RwLock::new(None),
            role: RwLock::new(Role::Unset),
            language: RwLock::new(None),
            name: RwLock::new(None),
            settings: RwLock::new(PeerSettings::default()),
            alive: AtomicBool::new(true),
            counted: AtomicBool::new(false),
            terminate: Arc::new(Notify::new()),
        });
        self.peers.insert(connection_id, peer.clone());
        peer
    }

    /// All live peers, for the [`crate::ws::health::HealthMonitor`] sweep.
    pub fn all_peers(&self) -> Vec<PeerHandle> {
        self.peers.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Binds (or rebinds) a peer to a session, updating the secondary index.
    pub fn bind_session(&self, peer: &PeerHandle, session_id: String) {
        if let Some(previous) = peer.session_id() {
            if previous == session_id {
                return;
            }
            self.unindex(&previous, peer.connection_id);
        }
        self.sessions
            .entry(session_id.clone())
            .or_default()
            .insert(peer.connection_id);
        *peer.session_id.write().expect("lock poisoned") = Some(session_id);
    }

    fn unindex(&self, session_id: &str, connection_id: u64) {
        if let Some(mut set) = self.sessions.get_mut(session_id) {
            set.remove(&connection_id);
        }
    }

    /// Drops all secondary indexes for a handle; safe if already absent.
    pub fn remove(&self, connection_id: u64) {
        if let Some((_, peer)) = self.peers.remove(&connection_id) {
            if let Some(session_id) = peer.session_id() {
                self.unindex(&session_id, connection_id);
            }
        }
    }

    pub fn get(&self, connection_id: u64) -> Option<PeerHandle> {
        self.peers.get(&connection_id).map(|entry| entry.clone())
    }

    fn session_peers(&self, session_id: &str) -> Vec<PeerHandle> {
        let Some(ids) = self.sessions.get(session_id) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.peers.get(id).map(|p| p.clone())).collect()
    }

    /// `{teachers[], students[]}` for a session (§4.1).
    pub fn peers_in_session(&self, session_id: &str) -> (Vec<PeerHandle>, Vec<PeerHandle>) {
        let mut teachers = Vec::new();
        let mut students = Vec::new();
        for peer in self.session_peers(session_id) {
            match peer.role() {
                Role::Teacher => teachers.push(peer),
                Role::Student => students.push(peer),
                Role::Unset => {}
            }
        }
        (teachers, students)
    }

    /// Students for the fan-out path, grouped by distinct language.
    pub fn students_for_fan_out(&self, session_id: &str) -> Vec<(String, Vec<PeerHandle>)> {
        let (_, students) = self.peers_in_session(session_id);
        let mut by_language: std::collections::BTreeMap<String, Vec<PeerHandle>> =
            std::collections::BTreeMap::new();
        for student in students {
            if let Some(language) = student.language() {
                by_language.entry(language).or_default().push(student);
            }
        }
        by_language.into_iter().collect()
    }

    /// `(teacher_count, student_count)` for drain checks (§4.11).
    pub fn count_by_role(&self, session_id: &str) -> (usize, usize) {
        let (teachers, students) = self.peers_in_session(session_id);
        (teachers.len(), students.len())
    }

    /// Read-only projection for the diagnostics adapter (§4.13). Distinct
    /// from the durable store's `count_active` (REDESIGN FLAGS, §9).
    pub fn active_snapshot(&self) -> ActiveSnapshot {
        let mut students = 0usize;
        let mut teachers = 0usize;
        let mut languages: HashSet<String> = HashSet::new();
        for entry in self.peers.iter() {
            match entry.value().role() {
                Role::Teacher => teachers += 1,
                Role::Student => students += 1,
                Role::Unset => {}
            }
            if let Some(language) = entry.value().language() {
                languages.insert(language);
            }
        }
        ActiveSnapshot {
            active_sessions: self.sessions.iter().filter(|e| !e.value().is_empty()).count(),
            students,
            teachers,
            languages_in_use: languages.into_iter().collect(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only seam for the diagnostics aggregator (§4.13, §9 REDESIGN
/// FLAGS). Kept as a trait rather than handing out `Arc<ConnectionRegistry>`
/// directly so the diagnostics side depends on an interface, not the
/// concrete registry, and can never reach in to mutate it.
pub trait ActiveStateProvider: Send + Sync {
    fn active_snapshot(&self) -> ActiveSnapshot;
}

impl ActiveStateProvider for ConnectionRegistry {
    fn active_snapshot(&self) -> ActiveSnapshot {
        ConnectionRegistry::active_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_peer(
        registry: &ConnectionRegistry,
    ) -> (PeerHandle, mpsc::Receiver<OutboundItem>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        (registry.add(tx), rx)
    }

    #[test]
    fn add_assigns_monotonic_ids_and_unset_role() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = make_peer(&registry);
        let (b, _rx_b) = make_peer(&registry);
        assert!(b.connection_id > a.connection_id);
        assert_eq!(a.role(), Role::Unset);
    }

    #[test]
    fn bind_session_and_peers_in_session() {
        let registry = ConnectionRegistry::new();
        let (teacher, _rx1) = make_peer(&registry);
        teacher.set_role(Role::Teacher);
        registry.bind_session(&teacher, "sess-1".into());

        let (student, _rx2) = make_peer(&registry);
        student.set_role(Role::Student);
        student.set_language("es".into());
        registry.bind_session(&student, "sess-1".into());

        let (teachers, students) = registry.peers_in_session("sess-1");
        assert_eq!(teachers.len(), 1);
        assert_eq!(students.len(), 1);
    }

    #[test]
    fn remove_clears_secondary_index() {
        let registry = ConnectionRegistry::new();
        let (peer, _rx) = make_peer(&registry);
        registry.bind_session(&peer, "sess-2".into());
        registry.remove(peer.connection_id);
        let (teachers, students) = registry.peers_in_session("sess-2");
        assert!(teachers.is_empty() && students.is_empty());
    }

    #[test]
    fn counted_flag_flips_once() {
        let registry = ConnectionRegistry::new();
        let (peer, _rx) = make_peer(&registry);
        assert!(peer.mark_counted());
        assert!(!peer.mark_counted());
    }

    #[test]
    fn students_for_fan_out_groups_by_language() {
        let registry = ConnectionRegistry::new();
        let (s1, _rx1) = make_peer(&registry);
        s1.set_role(Role::Student);
        s1.set_language("fr".into());
        registry.bind_session(&s1, "sess-3".into());

        let (s2, _rx2) = make_peer(&registry);
        s2.set_role(Role::Student);
        s2.set_language("fr".into());
        registry.bind_session(&s2, "sess-3".into());

        let (s3, _rx3) = make_peer(&registry);
        s3.set_role(Role::Student);
        s3.set_language("de".into());
        registry.bind_session(&s3, "sess-3".into());

        let groups = registry.students_for_fan_out("sess-3");
        assert_eq!(groups.len(), 2);
        let fr_group = groups.iter().find(|(lang, _)| lang == "fr").unwrap();
        assert_eq!(fr_group.1.len(), 2);
    }
}
