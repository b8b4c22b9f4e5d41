//! Classroom code registry (§4.2): six-character human-shareable codes
//! mapping to a sessionId, with TTL and teacher-connected tracking. A
//! second `DashMap`-backed registry in the same style as
//! [`crate::registry::ConnectionRegistry`], with the code itself following
//! the teacher's newtype-with-`TryFrom` idiom (`SessionToken`-style).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const CODE_LEN: usize = 6;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassroomCode([u8; CODE_LEN]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("classroom code must be exactly 6 uppercase letters or digits")]
pub struct ClassroomCodeParseError;

impl TryFrom<&str> for ClassroomCode {
    type Error = ClassroomCodeParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let bytes = value.as_bytes();
        if bytes.len() != CODE_LEN
            || !bytes.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        {
            return Err(ClassroomCodeParseError);
        }
        let mut buf = [0u8; CODE_LEN];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }
}

impl TryFrom<String> for ClassroomCode {
    type Error = ClassroomCodeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl fmt::Display for ClassroomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(&self.0).expect("code is ascii"))
    }
}

impl ClassroomCode {
    fn random() -> Self {
        let mut rng = rand::rng();
        let mut buf = [0u8; CODE_LEN];
        for slot in &mut buf {
            let idx = rng.random_range(0..CODE_ALPHABET.len());
            *slot = CODE_ALPHABET[idx];
        }
        Self(buf)
    }
}

struct CodeEntry {
    session_id: String,
    created_at: Instant,
    last_activity: Instant,
    expires_at: Instant,
    teacher_connected: bool,
}

/// Issues and validates classroom codes. Keyed by code for lookup and
/// mirrored by session id so a reconnecting teacher gets back the same code
/// (§8: "teacher reconnecting with the same sessionId must receive the same
/// classroomCode while the code is within TTL").
pub struct ClassroomCodeService {
    by_code: DashMap<ClassroomCode, CodeEntry>,
    by_session: DashMap<String, ClassroomCode>,
    ttl: Duration,
}

impl ClassroomCodeService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            by_code: DashMap::new(),
            by_session: DashMap::new(),
            ttl,
        }
    }

    /// Returns the existing code for `session_id` if still live, else mints
    /// a fresh one (rejecting collisions) and marks the teacher connected.
    pub fn issue_or_refresh(&self, session_id: &str) -> ClassroomCode {
        if let Some(code) = self.by_session.get(session_id) {
            let code = *code;
            if let Some(mut entry) = self.by_code.get_mut(&code) {
                let now = Instant::now();
                entry.last_activity = now;
                entry.expires_at = now + self.ttl;
                entry.teacher_connected = true;
                return code;
            }
        }

        loop {
            let code = ClassroomCode::random();
            if self.by_code.contains_key(&code) {
                continue;
            }
            let now = Instant::now();
            self.by_code.insert(
                code,
                CodeEntry {
                    session_id: session_id.to_string(),
                    created_at: now,
                    last_activity: now,
                    expires_at: now + self.ttl,
                    teacher_connected: true,
                },
            );
            self.by_session.insert(session_id.to_string(), code);
            return code;
        }
    }

    pub fn expires_at(&self, code: ClassroomCode) -> Option<Instant> {
        self.by_code.get(&code).map(|e| e.expires_at)
    }

    /// True only if the code exists, its teacher is connected, and it has
    /// not expired. Bumps `last_activity` on a valid check (§4.2).
    pub fn is_valid(&self, code: ClassroomCode) -> Option<String> {
        let mut entry = self.by_code.get_mut(&code)?;
        if !entry.teacher_connected || Instant::now() > entry.expires_at {
            return None;
        }
        entry.last_activity = Instant::now();
        Some(entry.session_id.clone())
    }

    pub fn session_for(&self, code: ClassroomCode) -> Option<String> {
        self.by_code.get(&code).map(|e| e.session_id.clone())
    }

    /// The code currently mapped to `session_id`, if any (§3: the durable
    /// session's `classCode` mirrors whichever code a joining student used).
    pub fn code_for_session(&self, session_id: &str) -> Option<ClassroomCode> {
        self.by_session.get(session_id).map(|c| *c)
    }

    /// True if some classroom code maps to `session_id` and that code is
    /// currently valid. Used by `register` when a student joined via the
    /// connection's query-string `code` rather than a message-level
    /// `classroomCode` field, so the same validity check applies either way.
    pub fn session_has_valid_code(&self, session_id: &str) -> bool {
        match self.by_session.get(session_id) {
            Some(code) => self.is_valid(*code).is_some(),
            None => false,
        }
    }

    pub fn mark_teacher_disconnected(&self, session_id: &str) {
        if let Some(code) = self.by_session.get(session_id) {
            if let Some(mut entry) = self.by_code.get_mut(&*code) {
                entry.teacher_connected = false;
            }
        }
    }

    pub fn mark_teacher_reconnected(&self, session_id: &str) {
        if let Some(code) = self.by_session.get(session_id) {
            if let Some(mut entry) = self.by_code.get_mut(&*code) {
                entry.teacher_connected = true;
                entry.expires_at = Instant::now() + self.ttl;
            }
        }
    }

    /// Removes every entry past `expires_at`. Returns the count removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<ClassroomCode> = self
            .by_code
            .iter()
            .filter(|e| now > e.expires_at)
            .map(|e| *e.key())
            .collect();
        for code in &expired {
            if let Some((_, entry)) = self.by_code.remove(code) {
                self.by_session.remove(&entry.session_id);
            }
        }
        expired.len()
    }

    #[cfg(test)]
    fn entry_created_at(&self, code: ClassroomCode) -> Option<Instant> {
        self.by_code.get(&code).map(|e| e.created_at)
    }

    #[cfg(test)]
    fn touch(&self, code: ClassroomCode) -> Option<Instant> {
        self.by_code.get(&code).map(|e| e.last_activity)
    }
}

/// Dedicated cancellable timer task that purges expired classroom codes
/// (§4.2, §9's "timers are explicit cancellable tasks" pattern).
pub struct ClassroomCodeCleanup {
    handle: JoinHandle<()>,
    notify: Arc<Notify>,
}

impl ClassroomCodeCleanup {
    pub fn spawn(service: Arc<ClassroomCodeService>, interval: Duration) -> Self {
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = service.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "swept expired classroom codes");
                        }
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
        Self { handle, notify }
    }

    pub fn cancel(self) {
        self.notify.notify_one();
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_codes() {
        assert!(ClassroomCode::try_from("abcdef").is_err());
        assert!(ClassroomCode::try_from("AB12").is_err());
        assert!(ClassroomCode::try_from("AB12!@").is_err());
        assert!(ClassroomCode::try_from("AB12CD").is_ok());
    }

    #[test]
    fn issue_or_refresh_is_stable_per_session() {
        let service = ClassroomCodeService::new(Duration::from_secs(3600));
        let first = service.issue_or_refresh("sess-1");
        let second = service.issue_or_refresh("sess-1");
        assert_eq!(first, second);
    }

    #[test]
    fn is_valid_requires_teacher_connected() {
        let service = ClassroomCodeService::new(Duration::from_secs(3600));
        let code = service.issue_or_refresh("sess-2");
        assert_eq!(service.is_valid(code), Some("sess-2".to_string()));

        service.mark_teacher_disconnected("sess-2");
        assert_eq!(service.is_valid(code), None);

        service.mark_teacher_reconnected("sess-2");
        assert_eq!(service.is_valid(code), Some("sess-2".to_string()));
    }

    #[test]
    fn is_valid_bumps_last_activity() {
        let service = ClassroomCodeService::new(Duration::from_secs(3600));
        let code = service.issue_or_refresh("sess-3");
        let created = service.entry_created_at(code).unwrap();
        let before = service.touch(code).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        service.is_valid(code);
        let after = service.touch(code).unwrap();
        assert!(after >= before);
        assert!(after >= created);
    }

    #[test]
    fn sweep_expired_removes_past_ttl_entries() {
        let service = ClassroomCodeService::new(Duration::from_millis(1));
        let code = service.issue_or_refresh("sess-4");
        std::thread::sleep(Duration::from_millis(10));
        let removed = service.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(service.is_valid(code), None);
    }
}
