use std::collections::HashMap;
use std::time::{Duration, Instant};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use base64::Engine;
use crate::tprintln;

pub type SessionToken = String;

/// A live browser session. Bound to the authenticated username only; claims
/// are re-resolved from the credential store on every request, so grant
/// changes take effect immediately for session users.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionToken,
    pub username: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

static SESSIONS: Lazy<RwLock<HashMap<String, Session>>> = Lazy::new(|| RwLock::new(HashMap::new()));

fn gen_id() -> String {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

pub struct SessionManager {
    pub ttl: Duration,
}

impl Default for SessionManager {
    fn default() -> Self { Self { ttl: Duration::from_secs(60 * 60) } }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self { Self { ttl } }

    pub fn issue(&self, username: &str) -> Session {
        let now = Instant::now();
        let sid = gen_id();
        let sess = Session {
            session_id: sid.clone(),
            username: username.to_string(),
            issued_at: now,
            expires_at: now + self.ttl,
        };
        SESSIONS.write().insert(sid.clone(), sess.clone());
        tprintln!("session.issue user={} sid={} ttl_secs={}", username, sid, self.ttl.as_secs());
        sess
    }

    /// Resolve a session id to its username. Expired entries are pruned on
    /// the way out.
    pub fn validate(&self, session_id: &str) -> Option<String> {
        let now = Instant::now();
        let mut drop_key: Option<String> = None;
        let out = {
            let map = SESSIONS.read();
            if let Some(sess) = map.get(session_id) {
                if sess.expires_at > now {
                    Some(sess.username.clone())
                } else {
                    drop_key = Some(session_id.to_string());
                    None
                }
            } else { None }
        };
        if let Some(k) = drop_key {
            SESSIONS.write().remove(&k);
        }
        out
    }

    pub fn logout(&self, session_id: &str) -> bool {
        let removed = SESSIONS.write().remove(session_id);
        if let Some(sess) = &removed {
            tprintln!("session.logout user={} sid={}", sess.username, session_id);
        }
        removed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_validate_round_trips_username() {
        let sm = SessionManager::default();
        let sess = sm.issue("foo");
        assert_eq!(sm.validate(&sess.session_id).as_deref(), Some("foo"));
    }

    #[test]
    fn logout_invalidates() {
        let sm = SessionManager::default();
        let sess = sm.issue("foo");
        assert!(sm.logout(&sess.session_id));
        assert!(sm.validate(&sess.session_id).is_none());
        assert!(!sm.logout(&sess.session_id));
    }

    #[test]
    fn expired_session_is_rejected_and_pruned() {
        let sm = SessionManager::new(Duration::from_secs(0));
        let sess = sm.issue("foo");
        std::thread::sleep(Duration::from_millis(5));
        assert!(sm.validate(&sess.session_id).is_none());
        // second lookup hits the pruned map, not the expiry branch
        assert!(sm.validate(&sess.session_id).is_none());
    }
}
