//! Refresh session model - the unit of refresh-token rotation.

use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Why a session stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevocationReason {
    /// Superseded by a child session during rotation.
    Rotated,
    UserLogout,
    UserLogoutAll,
    /// A rotated refresh token was presented again; the whole family is dead.
    ReuseDetected,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Rotated => "rotated",
            RevocationReason::UserLogout => "user_logout",
            RevocationReason::UserLogoutAll => "user_logout_all",
            RevocationReason::ReuseDetected => "reuse_detected",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rotated" => Ok(RevocationReason::Rotated),
            "user_logout" => Ok(RevocationReason::UserLogout),
            "user_logout_all" => Ok(RevocationReason::UserLogoutAll),
            "reuse_detected" => Ok(RevocationReason::ReuseDetected),
            _ => Err(format!("Invalid revocation reason: {}", s)),
        }
    }
}

/// Session entity.
///
/// Every login starts a new family; each rotation appends a child that points
/// back at its parent and shares the family id.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub client_id: Option<String>,
    pub family_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub replaced_by: Option<Uuid>,
    /// Argon2id hash of the refresh secret.
    pub refresh_hash: String,
    pub user_agent: String,
    pub ip: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub reason: Option<RevocationReason>,
}

impl Session {
    /// First session of a login: fresh id, fresh family, no parent.
    pub fn new_family(
        user_id: Uuid,
        refresh_hash: String,
        user_agent: String,
        ip: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            client_id: None,
            family_id: Uuid::new_v4(),
            parent_id: None,
            replaced_by: None,
            refresh_hash,
            user_agent,
            ip,
            created_at: now,
            last_used_at: now,
            expires_at: now + ttl,
            revoked_at: None,
            reason: None,
        }
    }

    /// Successor created by rotating `self`.
    pub fn child(
        &self,
        refresh_hash: String,
        user_agent: String,
        ip: String,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            client_id: self.client_id.clone(),
            family_id: self.family_id,
            parent_id: Some(self.id),
            replaced_by: None,
            refresh_hash,
            user_agent,
            ip,
            created_at: now,
            last_used_at: now,
            expires_at: now + ttl,
            revoked_at: None,
            reason: None,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_replaced(&self) -> bool {
        self.replaced_by.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_replaced() && !self.is_expired_at(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new_family(
            Uuid::new_v4(),
            "hash".to_string(),
            "ua".to_string(),
            "127.0.0.1".to_string(),
            Utc::now(),
            Duration::days(30),
        )
    }

    #[test]
    fn new_family_session_is_active_root() {
        let s = session();
        assert!(s.parent_id.is_none());
        assert!(s.is_active_at(Utc::now()));
    }

    #[test]
    fn child_inherits_family_and_links_parent() {
        let parent = session();
        let child = parent.child(
            "hash2".to_string(),
            "ua".to_string(),
            "10.0.0.1".to_string(),
            Utc::now(),
            Duration::days(30),
        );

        assert_eq!(child.family_id, parent.family_id);
        assert_eq!(child.parent_id, Some(parent.id));
        assert_ne!(child.id, parent.id);
        assert_eq!(child.user_id, parent.user_id);
    }

    #[test]
    fn expired_or_revoked_sessions_are_inactive() {
        let mut s = session();
        assert!(!s.is_active_at(s.expires_at));

        s.revoked_at = Some(Utc::now());
        assert!(!s.is_active_at(Utc::now()));
    }

    #[test]
    fn replaced_session_is_inactive() {
        let mut s = session();
        s.replaced_by = Some(Uuid::new_v4());
        assert!(!s.is_active_at(Utc::now()));
    }

    #[test]
    fn reason_round_trips_through_its_wire_name() {
        for reason in [
            RevocationReason::Rotated,
            RevocationReason::UserLogout,
            RevocationReason::UserLogoutAll,
            RevocationReason::ReuseDetected,
        ] {
            assert_eq!(reason.as_str().parse::<RevocationReason>(), Ok(reason));
        }
        assert!("expired".parse::<RevocationReason>().is_err());
    }
}
