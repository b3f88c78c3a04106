//! User model and the identity projection returned by lookups.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// User entity.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub username: Option<String>,
    /// PHC-encoded Argon2id hash. Empty for users created through OAuth.
    pub password_hash: String,
    pub attrs: Value,
}

impl User {
    /// True when `identifier` names this user by email (case-insensitive) or
    /// by username.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        let by_email = self
            .email
            .as_deref()
            .is_some_and(|e| e.eq_ignore_ascii_case(identifier));
        let by_username = self.username.as_deref() == Some(identifier);
        by_email || by_username
    }

    pub fn identity(&self) -> UserIdentity {
        UserIdentity {
            user_id: self.id,
            email: self.email.clone(),
            username: self.username.clone(),
        }
    }
}

/// Fields required to insert a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub tenant_id: Uuid,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password_hash: String,
    pub attrs: Option<Value>,
}

/// Public identity of a user.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            email: Some("Alice@Example.com".to_string()),
            username: Some("alice".to_string()),
            password_hash: String::new(),
            attrs: Value::Null,
        }
    }

    #[test]
    fn identifier_matches_email_ignoring_case() {
        assert!(user().matches_identifier("alice@example.com"));
    }

    #[test]
    fn identifier_matches_username_exactly() {
        let u = user();
        assert!(u.matches_identifier("alice"));
        assert!(!u.matches_identifier("ALICE"));
        assert!(!u.matches_identifier("bob"));
    }
}
