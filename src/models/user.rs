//! User model
//!
//! Users own quotes, likes, collections and views. The email address is the
//! match key when an import row is compared with existing accounts.

use serde::{Deserialize, Serialize};

/// Accepted values for `role`
pub const USER_ROLES: &[&str] = &["user", "moderator", "admin"];

/// Default role for imported users
pub const DEFAULT_USER_ROLE: &str = "user";

/// User row as exchanged by the import/export pipeline.
///
/// All fields are optional so partial rows can be merged; validation decides
/// which ones are required. When read back from the store `id` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Source id in the exporting system, or the stored id
    pub id: Option<i64>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub language: Option<String>,
    pub biography: Option<String>,
    pub job: Option<String>,
    pub location: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: Option<bool>,
    pub email_verified: Option<bool>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl UserRecord {
    /// Trimmed email used for exact matching
    pub fn match_key(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }

    pub fn role_or_default(&self) -> &str {
        self.role.as_deref().unwrap_or(DEFAULT_USER_ROLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_record_from_partial_json() {
        let user: UserRecord =
            serde_json::from_value(serde_json::json!({"email": " a@b.co ", "name": "Ann"}))
                .unwrap();
        assert_eq!(user.match_key().as_deref(), Some("a@b.co"));
        assert_eq!(user.role_or_default(), "user");
        assert!(user.is_active.is_none());
    }
}
