//! Request-scoped caller identity.

use crate::error::{AuditorError, AuditorResult};
use crate::types::{User, VirtualKey};

/// The authenticated dashboard user an operation runs on behalf of.
///
/// Passed explicitly into every registry, ledger, and metrics call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// User id
    pub user_id: i64,
    /// User email, used to scope non-admin reads
    pub email: String,
    /// Administrators see every key and event
    pub is_admin: bool,
}

impl Principal {
    /// Build an administrator principal
    pub fn admin(user_id: i64, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            is_admin: true,
        }
    }

    /// Build a non-admin principal
    pub fn member(user_id: i64, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: email.into(),
            is_admin: false,
        }
    }

    /// Email filter for key listings; `None` for administrators
    #[must_use]
    pub fn owner_filter(&self) -> Option<&str> {
        if self.is_admin {
            None
        } else {
            Some(self.email.as_str())
        }
    }

    /// Whether the caller may read the key
    #[must_use]
    pub fn can_view(&self, key: &VirtualKey) -> bool {
        self.is_admin || key.user_email.as_deref() == Some(self.email.as_str())
    }

    /// Fail unless the caller is an administrator
    pub fn require_admin(&self) -> AuditorResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AuditorError::forbidden("administrator privileges required"))
        }
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            is_admin: user.is_admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_filter() {
        assert_eq!(Principal::admin(1, "root@local").owner_filter(), None);
        assert_eq!(
            Principal::member(2, "dev@local").owner_filter(),
            Some("dev@local")
        );
    }

    #[test]
    fn test_require_admin() {
        assert!(Principal::admin(1, "root@local").require_admin().is_ok());
        let err = Principal::member(2, "dev@local").require_admin().unwrap_err();
        assert!(matches!(err, AuditorError::Forbidden(_)));
    }
}
