//! The caller a request runs on behalf of.

use bulwark_core::User;

use crate::error::AppError;

/// Resolved by [`AuthenticateLayer`](super::AuthenticateLayer) and stored in
/// the request extensions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Principal {
    /// No `Authorization` header was sent.
    #[default]
    Anonymous,
    User(User),
}

impl Principal {
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// The authenticated user, or 401 for anonymous callers.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::AuthenticationRequired`] for anonymous callers.
    pub fn require_authenticated(&self) -> Result<&User, AppError> {
        match self {
            Self::Anonymous => Err(AppError::AuthenticationRequired),
            Self::User(user) => Ok(user),
        }
    }

    /// The authenticated user if their account is activated.
    ///
    /// # Errors
    ///
    /// 401 for anonymous callers, 403 for unactivated accounts.
    pub fn require_activated(&self) -> Result<&User, AppError> {
        let user = self.require_authenticated()?;
        if user.activated {
            Ok(user)
        } else {
            Err(AppError::InactiveAccount)
        }
    }
}
