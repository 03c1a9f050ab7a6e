//! Access Guards
//!
//! Surfaces check access before they render anything: the chat needs a
//! signed-in user, the admin views also need the `admin` role.

use crate::repository::{AuthSession, ChatRepository, RepositoryResult, Role};

/// Why access was refused
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenialReason {
    /// Nobody is signed in; send the user to the sign-in page
    NoSession,
    /// Signed in, but without the required role
    NotAdmin,
}

/// Outcome of an access check
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Access {
    /// Proceed with this session
    Granted(AuthSession),
    /// Redirect instead of rendering
    Denied(DenialReason),
}

impl Access {
    /// The session, when granted
    #[must_use]
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            Access::Granted(session) => Some(session),
            Access::Denied(_) => None,
        }
    }
}

/// Require a signed-in user
///
/// # Errors
///
/// Propagates repository failures; a missing session is a denial, not an error.
pub async fn require_session<R>(repo: &R) -> RepositoryResult<Access>
where
    R: ChatRepository + ?Sized,
{
    match repo.current_session().await? {
        Some(session) => Ok(Access::Granted(session)),
        None => {
            tracing::debug!(backend = repo.name(), "Access denied: no session");
            Ok(Access::Denied(DenialReason::NoSession))
        }
    }
}

/// Require a signed-in user holding the admin role
///
/// # Errors
///
/// Propagates repository failures.
pub async fn require_admin<R>(repo: &R) -> RepositoryResult<Access>
where
    R: ChatRepository + ?Sized,
{
    let session = match require_session(repo).await? {
        Access::Granted(session) => session,
        denied @ Access::Denied(_) => return Ok(denied),
    };

    if repo.has_role(&session.user_id, Role::Admin).await? {
        Ok(Access::Granted(session))
    } else {
        tracing::debug!(user = %session.user_id, "Access denied: not an admin");
        Ok(Access::Denied(DenialReason::NotAdmin))
    }
}
