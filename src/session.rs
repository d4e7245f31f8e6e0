use crate::error::VerdantError;
use crate::Result;

/// Identity handed to every owner-scoped operation. There is no ambient
/// global session; callers construct one and pass it down explicitly.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: Option<String>,
}

impl Session {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    /// The owning user id, or `Unauthenticated` when no one is signed in.
    pub fn user_id(&self) -> Result<&str> {
        self.user_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(VerdantError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_sessions_fail_fast() {
        assert!(matches!(
            Session::anonymous().user_id(),
            Err(VerdantError::Unauthenticated)
        ));
        assert!(matches!(
            Session::authenticated("").user_id(),
            Err(VerdantError::Unauthenticated)
        ));
    }

    #[test]
    fn authenticated_sessions_expose_the_owner() {
        let session = Session::authenticated("gardener-1");
        assert_eq!(session.user_id().unwrap(), "gardener-1");
    }
}
