//! Camera authorization.
//!
//! Authorization prompts belong to the host platform. The core only consumes the
//! outcome as a single "may proceed" decision handed to `FrameSource::start`.

/// Platform camera authorization status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessStatus {
    Authorized,
    /// The user has not been asked yet.
    NotDetermined,
    Denied,
    /// Blocked by policy (parental controls, MDM).
    Restricted,
}

/// Whether the frame source may start capturing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Refused,
}

impl AccessDecision {
    pub fn from_bool(granted: bool) -> Self {
        if granted {
            AccessDecision::Granted
        } else {
            AccessDecision::Refused
        }
    }

    pub fn is_granted(self) -> bool {
        matches!(self, AccessDecision::Granted)
    }
}

/// Turn a platform status into a decision.
///
/// Only `NotDetermined` consults `prompt`; denied and restricted never do.
pub fn resolve_access(status: AccessStatus, prompt: impl FnOnce() -> bool) -> AccessDecision {
    match status {
        AccessStatus::Authorized => AccessDecision::Granted,
        AccessStatus::NotDetermined => AccessDecision::from_bool(prompt()),
        AccessStatus::Denied | AccessStatus::Restricted => AccessDecision::Refused,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorized_does_not_prompt() {
        let decision = resolve_access(AccessStatus::Authorized, || {
            panic!("prompt must not run when already authorized")
        });
        assert_eq!(decision, AccessDecision::Granted);
    }

    #[test]
    fn not_determined_asks_the_user() {
        assert!(resolve_access(AccessStatus::NotDetermined, || true).is_granted());
        assert!(!resolve_access(AccessStatus::NotDetermined, || false).is_granted());
    }

    #[test]
    fn denied_and_restricted_refuse_without_prompt() {
        for status in [AccessStatus::Denied, AccessStatus::Restricted] {
            let decision = resolve_access(status, || panic!("prompt must not run"));
            assert_eq!(decision, AccessDecision::Refused);
        }
    }
}
