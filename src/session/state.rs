//! Connection states, triggers and the transition table.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Sub-state of `Connected`.
    Authenticating,
    /// Sub-state of `Connected`.
    Authenticated,
    Failure,
}

impl SessionState {
    pub const ALL: [SessionState; 6] = [
        SessionState::Disconnected,
        SessionState::Connecting,
        SessionState::Connected,
        SessionState::Authenticating,
        SessionState::Authenticated,
        SessionState::Failure,
    ];

    /// `Connected` or one of its sub-states.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Authenticating | SessionState::Authenticated
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Connect,
    Connected,
    Authenticate,
    Authenticated,
    AuthenticationFailed,
    /// The token was dropped while the connection stays up.
    LoggedOut,
    Disconnect,
    Failure,
}

impl Trigger {
    pub const ALL: [Trigger; 8] = [
        Trigger::Connect,
        Trigger::Connected,
        Trigger::Authenticate,
        Trigger::Authenticated,
        Trigger::AuthenticationFailed,
        Trigger::LoggedOut,
        Trigger::Disconnect,
        Trigger::Failure,
    ];
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Target state for `trigger` fired in `state`, or `None` if not permitted.
pub fn next(state: SessionState, trigger: Trigger) -> Option<SessionState> {
    use SessionState as S;
    use Trigger as T;

    match (state, trigger) {
        (S::Disconnected, T::Connect) => Some(S::Connecting),
        (S::Disconnected, T::Failure) => Some(S::Failure),

        (S::Connecting, T::Connected) => Some(S::Connected),
        (S::Connecting, T::Failure) => Some(S::Failure),
        (S::Connecting, T::Disconnect) => Some(S::Disconnected),

        (S::Authenticating, T::Authenticated) => Some(S::Authenticated),
        (S::Authenticating, T::AuthenticationFailed) => Some(S::Connected),

        (S::Authenticated, T::LoggedOut) => Some(S::Connected),

        (s, T::Authenticate) if s.is_connected() => Some(S::Authenticating),
        (s, T::Failure) if s.is_connected() => Some(S::Failure),
        (s, T::Disconnect) if s.is_connected() => Some(S::Disconnected),

        (S::Failure, T::Connect) => Some(S::Connecting),
        (S::Failure, T::Disconnect) => Some(S::Disconnected),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState as S;
    use Trigger as T;

    const TABLE: &[(SessionState, Trigger, SessionState)] = &[
        (S::Disconnected, T::Connect, S::Connecting),
        (S::Disconnected, T::Failure, S::Failure),
        (S::Connecting, T::Connected, S::Connected),
        (S::Connecting, T::Failure, S::Failure),
        (S::Connecting, T::Disconnect, S::Disconnected),
        (S::Connected, T::Authenticate, S::Authenticating),
        (S::Connected, T::Failure, S::Failure),
        (S::Connected, T::Disconnect, S::Disconnected),
        (S::Authenticating, T::Authenticate, S::Authenticating),
        (S::Authenticating, T::Authenticated, S::Authenticated),
        (S::Authenticating, T::AuthenticationFailed, S::Connected),
        (S::Authenticating, T::Failure, S::Failure),
        (S::Authenticating, T::Disconnect, S::Disconnected),
        (S::Authenticated, T::Authenticate, S::Authenticating),
        (S::Authenticated, T::LoggedOut, S::Connected),
        (S::Authenticated, T::Failure, S::Failure),
        (S::Authenticated, T::Disconnect, S::Disconnected),
        (S::Failure, T::Connect, S::Connecting),
        (S::Failure, T::Disconnect, S::Disconnected),
    ];

    #[test]
    fn test_transition_table_is_exhaustive() {
        for state in SessionState::ALL {
            for trigger in Trigger::ALL {
                let expected = TABLE
                    .iter()
                    .find(|(s, t, _)| *s == state && *t == trigger)
                    .map(|(_, _, to)| *to);
                assert_eq!(
                    next(state, trigger),
                    expected,
                    "{} + {}",
                    state,
                    trigger
                );
            }
        }
    }

    #[test]
    fn test_connected_family() {
        let connected: Vec<_> = SessionState::ALL
            .into_iter()
            .filter(|s| s.is_connected())
            .collect();
        assert_eq!(
            connected,
            vec![S::Connected, S::Authenticating, S::Authenticated]
        );
    }

    #[test]
    fn test_failed_authentication_stays_connected() {
        let to = next(S::Authenticating, T::AuthenticationFailed).unwrap();
        assert!(to.is_connected());
        assert_eq!(to, S::Connected);
    }

    #[test]
    fn test_logout_only_leaves_authenticated() {
        assert_eq!(next(S::Authenticated, T::LoggedOut), Some(S::Connected));
        for state in [S::Connected, S::Authenticating, S::Disconnected, S::Failure] {
            assert!(next(state, T::LoggedOut).is_none());
        }
    }

    #[test]
    fn test_cannot_reconnect_while_connected() {
        for state in [S::Connecting, S::Connected, S::Authenticated] {
            assert!(next(state, T::Connect).is_none());
        }
    }
}
