/// Lifecycle of the live voice session as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session, no audio devices open
    #[default]
    Inactive,
    /// Session requested, waiting for the socket
    Connecting,
    /// Socket open, microphone streaming
    Active,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        *self == SessionState::Active
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Inactive => "inactive",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
        }
    }
}
