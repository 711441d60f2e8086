use std::fmt;

/// Session lifecycle state as reported by the runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Idle => "IDLE",
            Self::Ready => "READY",
            Self::Synchronized => "SYNCHRONIZED",
            Self::Visible => "VISIBLE",
            Self::Focused => "FOCUSED",
            Self::Stopping => "STOPPING",
            Self::LossPending => "LOSS_PENDING",
            Self::Exiting => "EXITING",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Our own, simplified view of the session, used for every control decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Stopped,
    Idle,
    Beginning,
    Synchronized,
    Ending,
    Failure,
}

impl SessionStatus {
    pub fn is_running(self) -> bool {
        !matches!(self, Self::Stopped | Self::Failure)
    }

    /// Begin/end were requested but the runtime hasn't moved on yet.
    pub fn is_transitory(self) -> bool {
        matches!(self, Self::Beginning | Self::Ending)
    }
}

/// Events pulled out of the runtime's queue.
#[derive(Clone, Debug, PartialEq)]
pub enum RuntimeEvent {
    SessionStateChanged(SessionState),
    /// Runtime clock time (nanoseconds) at which the instance goes away.
    InstanceLossPending { loss_time: i64 },
    InteractionProfileChanged,
    /// Anything we don't react to, with a name for the log.
    Other(&'static str),
}

/// Runtime call (or app notification) a state change asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    None,
    NotifyIdle,
    NotifyVisible,
    NotifyFocused,
    BeginSession,
    EndSession,
    DestroySession,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub action: Action,
    /// Status to adopt once `action` went through.
    pub status: SessionStatus,
}

/// Maps a runtime state change onto what we do and where we end up.
///
/// A failed session stays failed: it has to be torn down before anything else happens.
pub fn transition(status: SessionStatus, state: SessionState) -> Transition {
    use SessionStatus as S;
    let (action, next) = match (status, state) {
        (S::Failure, _) => (Action::None, S::Failure),
        (_, SessionState::Idle) => (Action::NotifyIdle, S::Idle),
        (_, SessionState::Synchronized) => (Action::None, S::Synchronized),
        (_, SessionState::Visible) => (Action::NotifyVisible, status),
        (_, SessionState::Focused) => (Action::NotifyFocused, status),
        // xrBeginSession already issued, the runtime just hasn't caught up
        (S::Beginning, SessionState::Ready) => (Action::None, status),
        (_, SessionState::Ready) => (Action::BeginSession, S::Beginning),
        (S::Ending, SessionState::Stopping) => (Action::None, status),
        (_, SessionState::Stopping) => (Action::EndSession, S::Ending),
        (_, SessionState::LossPending | SessionState::Exiting) => {
            (Action::DestroySession, S::Stopped)
        }
        (_, SessionState::Unknown) => (Action::None, status),
    };
    Transition {
        action,
        status: next,
    }
}
