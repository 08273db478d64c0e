//! Load lifecycle of a container.

/// Where the container is in its navigation lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Failed(String),
}

/// What happens to a page-bound request in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dispatch {
    Run,
    Queue,
    Reject,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Requests wait for the next load while idle or loading and are refused
    /// after a failed load.
    pub(crate) fn dispatch(&self) -> Dispatch {
        match self {
            Self::Loaded => Dispatch::Run,
            Self::Idle | Self::Loading => Dispatch::Queue,
            Self::Failed(_) => Dispatch::Reject,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Dispatch;
    use super::LoadState;

    #[test]
    fn dispatch_policy_per_state() {
        assert_eq!(LoadState::Idle.dispatch(), Dispatch::Queue);
        assert_eq!(LoadState::Loading.dispatch(), Dispatch::Queue);
        assert_eq!(LoadState::Loaded.dispatch(), Dispatch::Run);
        assert_eq!(LoadState::Failed("gone".to_owned()).dispatch(), Dispatch::Reject);
    }

    #[test]
    fn failed_state_exposes_error() {
        let state = LoadState::Failed("net::ERR_FILE_NOT_FOUND".to_owned());
        assert_eq!(state.error(), Some("net::ERR_FILE_NOT_FOUND"));
        assert_eq!(state.as_str(), "failed");
        assert!(!state.is_loaded());
    }
}
