use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    /// A refresh call is in flight; further 401s wait for its result.
    Refreshing,
    /// The last refresh failed; 401s are rejected until the state is reset.
    Failed,
}

impl fmt::Display for RefreshState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshState::Idle => write!(f, "idle"),
            RefreshState::Refreshing => write!(f, "refreshing"),
            RefreshState::Failed => write!(f, "failed"),
        }
    }
}
