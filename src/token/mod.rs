mod access;
mod coordinator;
mod state;

pub use access::AccessToken;
pub use coordinator::{AuthFailureCallback, RefreshCoordinator};
pub use state::RefreshState;
