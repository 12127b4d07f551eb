mod live;
mod manager;
mod types;
mod worker;

pub use manager::{SessionManager, SessionManagerBuilder};
pub use types::{
    ManagerStatus, SessionId, SessionPaths, SessionSnapshot, SessionStatus, SessionSummary,
};
