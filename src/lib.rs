//! Terminal sessions for project boards.
//!
//! Each project gets at most one live shell running in its source
//! directory. Output is kept in a bounded scrollback and fanned out to any
//! number of viewers over Server-Sent Events; a viewer that reconnects
//! replays the scrollback before live output resumes.

pub mod api;
pub mod config;
pub mod env;
pub mod error;
pub mod gateway;
pub mod listeners;
pub mod manager;
pub mod projects;
pub mod pty;
pub mod scrollback;
pub mod session;

pub use api::{build_router, AppState};
pub use error::{TerminalError, TerminalResult};
pub use gateway::{StreamFrame, ViewerStream};
pub use manager::{ManagerConfig, SessionManager};
pub use projects::{ProjectCatalog, ProjectDirectory};
pub use session::{SessionId, SessionInfo};
