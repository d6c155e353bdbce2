//! Command-line and environment configuration for the server binary.

use std::path::PathBuf;

use clap::Parser;

use crate::{
    manager::ManagerConfig,
    pty::{DEFAULT_COLS, DEFAULT_ROWS},
    scrollback::DEFAULT_SCROLLBACK_BYTES,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "projello-term")]
#[command(about = "Terminal session server for project boards")]
#[command(version)]
pub struct Config {
    /// Host to bind to
    #[arg(long, env = "PROJELLO_TERM_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PROJELLO_TERM_PORT", default_value_t = 39390)]
    pub port: u16,

    /// JSON file mapping project keys to source directories
    #[arg(long, env = "PROJELLO_PROJECTS", default_value = ".projello/projects.json")]
    pub projects: PathBuf,

    /// Scrollback retained per session, in bytes
    #[arg(long, env = "PROJELLO_SCROLLBACK_BYTES", default_value_t = DEFAULT_SCROLLBACK_BYTES)]
    pub scrollback_bytes: usize,

    /// Shell to launch (defaults to $SHELL, then /bin/sh)
    #[arg(long, env = "PROJELLO_SHELL")]
    pub shell: Option<String>,

    /// Start the shell without `-l`
    #[arg(long)]
    pub no_login: bool,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            shell: self.shell.clone(),
            shell_args: if self.no_login {
                Vec::new()
            } else {
                vec!["-l".to_string()]
            },
            scrollback_bytes: self.scrollback_bytes,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}
