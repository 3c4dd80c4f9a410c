pub mod config;
pub mod control;
pub mod duration;
pub mod error;
pub mod server;
pub mod state;

pub use config::Config;
pub use control::{ControlApiConfig, ServerControl, ShellControl};
pub use duration::{format_duration, parse_duration, parse_duration_or};
pub use error::*;
pub use server::{
    ManagedServer, ServerConfig, ServerManager, StartupContext, StartupTimerConfig, StartupTimes,
    StartupTracker,
};
pub use state::ServerState;
