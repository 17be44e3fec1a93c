pub mod cli;
pub mod load_config;
pub mod notify;
pub mod scheduler;
pub mod server;

pub use cli::{run, Cli, Commands};
