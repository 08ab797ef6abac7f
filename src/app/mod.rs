//! CLI bootstrap: argument parsing and logging init, the only two ambient
//! concerns this crate's binary entry point owns.

pub mod args;
pub mod logging;

pub use args::{parse, Args, LogFormat};
pub use logging::init_logging;
