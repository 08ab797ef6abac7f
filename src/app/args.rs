//! CLI argument parsing, kept to the one knob set this crate actually
//! has: where to listen, where the config file lives, and how loud to
//! log.

use clap::{Parser, ValueEnum};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the TOML or YAML runtime config.
    #[arg(default_value_t = String::from("tsqlwire.toml"), env)]
    pub config_file: String,

    /// Override the config file's listen address.
    #[arg(short, long, env)]
    pub listen_addr: Option<std::net::SocketAddr>,

    #[arg(short, long, default_value_t = tracing::Level::INFO, env)]
    pub log_level: Level,

    #[clap(short = 'F', long, value_enum, default_value_t = LogFormat::Text, env)]
    pub log_format: LogFormat,

    #[arg(long, default_value_t = false, env, help = "disable colors in the log output")]
    pub no_color: bool,
}

pub fn parse() -> Args {
    Args::parse()
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    Text,
    Structured,
    Debug,
}
