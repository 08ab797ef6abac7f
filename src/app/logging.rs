//! `tracing-subscriber` init: EnvFilter plus a json/pretty/text format
//! switch.

use tracing_subscriber::EnvFilter;

use crate::app::args::{Args, LogFormat};

pub fn init_logging(args: &Args) {
    let filter = EnvFilter::from_default_env().add_directive(args.log_level.into());

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(!args.no_color);

    match args.log_format {
        LogFormat::Structured => subscriber.json().init(),
        LogFormat::Debug => subscriber.pretty().init(),
        LogFormat::Text => subscriber.init(),
    }
}
