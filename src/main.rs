use tracing::{error, info};

use tsqlwire::app::{self, init_logging};
use tsqlwire::config::PipelineConfig;
use tsqlwire::engine::memory::MemoryEngine;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = app::parse();
    init_logging(&args);

    let mut config = match PipelineConfig::load(&args.config_file).await {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, file = %args.config_file, "falling back to defaults, could not load config file");
            PipelineConfig::default()
        }
    };
    if let Some(listen_addr) = args.listen_addr {
        config.listen_addr = listen_addr;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting tsqlwire-server");

    let engine = MemoryEngine::new();
    if let Err(e) = tsqlwire::server::run(config, engine).await {
        error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
}
