#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::Result;
use clap::Parser;
use discovery_syncer::server;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "discovery-syncer", about = "Reconciles service-discovery registries with API gateway upstreams")]
struct Cli {
    /// Path to the syncer config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Façade listen address (overrides the config file's `listen`)
    #[arg(short, long)]
    listen: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let worker_threads = server::runtime::get_container_cpu_limit();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        listen: cli.listen,
    }))
}
