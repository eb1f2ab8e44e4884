use clap::Parser;
use gizmo_motion_driver::config::Options;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    let options = Options::parse();
    if let Err(e) = gizmo_motion_driver::runtime::run(options).await {
        eprintln!("Driver error: {}", e);
        std::process::exit(1);
    }
}
