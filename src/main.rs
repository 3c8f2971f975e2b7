use clap::Parser;
use terraform_provider_snyk::{init_logging, serve_with_options, ServeOptions, SnykProvider};
use tracing::error;

/// Terraform provider plugin for Snyk.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Start in debug mode and print reattach settings instead of the handshake
    #[arg(long, env = "TF_PROVIDER_DEBUG")]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging();

    let provider = SnykProvider::new(env!("CARGO_PKG_VERSION"));
    let options = ServeOptions::new().with_debug(args.debug);
    if let Err(e) = serve_with_options(provider, options).await {
        error!(error = %e, "Provider stopped");
        std::process::exit(1);
    }
}
