use clap::Parser;

use verdant::cli::{self, Cli};
use verdant::logging;

#[tokio::main]
async fn main() {
    logging::init_tracing("verdant");
    let cli = Cli::parse();
    if let Err(err) = cli::run(cli).await {
        tracing::error!(%err, "command failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
