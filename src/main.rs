use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = tunelab::cli::Cli::parse();

    if let Err(e) = tunelab::cli::run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
