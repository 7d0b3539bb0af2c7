use anyhow::Result;
use clap::Parser;
use compute_bench_cli::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::init_tracing(&args);
    cli::run(args).await
}
