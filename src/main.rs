use std::process::ExitCode;

use clap::Parser;
use codetunnel::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    codetunnel::init_tracing(cli.verbose);

    match codetunnel::run(cli).await {
        Ok(report) => {
            if let Some(Err(e)) = report.sync_back {
                eprintln!("error: failed to sync back: {:#}", anyhow::Error::new(e));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
