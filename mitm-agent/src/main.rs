//! MITM Policy Agent Binary Entry Point

use clap::Parser;
use mitm_agent::{init_logging, run_agent, Args};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_logging(&args.logging_config())?;

    if let Err(e) = run_agent(args).await {
        tracing::error!("Proxy server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}
