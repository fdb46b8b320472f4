use anyhow::Context;
use artifact_proxy::cli::{Cli, Command};
use artifact_proxy::{init_logging, NetworkProxy};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config().context("failed to load configuration")?;
    let _logging = init_logging(&config.logging).context("failed to initialize logging")?;

    match &cli.command {
        Command::Settings => {
            println!("{}", config.to_toml_string()?);
        }
        Command::CheckDomain { domain } => {
            let proxy = NetworkProxy::new(config)?;
            let record = proxy.check_domain(domain).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Fetch(args) => {
            let proxy = Arc::new(NetworkProxy::new(config)?);
            proxy.start_background_tasks();

            let request = args.to_request();
            let request_id = request.id.clone();
            let result = tokio::select! {
                result = proxy.execute_request(request) => result,
                _ = tokio::signal::ctrl_c() => {
                    proxy.cancel_request(&request_id);
                    anyhow::bail!("interrupted");
                }
            };
            proxy.shutdown().await;

            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
