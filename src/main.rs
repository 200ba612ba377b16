use anyhow::{anyhow, Result};
use colored::Colorize;
use itertools::Itertools;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;

use chain_snapshot::{
    config::SnapshotConfig,
    tools::{ToolResult, Toolkit},
    utils::setup_logger,
};

const USAGE: &str = "usage: chain-snapshot <chain_id> <address> [block]";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    setup_logger()?;

    let config = SnapshotConfig::from_env()?;
    if let Some(port) = config.runtime.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()?;
        info!("Metrics exporter listening on port {}", port);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (chain_id, address, block) = parse_args(&args)?;

    info!(
        "Snapshot of {} on chain {} (supported: {})",
        address,
        chain_id,
        config.chains.chain_ids().iter().join(", ")
    );
    let toolkit = Toolkit::from_config(&config)?;

    let source = toolkit.fetch_source(chain_id, &address, block, true).await;
    let state = toolkit
        .read_state(chain_id, &address, block, None, &[], true)
        .await;
    let price = toolkit.token_price(chain_id, &address, block).await;
    let base = toolkit.base_currency_price(chain_id, block).await;

    for result in [&source, &state, &price, &base] {
        print_result(result)?;
    }

    if let Some(path) = &config.runtime.price_cache_path {
        toolkit.pricing().cache().persist(path)?;
    }
    Ok(())
}

fn parse_args(args: &[String]) -> Result<(u64, String, Option<u64>)> {
    let chain_id = args
        .first()
        .ok_or_else(|| anyhow!(USAGE))?
        .parse::<u64>()
        .map_err(|e| anyhow!("invalid chain id: {}", e))?;
    let address = args.get(1).ok_or_else(|| anyhow!(USAGE))?.clone();
    let block = args
        .get(2)
        .map(|raw| raw.parse::<u64>())
        .transpose()
        .map_err(|e| anyhow!("invalid block number: {}", e))?;
    Ok((chain_id, address, block))
}

fn print_result(result: &ToolResult) -> Result<()> {
    let status = if result.success {
        "ok".green().bold()
    } else {
        "failed".red().bold()
    };
    println!(
        "{} {} ({:.3}s)",
        result.tool_name.bold(),
        status,
        result.execution_time
    );
    if let Some(message) = &result.error_message {
        warn!("{}: {}", result.tool_name, message);
    }
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}
