use std::path::Path;

use config::PricewatchConfig;
use pricewatch::RuleSpec;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "pricewatch.yaml";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleEntry {
	subscriber_id: String,
	rule: RuleSpec,
}

fn load_config(path: Option<&str>) -> Result<PricewatchConfig, Box<dyn std::error::Error>> {
	let config = match path {
		Some(path) => PricewatchConfig::load(path)?,
		None if Path::new(DEFAULT_CONFIG_PATH).exists() => PricewatchConfig::load(DEFAULT_CONFIG_PATH)?,
		None => PricewatchConfig::default(),
	};
	Ok(config.apply_env()?)
}

fn load_rules(path: &str) -> Result<Vec<RuleEntry>, Box<dyn std::error::Error>> {
	let raw = std::fs::read_to_string(path)?;
	Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let mut args = std::env::args().skip(1);
	let config_path = args.next();
	let rules_path = args.next();

	let config = load_config(config_path.as_deref())?;
	pricewatch::init_logging_with_level(&config.logging.level);
	info!(mode = ?config.feed.mode, symbol = %config.feed.symbol, "starting pricewatch live");

	let handle = runtime::Runtime::start(config)?;

	if let Some(path) = rules_path {
		for entry in load_rules(&path)? {
			match handle.register_rule(&entry.subscriber_id, entry.rule) {
				Ok(rule) => info!(rule_id = rule.id, subscriber = %rule.subscriber_id, "rule loaded"),
				Err(err) => warn!(subscriber = %entry.subscriber_id, error = %err, "rule rejected"),
			}
		}
	}

	let mut monitor = handle.monitor();
	let monitor_task = tokio::spawn(async move {
		loop {
			match monitor.recv().await {
				Ok(sent) => info!(subscriber = %sent.subscriber_id, at = sent.dispatched_at, "notification delivered"),
				Err(RecvError::Lagged(skipped)) => warn!(skipped, "monitor stream lagged"),
				Err(RecvError::Closed) => break,
			}
		}
	});

	if let Err(err) = tokio::signal::ctrl_c().await {
		error!(error = %err, "failed to listen for ctrl-c");
	}

	let report = handle.shutdown().await;
	monitor_task.abort();
	info!(
		ticks = report.pipeline.ticks,
		rejected = report.pipeline.rejected,
		delivered = report.queue.delivered,
		dropped = report.queue.dropped,
		"pricewatch live done"
	);
	Ok(())
}
