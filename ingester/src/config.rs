use std::fs;

use clap::{command, Parser, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use taotensor_core::{
	ingester::{IngestConfig, IngestMode},
	network::rpc::configuration::RPCConfig,
	registry::{subtensor, RegistryDefinition},
	types::{tracing_level_format, BlockHeight},
};
use tracing::Level;

/// Poll interval of the finalized head in follow mode, about half a block.
const FOLLOW_POLL_INTERVAL_MS: u64 = 6000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Network {
	Finney,
	Nakamoto,
}

#[derive(Parser)]
#[command(version)]
pub struct CliOpts {
	/// Sets path to the toml configuration file.
	#[arg(short, long, value_name = "FILE")]
	pub config: Option<String>,
	/// Sets verbosity level.
	#[arg(long)]
	pub verbosity: Option<Level>,
	/// Sets logs format to JSON.
	#[arg(long)]
	pub logs_json: bool,
	/// Cleans DB state.
	#[arg(long)]
	pub clean: bool,
	/// Network whose built-in runtime layouts are used.
	#[arg(short, long, value_enum)]
	pub network: Option<Network>,
	/// First block to ingest, resumes after the last persisted block when not set.
	#[arg(long)]
	pub from: Option<BlockHeight>,
	/// Last block to ingest, defaults to the finalized head.
	#[arg(long, conflicts_with = "follow")]
	pub until: Option<BlockHeight>,
	/// Keeps following the finalized head.
	#[arg(long)]
	pub follow: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Network whose built-in runtime layouts are used (default: finney).
	pub network: Network,
	/// Registry file with runtime layouts, replaces the built-in ones when set.
	pub registry_path: Option<String>,
	/// Activation heights of the Nakamoto spec versions 100, 102 and 105.
	pub nakamoto_activation_heights: Option<[BlockHeight; 3]>,
	/// Log level.
	#[serde(with = "tracing_level_format")]
	pub log_level: Level,
	/// Log format: JSON for `true`, plain text for `false`.
	pub log_format_json: bool,
	/// Database file system path.
	pub db_path: String,
	#[serde(flatten)]
	pub rpc: RPCConfig,
	pub ingest: IngestConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			network: Network::Finney,
			registry_path: None,
			nakamoto_activation_heights: None,
			log_level: Level::INFO,
			log_format_json: false,
			db_path: "taotensor_db".to_string(),
			rpc: Default::default(),
			ingest: Default::default(),
		}
	}
}

impl Config {
	pub fn registry(&self) -> Result<RegistryDefinition> {
		if let Some(path) = &self.registry_path {
			return Ok(RegistryDefinition::from_file(path)?);
		}
		match self.network {
			Network::Finney => Ok(subtensor::finney()),
			Network::Nakamoto => self
				.nakamoto_activation_heights
				.map(subtensor::nakamoto)
				.ok_or_else(|| {
					eyre!("Nakamoto requires `nakamoto_activation_heights` or a registry file")
				}),
		}
	}
}

pub fn load(opts: &CliOpts) -> Result<Config> {
	let mut config: Config = match &opts.config {
		Some(path) => {
			fs::metadata(path)?;
			confy::load_path(path)?
		},
		None => Config::default(),
	};

	config.log_level = opts.verbosity.unwrap_or(config.log_level);
	config.log_format_json = opts.logs_json || config.log_format_json;
	config.network = opts.network.unwrap_or(config.network);
	config.ingest.from = opts.from.or(config.ingest.from);

	if opts.follow {
		config.ingest.mode = IngestMode::LiveTail {
			poll_interval: std::time::Duration::from_millis(FOLLOW_POLL_INTERVAL_MS),
		};
	} else if opts.until.is_some() {
		config.ingest.mode = IngestMode::Backfill { until: opts.until };
	}

	if config.rpc.full_node_http.is_empty() {
		return Err(eyre!("At least one node must be set in `full_node_http`"));
	}

	Ok(config)
}
