use clap::Parser;
use color_eyre::{
	eyre::{eyre, Context},
	Result,
};
use config::Config;
use std::{fs, path::Path, sync::Arc};
use taotensor_core::{
	data::DB,
	decoder::{BlockDecoder, DecodeFailure},
	ingester::{IngestError, Ingester},
	network::rpc,
	shutdown::Controller,
	utils::{default_subscriber, install_panic_hooks, json_subscriber, spawn_in_span},
};
use tracing::{error, info, span, trace, Level};

mod config;

fn clean_db_state(path: &str) -> Result<()> {
	if !Path::new(path).exists() {
		return Ok(());
	};
	info!("Cleaning up local state directory");
	Ok(fs::remove_dir_all(path)?)
}

#[cfg(feature = "rocksdb")]
fn open_db(path: &str) -> Result<DB> {
	DB::open(path)
}

#[cfg(not(feature = "rocksdb"))]
fn open_db(_path: &str) -> Result<DB> {
	Ok(DB::default())
}

#[tokio::main]
pub async fn main() -> Result<()> {
	let shutdown = Controller::new();
	let opts = config::CliOpts::parse();
	let config = config::load(&opts)?;

	if config.log_format_json {
		tracing::subscriber::set_global_default(json_subscriber(config.log_level))?;
	} else {
		tracing::subscriber::set_global_default(default_subscriber(config.log_level))?;
	}

	install_panic_hooks(shutdown.clone())?;

	let span = span!(Level::INFO, "run", network = ?config.network);
	let _enter = config.log_format_json.then(|| span.enter());

	spawn_in_span(shutdown.clone().on_user_signal("User signaled shutdown".to_string()));

	if opts.clean {
		clean_db_state(&config.db_path)?;
	};

	let db = open_db(&config.db_path)?;

	run(config, db, shutdown).await
}

fn report(error: &IngestError) {
	let height = error.height();
	match error {
		IngestError::Decode { source, .. } => error!(
			height,
			spec_version = %source.spec_version,
			target = %source.target,
			pallet = source.pallet.as_deref().unwrap_or_default(),
			item = source.item.as_deref().unwrap_or_default(),
			type_hash = ?source.type_hash,
			offset = source.offset(),
			missing_schema = matches!(source.failure, DecodeFailure::Resolution(_)),
			"Ingestion failed: {error}"
		),
		_ => error!(height, "Ingestion failed: {error}"),
	}
}

async fn run(config: Config, db: DB, shutdown: Controller<String>) -> Result<()> {
	let version = clap::crate_version!();
	info!("Running Taotensor ingester v{version}");
	info!("Using configuration: {config:?}");

	let definition = config
		.registry()
		.wrap_err("Unable to load runtime layouts")?;
	let registry = definition.build().wrap_err("Invalid runtime layouts")?;
	let resolver = definition.resolver()?;
	let spec_versions: Vec<_> = registry.spec_versions().collect();
	info!(
		?spec_versions,
		schemas = registry.schema_count(),
		genesis = resolver.genesis_height(),
		"Runtime layouts loaded"
	);

	let client = rpc::Client::new(config.rpc.clone(), shutdown.clone())?;
	let decoder = BlockDecoder::new(Arc::new(registry));
	let mut ingester = Ingester::new(
		client,
		db,
		decoder,
		resolver,
		config.ingest,
		shutdown.clone(),
	);

	let mut state = ingester.subscribe_state();
	spawn_in_span(async move {
		while state.changed().await.is_ok() {
			let current = *state.borrow_and_update();
			trace!(state = %current, "Ingester state changed");
		}
	});

	match ingester.run().await {
		Ok(progress) => {
			info!(
				blocks = progress.blocks,
				last_height = progress.last_height,
				"Ingester finished"
			);
			Ok(())
		},
		Err(error) => {
			report(&error);
			let reason = format!("Ingestion failed at block {}", error.height());
			let _ = shutdown.trigger_shutdown(reason);
			Err(eyre!(error))
		},
	}
}
