//! Block ingestion driver.
//!
//! Heights are fetched ahead of processing within a bounded window, but resolved,
//! decoded, mapped and persisted strictly in height order. Shutdown is honored
//! only between blocks, so a block is either fully persisted or not at all.

use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, time::Duration};
use strum::Display;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::{
	data::{DataError, EntitySink, LedgerEntry},
	decoder::{BlockDecoder, DecodeError, Fields, PartialDecodePolicy, StorageQuery, Value},
	entity::{sample_id, NormalizedEntity},
	mapper::{EntityMapper, MappingWarning},
	network::{finalized_heights, ChainNode, FetchError},
	registry::{subtensor::SUBTENSOR_PALLET, ItemKind, ResolutionError},
	resolver::{Resolution, SpecResolver},
	shutdown::Controller,
	types::{duration_millis_format, BlockHeight, RawBlock, RawExtrinsic, RawHeader, SpecVersion},
	utils::is_sampling_height,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
pub enum IngestState {
	Idle,
	Fetching,
	Decoding,
	Persisting,
	Failed,
	Stopped,
}

/// Periodic reads of chain parameters out of storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
	/// Sample every `interval` blocks, 0 disables sampling (default: 50).
	pub interval: u32,
	/// Pallet of the sampled items (default: SubtensorModule).
	pub pallet: String,
	/// Sampled storage items (default: ["Burn", "Difficulty"]).
	pub items: Vec<String>,
	/// Subnets read for items keyed by `netuid` (default: [1, 3, 11, 21]).
	pub netuids: Vec<u16>,
	/// Neuron uids read for items keyed by `uid` (default: []).
	pub neuron_uids: Vec<u32>,
	/// Values never persisted as samples (default: powers of ten from 1e10 to 1e19).
	pub skip_values: Vec<u64>,
}

impl Default for SamplingConfig {
	fn default() -> Self {
		Self {
			interval: 50,
			pallet: SUBTENSOR_PALLET.to_string(),
			items: vec!["Burn".to_string(), "Difficulty".to_string()],
			netuids: vec![1, 3, 11, 21],
			neuron_uids: vec![],
			skip_values: (10..=19).map(|exponent| 10u64.pow(exponent)).collect(),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestMode {
	/// Ingests up to `until`, or up to the finalized head at start when not set.
	Backfill { until: Option<BlockHeight> },
	/// Follows the finalized head until shutdown.
	LiveTail {
		#[serde(with = "duration_millis_format")]
		poll_interval: Duration,
	},
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
	/// First height to ingest, overrides resuming from the sink.
	pub from: Option<BlockHeight>,
	/// Number of blocks fetched ahead of processing (default: 16).
	pub prefetch_window: usize,
	pub partial_decode: PartialDecodePolicy,
	pub sampling: SamplingConfig,
	pub mode: IngestMode,
}

impl Default for IngestConfig {
	fn default() -> Self {
		Self {
			from: None,
			prefetch_window: 16,
			partial_decode: PartialDecodePolicy::default(),
			sampling: SamplingConfig::default(),
			mode: IngestMode::Backfill { until: None },
		}
	}
}

/// Fatal errors, each one stops ingestion at `height`.
#[derive(Debug, Error)]
pub enum IngestError {
	#[error("Cannot resolve runtime of block {height}: {source}")]
	Resolution {
		height: BlockHeight,
		source: ResolutionError,
	},
	#[error("Cannot decode block {height}: {source}")]
	Decode {
		height: BlockHeight,
		source: DecodeError,
	},
	#[error("Cannot fetch block {height}: {source}")]
	Fetch {
		height: BlockHeight,
		source: FetchError,
	},
	#[error("Cannot persist block {height}: {source}")]
	Persist {
		height: BlockHeight,
		source: DataError,
	},
}

impl IngestError {
	pub fn height(&self) -> BlockHeight {
		match self {
			IngestError::Resolution { height, .. }
			| IngestError::Decode { height, .. }
			| IngestError::Fetch { height, .. }
			| IngestError::Persist { height, .. } => *height,
		}
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestProgress {
	pub blocks: u32,
	pub entities: usize,
	pub last_height: Option<BlockHeight>,
}

/// Everything read from the node for one height.
struct FetchedBlock {
	header: RawHeader,
	extrinsics: Vec<RawExtrinsic>,
	events: Option<Vec<u8>>,
	storage: Vec<(StorageQuery, Option<Vec<u8>>)>,
	/// Runtime version reported by the node, fetched only when it has to be confirmed.
	reported: Option<SpecVersion>,
}

/// Read only part of the pipeline, shared by the concurrent fetches.
struct Prefetch<'a, N: ChainNode> {
	node: &'a N,
	decoder: &'a BlockDecoder,
	sampling: &'a SamplingConfig,
	/// Resolver as of the start of the run, its indexed bound only grows afterwards.
	resolver: SpecResolver,
	confirm_runtime: bool,
}

impl<N: ChainNode> Prefetch<'_, N> {
	async fn fetch(&self, height: BlockHeight) -> Result<FetchedBlock, IngestError> {
		let fetch_error = |source| IngestError::Fetch { height, source };
		let hash = self.node.block_hash(height).await.map_err(fetch_error)?;
		let block = self.node.block(hash).await.map_err(fetch_error)?;
		let events = self.node.events(hash).await.map_err(fetch_error)?;

		let resolution = self.resolver.resolve_height(height);
		let reported = if self.confirm_runtime || resolution == Resolution::Unknown {
			Some(self.node.runtime_version(hash).await.map_err(fetch_error)?)
		} else {
			None
		};

		let mut storage = vec![];
		if let Some(spec_version) = resolution.known().or(reported) {
			if is_sampling_height(height, self.sampling.interval) {
				for query in storage_queries(self.decoder, self.sampling, spec_version) {
					let value = self
						.node
						.storage(hash, query.storage_key.clone())
						.await
						.map_err(fetch_error)?;
					storage.push((query, value));
				}
			}
		}

		trace!(height, %hash, extrinsics = block.extrinsics.len(), "Block fetched");
		Ok(FetchedBlock {
			header: block.header,
			extrinsics: block.extrinsics,
			events,
			storage,
			reported,
		})
	}
}

/// Storage reads of the sampled items registered at `spec_version`, without duplicate keys.
fn storage_queries(
	decoder: &BlockDecoder,
	sampling: &SamplingConfig,
	spec_version: SpecVersion,
) -> Vec<StorageQuery> {
	let netuids: Vec<_> = sampling.netuids.iter().map(|netuid| Some(*netuid)).collect();
	let uids: Vec<_> = sampling.neuron_uids.iter().map(|uid| Some(*uid)).collect();
	let netuids = if netuids.is_empty() { vec![None] } else { netuids };
	let uids = if uids.is_empty() { vec![None] } else { uids };

	let mut seen = HashSet::new();
	let mut queries = vec![];
	for item in &sampling.items {
		let registry = decoder.registry();
		if registry
			.resolve(spec_version, ItemKind::Storage, &sampling.pallet, item)
			.is_err()
		{
			continue;
		}
		for netuid in &netuids {
			for uid in &uids {
				let mut args: Fields = vec![];
				args.extend(netuid.map(|netuid| ("netuid".to_string(), Value::U16(netuid))));
				args.extend(uid.map(|uid| ("uid".to_string(), Value::U32(uid))));

				match decoder.storage_query(spec_version, &sampling.pallet, item, &args) {
					Ok(query) if seen.insert(query.storage_key.clone()) => queries.push(query),
					Ok(_) => {},
					Err(error) => debug!(%error, "Skipping storage sample"),
				}
			}
		}
	}
	queries
}

/// Drives blocks from the node through decoding and mapping into the sink.
pub struct Ingester<N: ChainNode, S: EntitySink> {
	node: N,
	sink: S,
	decoder: BlockDecoder,
	resolver: SpecResolver,
	mapper: EntityMapper,
	config: IngestConfig,
	shutdown: Controller<String>,
	state: watch::Sender<IngestState>,
}

impl<N: ChainNode, S: EntitySink> Ingester<N, S> {
	pub fn new(
		node: N,
		sink: S,
		decoder: BlockDecoder,
		resolver: SpecResolver,
		config: IngestConfig,
		shutdown: Controller<String>,
	) -> Self {
		let (state, _) = watch::channel(IngestState::Idle);
		Ingester {
			node,
			sink,
			decoder,
			resolver,
			mapper: EntityMapper,
			config,
			shutdown,
			state,
		}
	}

	pub fn state(&self) -> IngestState {
		*self.state.borrow()
	}

	pub fn subscribe_state(&self) -> watch::Receiver<IngestState> {
		self.state.subscribe()
	}

	fn set_state(&self, state: IngestState) {
		self.state.send_if_modified(|current| {
			let modified = *current != state;
			*current = state;
			modified
		});
	}

	/// Height the next run starts from.
	pub fn start_height(&self) -> BlockHeight {
		self.config.from.unwrap_or_else(|| {
			self.sink
				.last_persisted_height()
				.map(|height| height + 1)
				.unwrap_or_else(|| self.resolver.genesis_height())
		})
	}

	async fn heights(
		&self,
		from: BlockHeight,
	) -> Result<impl Stream<Item = Result<BlockHeight, IngestError>> + '_, IngestError> {
		match &self.config.mode {
			IngestMode::Backfill { until } => {
				let until = match until {
					Some(until) => *until,
					None => self
						.node
						.finalized_height()
						.await
						.map_err(|source| IngestError::Fetch {
							height: from,
							source,
						})?,
				};
				info!(from, until, "Backfilling blocks");
				Ok(stream::iter((from..=until).map(Ok)).left_stream())
			},
			IngestMode::LiveTail { poll_interval } => {
				info!(from, "Following finalized blocks");
				let mut next = from;
				let heights = finalized_heights(&self.node, from, *poll_interval).map(
					move |height| match height {
						Ok(height) => {
							next = height + 1;
							Ok(height)
						},
						Err(source) => Err(IngestError::Fetch {
							height: next,
							source,
						}),
					},
				);
				Ok(heights.right_stream())
			},
		}
	}

	/// Runs until the configured range is ingested, shutdown is triggered or a block fails.
	pub async fn run(&mut self) -> Result<IngestProgress, IngestError> {
		let result = self.ingest().await;
		match &result {
			Ok(progress) => {
				info!(
					blocks = progress.blocks,
					entities = progress.entities,
					last_height = progress.last_height,
					"Ingestion stopped"
				);
				self.set_state(IngestState::Stopped);
			},
			Err(_) => self.set_state(IngestState::Failed),
		}
		result
	}

	async fn ingest(&mut self) -> Result<IngestProgress, IngestError> {
		let from = self.start_height();
		let mut progress = IngestProgress::default();
		self.set_state(IngestState::Fetching);

		let prefetch = Prefetch {
			node: &self.node,
			decoder: &self.decoder,
			sampling: &self.config.sampling,
			resolver: self.resolver.clone(),
			confirm_runtime: matches!(self.config.mode, IngestMode::LiveTail { .. }),
		};
		let prefetch = &prefetch;
		// resolver updates are collected here while the fetch stream borrows self
		let mut resolver = self.resolver.clone();
		{
			let mut blocks = Box::pin(
				self.heights(from)
					.await?
					.map(|height| async move { prefetch.fetch(height?).await })
					.buffered(self.config.prefetch_window.max(1)),
			);

			loop {
				let next = match self.shutdown.with_cancel(blocks.next()).await {
					Ok(next) => next,
					Err(reason) => {
						info!(%reason, "Stopping ingestion between blocks");
						break;
					},
				};
				let Some(block) = next else {
					break;
				};
				let entities = self.process(&mut resolver, block?)?;
				progress.blocks += 1;
				progress.entities += entities;
				progress.last_height = self.sink.last_persisted_height();
				self.set_state(IngestState::Fetching);
			}
		}
		self.resolver = resolver;
		Ok(progress)
	}

	/// Resolves, decodes, maps and persists one block, returning the number of rows written.
	fn process(
		&self,
		resolver: &mut SpecResolver,
		block: FetchedBlock,
	) -> Result<usize, IngestError> {
		let height = block.header.height;
		let spec_version = match block.reported {
			Some(reported) => resolver.confirm(height, reported),
			None => resolver.resolve(height),
		}
		.map_err(|source| IngestError::Resolution { height, source })?;

		self.set_state(IngestState::Decoding);
		let decode_error = |source| IngestError::Decode { height, source };
		let events = match &block.events {
			Some(blob) => self
				.decoder
				.frame_events(spec_version, blob)
				.map_err(decode_error)?,
			None => vec![],
		};
		let raw = RawBlock {
			header: block.header,
			extrinsics: block.extrinsics,
			events,
			storage: block
				.storage
				.into_iter()
				.map(|(query, value)| query.into_entry(value))
				.collect(),
		};
		let decoded = self
			.decoder
			.decode_items(&raw, spec_version)
			.into_block(self.config.partial_decode)
			.map_err(decode_error)?;

		let mut entities = vec![];
		for result in self.mapper.map(&decoded) {
			match result {
				Ok(entity) if self.keep_sample(height, &entity) => entities.push(entity),
				Ok(entity) => trace!(height, id = entity.id(), "Sample skipped"),
				Err(warning @ MappingWarning::Unmapped { .. }) => {
					debug!(height, %warning, "Item not mapped")
				},
				Err(warning @ MappingWarning::Shape { .. }) => {
					warn!(height, %warning, "Item has an unexpected shape")
				},
			}
		}

		self.set_state(IngestState::Persisting);
		let ledger = LedgerEntry {
			height,
			block_hash: decoded.header.hash,
			spec_version,
			entity_count: entities.len() as u32,
			skipped_items: decoded.skipped.len() as u32,
		};
		self.sink
			.persist_block(ledger, &entities)
			.map_err(|source| IngestError::Persist { height, source })?;

		debug!(height, %spec_version, entities = entities.len(), "Block ingested");
		Ok(entities.len())
	}

	/// Storage samples are kept only when the value changed and is not a placeholder.
	fn keep_sample(&self, height: BlockHeight, entity: &NormalizedEntity) -> bool {
		let Some((kind, netuid, amount)) = entity.sample() else {
			return true;
		};
		if entity.id() != sample_id(height, Some(netuid)) {
			return true;
		}
		if self.config.sampling.skip_values.contains(&amount) {
			return false;
		}
		self.sink
			.latest_sample(kind, netuid)
			.map_or(true, |latest| latest.amount != amount)
	}
}
