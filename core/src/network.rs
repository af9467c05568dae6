use async_stream::stream;
use async_trait::async_trait;
use futures::Stream;
use mockall::automock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{BlockHash, BlockHeight, RawExtrinsic, RawHeader, SpecVersion};

pub mod rpc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
	#[error("Transient fetch failure: {0}")]
	Transient(String),
	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },
	#[error("Malformed node response: {0}")]
	Malformed(String),
	#[error("{0} not found on the node")]
	NotFound(String),
	#[error("Retries exhausted on every node: {0}")]
	Exhausted(String),
	#[error("Fetch halted due to shutdown: {0}")]
	Shutdown(String),
}

impl FetchError {
	/// Only transient failures are worth retrying.
	pub fn is_transient(&self) -> bool {
		matches!(self, FetchError::Transient(_))
	}
}

/// Header and extrinsics of a block as served by the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeBlock {
	pub header: RawHeader,
	pub extrinsics: Vec<RawExtrinsic>,
}

/// Read access to a chain node.
#[automock]
#[async_trait]
pub trait ChainNode: Send + Sync {
	async fn block_hash(&self, height: BlockHeight) -> Result<BlockHash, FetchError>;

	async fn block(&self, hash: BlockHash) -> Result<NodeBlock, FetchError>;

	/// Encoded `System.Events` value, [`None`] when the block emitted no events.
	async fn events(&self, hash: BlockHash) -> Result<Option<Vec<u8>>, FetchError>;

	async fn storage(&self, hash: BlockHash, key: Vec<u8>) -> Result<Option<Vec<u8>>, FetchError>;

	async fn runtime_version(&self, hash: BlockHash) -> Result<SpecVersion, FetchError>;

	async fn finalized_height(&self) -> Result<BlockHeight, FetchError>;
}

/// Polls the node and yields every newly finalized height once, in order.
pub fn finalized_heights<N: ChainNode + ?Sized>(
	node: &N,
	from: BlockHeight,
	poll_interval: Duration,
) -> impl Stream<Item = Result<BlockHeight, FetchError>> + '_ {
	stream! {
		let mut next = from;
		let mut interval = tokio::time::interval(poll_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			interval.tick().await;
			match node.finalized_height().await {
				Ok(finalized) => {
					debug!(finalized, next, "Polled finalized height");
					while next <= finalized {
						yield Ok(next);
						next += 1;
					}
				},
				Err(error) if error.is_transient() => {
					warn!(%error, "Polling finalized height failed");
				},
				Err(error) => {
					yield Err(error);
					return;
				},
			}
		}
	}
}
