use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::sync::{
	atomic::{AtomicU64, Ordering},
	Arc,
};
use tokio::sync::RwLock;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use super::{configuration::RPCConfig, Node, Nodes};
use crate::{
	network::{ChainNode, FetchError, NodeBlock},
	shutdown::Controller,
	types::{BlockHash, BlockHeight, RawExtrinsic, RawHeader, SpecVersion},
	utils::storage_prefix,
};

/// JSON-RPC client over HTTP, rotating through the configured nodes on failures.
#[derive(Clone)]
pub struct Client {
	http: reqwest::Client,
	nodes: Nodes,
	current: Arc<RwLock<Node>>,
	config: RPCConfig,
	request_id: Arc<AtomicU64>,
	shutdown: Controller<String>,
}

#[derive(Deserialize)]
struct Response {
	#[serde(default)]
	result: Value,
	error: Option<ErrorObject>,
}

#[derive(Deserialize)]
struct ErrorObject {
	code: i64,
	message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeaderResponse {
	parent_hash: BlockHash,
	number: String,
}

#[derive(Deserialize)]
struct BlockResponse {
	block: BlockBody,
}

#[derive(Deserialize)]
struct BlockBody {
	header: HeaderResponse,
	extrinsics: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeVersionResponse {
	spec_version: u32,
}

impl From<reqwest::Error> for FetchError {
	fn from(error: reqwest::Error) -> Self {
		if error.is_decode() {
			FetchError::Malformed(error.to_string())
		} else {
			FetchError::Transient(error.to_string())
		}
	}
}

pub(crate) fn from_hex(value: &str) -> Result<Vec<u8>, FetchError> {
	hex::decode(value.trim_start_matches("0x"))
		.map_err(|error| FetchError::Malformed(format!("{value}: {error}")))
}

fn to_hex(bytes: &[u8]) -> String {
	format!("0x{}", hex::encode(bytes))
}

fn parse_number(number: &str) -> Result<BlockHeight, FetchError> {
	BlockHeight::from_str_radix(number.trim_start_matches("0x"), 16)
		.map_err(|error| FetchError::Malformed(format!("block number {number}: {error}")))
}

fn parse_result<R: DeserializeOwned>(response: Response) -> Result<R, FetchError> {
	if let Some(ErrorObject { code, message }) = response.error {
		return Err(FetchError::Rpc { code, message });
	}
	serde_json::from_value(response.result)
		.map_err(|error| FetchError::Malformed(error.to_string()))
}

impl Client {
	pub fn new(config: RPCConfig, shutdown: Controller<String>) -> Result<Self, FetchError> {
		let nodes = Nodes::new(&config.full_node_http);
		// any node will do for a start, the list is shuffled with an empty current host
		let current = nodes
			.shuffle("")
			.into_iter()
			.next()
			.ok_or_else(|| FetchError::NotFound("configured RPC node".to_string()))?;
		let http = reqwest::Client::builder()
			.timeout(config.request_timeout)
			.build()
			.map_err(|error| FetchError::Malformed(error.to_string()))?;

		info!(host = %current, "Using RPC node");
		Ok(Self {
			http,
			nodes,
			current: Arc::new(RwLock::new(current)),
			config,
			request_id: Arc::new(AtomicU64::new(1)),
			shutdown,
		})
	}

	async fn request<R: DeserializeOwned>(
		&self,
		host: &str,
		method: &str,
		params: Value,
	) -> Result<R, FetchError> {
		let id = self.request_id.fetch_add(1, Ordering::Relaxed);
		let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
		let response = self.http.post(host).json(&body).send().await?;

		let status = response.status();
		if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
			return Err(FetchError::Transient(format!("{method}: HTTP {status}")));
		}
		if !status.is_success() {
			return Err(FetchError::Rpc {
				code: status.as_u16().into(),
				message: format!("{method}: HTTP {status}"),
			});
		}
		parse_result(response.json::<Response>().await?)
	}

	/// Executes the call with the configured retry strategy, moving on to the other
	/// nodes once the retries on the current one are exhausted.
	async fn with_retries<R: DeserializeOwned + Send>(
		&self,
		method: &'static str,
		params: Value,
	) -> Result<R, FetchError> {
		let current = self.current.read().await.clone();
		let others = self
			.nodes
			.shuffle(&current.host)
			.into_iter()
			.filter(|node| *node != current);
		let mut last_error = FetchError::Exhausted(method.to_string());

		for node in std::iter::once(current.clone()).chain(others) {
			let host = node.host.as_str();
			let result = self
				.shutdown
				.with_cancel(RetryIf::spawn(
					self.config.retry.clone(),
					|| self.request::<R>(host, method, params.clone()),
					FetchError::is_transient,
				))
				.await;

			match result {
				Err(reason) => return Err(FetchError::Shutdown(reason)),
				Ok(Ok(value)) => {
					if node != current {
						info!(host, "Switched RPC node");
						*self.current.write().await = node;
					}
					return Ok(value);
				},
				Ok(Err(error)) if error.is_transient() => {
					warn!(host, method, %error, "RPC call failed, trying another node");
					last_error = error;
				},
				Ok(Err(error)) => return Err(error),
			}
		}

		Err(FetchError::Exhausted(last_error.to_string()))
	}

	pub async fn header(&self, hash: BlockHash) -> Result<RawHeader, FetchError> {
		let header: Option<HeaderResponse> = self
			.with_retries("chain_getHeader", json!([hash.to_string()]))
			.await?;
		let header = header.ok_or_else(|| FetchError::NotFound(format!("header {hash}")))?;
		Ok(RawHeader {
			height: parse_number(&header.number)?,
			hash,
			parent_hash: header.parent_hash,
			timestamp: None,
		})
	}
}

#[async_trait]
impl ChainNode for Client {
	async fn block_hash(&self, height: BlockHeight) -> Result<BlockHash, FetchError> {
		let hash: Option<BlockHash> = self
			.with_retries("chain_getBlockHash", json!([height]))
			.await?;
		hash.ok_or_else(|| FetchError::NotFound(format!("block {height}")))
	}

	async fn block(&self, hash: BlockHash) -> Result<NodeBlock, FetchError> {
		let block: Option<BlockResponse> = self
			.with_retries("chain_getBlock", json!([hash.to_string()]))
			.await?;
		let BlockBody { header, extrinsics } = block
			.ok_or_else(|| FetchError::NotFound(format!("block {hash}")))?
			.block;

		let extrinsics = extrinsics
			.iter()
			.zip(0u32..)
			.map(|(bytes, index)| {
				Ok(RawExtrinsic {
					index,
					bytes: from_hex(bytes)?,
				})
			})
			.collect::<Result<Vec<_>, FetchError>>()?;
		let height = parse_number(&header.number)?;
		debug!(height, %hash, extrinsics = extrinsics.len(), "Fetched block");

		Ok(NodeBlock {
			header: RawHeader {
				height,
				hash,
				parent_hash: header.parent_hash,
				timestamp: None,
			},
			extrinsics,
		})
	}

	async fn events(&self, hash: BlockHash) -> Result<Option<Vec<u8>>, FetchError> {
		self.storage(hash, storage_prefix("System", "Events").to_vec())
			.await
	}

	async fn storage(&self, hash: BlockHash, key: Vec<u8>) -> Result<Option<Vec<u8>>, FetchError> {
		let value: Option<String> = self
			.with_retries("state_getStorage", json!([to_hex(&key), hash.to_string()]))
			.await?;
		value.as_deref().map(from_hex).transpose()
	}

	async fn runtime_version(&self, hash: BlockHash) -> Result<SpecVersion, FetchError> {
		let version: RuntimeVersionResponse = self
			.with_retries("state_getRuntimeVersion", json!([hash.to_string()]))
			.await?;
		Ok(SpecVersion(version.spec_version))
	}

	async fn finalized_height(&self) -> Result<BlockHeight, FetchError> {
		let hash: BlockHash = self
			.with_retries("chain_getFinalizedHead", json!([]))
			.await?;
		Ok(self.header(hash).await?.height)
	}
}
