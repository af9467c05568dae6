//! Version aware decoding of raw blocks.
//!
//! Every extrinsic, event and storage entry is decoded on its own against the
//! schema registered for the block's runtime version. The per item results are
//! collected into a [`DecodeReport`] and the caller picks a [`PartialDecodePolicy`]
//! to turn it into a [`DecodedBlock`].

use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use thiserror::Error;
use tracing::warn;

pub mod scale;
mod value;

pub use value::*;

use crate::{
	registry::{Field, ItemKind, ResolutionError, ResolvedSchema, TypeHash, VersionRegistry},
	types::{
		BlockHash, BlockHeight, Phase, RawBlock, RawEvent, RawExtrinsic, RawStorageEntry,
		SpecVersion,
	},
	utils::{hash_storage_key, storage_prefix},
};
use scale::{Input, ScaleError};

/// Extrinsic format version understood by the decoder.
pub const EXTRINSIC_VERSION: u8 = 4;
const SIGNED_BIT: u8 = 0b1000_0000;

/// Phase tag, pallet index and variant index.
const MIN_EVENT_RECORD_LEN: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq, derive_more::Display)]
pub enum DecodeTarget {
	#[display("extrinsic {_0}")]
	Extrinsic(u32),
	#[display("event {_0}")]
	Event(u32),
	#[display("storage entry {_0}")]
	Storage(u32),
	#[display("event records")]
	EventRecords,
	#[display("storage query")]
	StorageQuery,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeFailure {
	#[error(transparent)]
	Resolution(#[from] ResolutionError),
	#[error(transparent)]
	Scale(#[from] ScaleError),
	#[error("Unsupported extrinsic version {0}")]
	UnsupportedVersion(u8),
}

/// Failure to decode one item, with enough context to register the missing schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
	pub spec_version: SpecVersion,
	pub target: DecodeTarget,
	pub pallet: Option<String>,
	pub item: Option<String>,
	pub type_hash: Option<TypeHash>,
	pub failure: DecodeFailure,
}

impl DecodeError {
	fn new(
		spec_version: SpecVersion,
		target: DecodeTarget,
		failure: impl Into<DecodeFailure>,
	) -> Self {
		DecodeError {
			spec_version,
			target,
			pallet: None,
			item: None,
			type_hash: None,
			failure: failure.into(),
		}
	}

	fn with_item(mut self, pallet: &str, item: &str) -> Self {
		self.pallet = Some(pallet.to_string());
		self.item = Some(item.to_string());
		self
	}

	fn with_type_hash(mut self, type_hash: TypeHash) -> Self {
		self.type_hash = Some(type_hash);
		self
	}

	pub fn offset(&self) -> Option<usize> {
		match &self.failure {
			DecodeFailure::Scale(error) => error.offset(),
			_ => None,
		}
	}
}

impl fmt::Display for DecodeError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Failed to decode {} at spec {}", self.target, self.spec_version)?;
		if let (Some(pallet), Some(item)) = (&self.pallet, &self.item) {
			write!(f, " ({pallet}.{item})")?;
		}
		if let Some(type_hash) = &self.type_hash {
			write!(f, " type {type_hash}")?;
		}
		write!(f, ": {}", self.failure)
	}
}

impl std::error::Error for DecodeError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		Some(&self.failure)
	}
}

/// What to do with a block when some of its items failed to decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialDecodePolicy {
	#[default]
	FailBlock,
	/// Keeps the decodable items and records the failures on the block.
	SkipItems,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedItem {
	pub kind: ItemKind,
	pub pallet: String,
	pub name: String,
	pub type_hash: TypeHash,
	pub fields: Fields,
}

impl DecodedItem {
	pub fn is(&self, pallet: &str, name: &str) -> bool {
		self.pallet == pallet && self.name == name
	}

	pub fn field(&self, name: &str) -> Option<&Value> {
		self.fields.field(name)
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedExtrinsic {
	pub index: u32,
	/// Account of the signer, when signed with a plain account address.
	pub signer: Option<[u8; 32]>,
	pub signed: bool,
	pub extra: Fields,
	pub call: DecodedItem,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedEvent {
	pub index: u32,
	pub phase: Phase,
	pub topics: Vec<[u8; 32]>,
	pub event: DecodedItem,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedStorage {
	pub pallet: String,
	pub item: String,
	pub type_hash: TypeHash,
	pub keys: Fields,
	/// Missing when nothing is stored under the key.
	pub value: Option<Fields>,
}

impl DecodedStorage {
	pub fn is(&self, pallet: &str, item: &str) -> bool {
		self.pallet == pallet && self.item == item
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedHeader {
	pub height: BlockHeight,
	pub hash: BlockHash,
	pub parent_hash: BlockHash,
	/// Milliseconds since the unix epoch, 0 when the block carries no timestamp.
	pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedBlock {
	pub header: DecodedHeader,
	pub spec_version: SpecVersion,
	pub extrinsics: Vec<DecodedExtrinsic>,
	pub events: Vec<DecodedEvent>,
	pub storage: Vec<DecodedStorage>,
	/// Items dropped under [`PartialDecodePolicy::SkipItems`].
	pub skipped: Vec<DecodeError>,
}

/// Per item decoding results of one block.
#[derive(Clone, Debug)]
pub struct DecodeReport {
	pub height: BlockHeight,
	pub hash: BlockHash,
	pub parent_hash: BlockHash,
	pub header_timestamp: Option<u64>,
	pub spec_version: SpecVersion,
	pub extrinsics: Vec<Result<DecodedExtrinsic, DecodeError>>,
	pub events: Vec<Result<DecodedEvent, DecodeError>>,
	pub storage: Vec<Result<DecodedStorage, DecodeError>>,
}

impl DecodeReport {
	pub fn errors(&self) -> impl Iterator<Item = &DecodeError> {
		let extrinsics = self.extrinsics.iter().filter_map(|result| result.as_ref().err());
		let events = self.events.iter().filter_map(|result| result.as_ref().err());
		let storage = self.storage.iter().filter_map(|result| result.as_ref().err());
		extrinsics.chain(events).chain(storage)
	}

	pub fn into_block(self, policy: PartialDecodePolicy) -> Result<DecodedBlock, DecodeError> {
		if policy == PartialDecodePolicy::FailBlock {
			if let Some(error) = self.errors().next() {
				return Err(error.clone());
			}
		}

		let mut skipped = vec![];
		let extrinsics = decoded_only(self.height, self.extrinsics, &mut skipped);
		let events = decoded_only(self.height, self.events, &mut skipped);
		let storage = decoded_only(self.height, self.storage, &mut skipped);

		let timestamp = block_timestamp(&extrinsics, &storage)
			.or(self.header_timestamp)
			.unwrap_or_default();

		Ok(DecodedBlock {
			header: DecodedHeader {
				height: self.height,
				hash: self.hash,
				parent_hash: self.parent_hash,
				timestamp,
			},
			spec_version: self.spec_version,
			extrinsics,
			events,
			storage,
			skipped,
		})
	}
}

fn decoded_only<T>(
	height: BlockHeight,
	results: Vec<Result<T, DecodeError>>,
	skipped: &mut Vec<DecodeError>,
) -> Vec<T> {
	results
		.into_iter()
		.filter_map(|result| match result {
			Ok(item) => Some(item),
			Err(error) => {
				warn!(height, %error, "Skipping undecodable item");
				skipped.push(error);
				None
			},
		})
		.collect()
}

/// Block time from the `Timestamp.Now` storage read or the `Timestamp.set` inherent.
fn block_timestamp(extrinsics: &[DecodedExtrinsic], storage: &[DecodedStorage]) -> Option<u64> {
	let from_storage = storage
		.iter()
		.filter(|entry| entry.is("Timestamp", "Now"))
		.find_map(|entry| entry.value.as_ref()?.field("value")?.as_u64());

	from_storage.or_else(|| {
		extrinsics
			.iter()
			.filter(|extrinsic| extrinsic.call.is("Timestamp", "set"))
			.find_map(|extrinsic| extrinsic.call.field("now")?.as_u64())
	})
}

/// Storage read prepared for a runtime version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageQuery {
	pub pallet: String,
	pub item: String,
	/// SCALE encoded key arguments.
	pub key: Vec<u8>,
	/// Full hashed key in the node's storage.
	pub storage_key: Vec<u8>,
}

impl StorageQuery {
	pub fn into_entry(self, value: Option<Vec<u8>>) -> RawStorageEntry {
		RawStorageEntry {
			pallet: self.pallet,
			item: self.item,
			key: self.key,
			value,
		}
	}
}

#[derive(Clone)]
pub struct BlockDecoder {
	registry: Arc<VersionRegistry>,
}

impl BlockDecoder {
	pub fn new(registry: Arc<VersionRegistry>) -> Self {
		BlockDecoder { registry }
	}

	pub fn registry(&self) -> &VersionRegistry {
		&self.registry
	}

	/// Decodes the whole block, failing on the first item that cannot be decoded.
	pub fn decode(
		&self,
		raw: &RawBlock,
		spec_version: SpecVersion,
	) -> Result<DecodedBlock, DecodeError> {
		self.decode_items(raw, spec_version)
			.into_block(PartialDecodePolicy::FailBlock)
	}

	pub fn decode_items(&self, raw: &RawBlock, spec_version: SpecVersion) -> DecodeReport {
		DecodeReport {
			height: raw.header.height,
			hash: raw.header.hash,
			parent_hash: raw.header.parent_hash,
			header_timestamp: raw.header.timestamp,
			spec_version,
			extrinsics: raw
				.extrinsics
				.iter()
				.map(|extrinsic| self.decode_extrinsic(spec_version, extrinsic))
				.collect(),
			events: raw
				.events
				.iter()
				.map(|event| self.decode_event(spec_version, event))
				.collect(),
			storage: raw
				.storage
				.iter()
				.zip(0u32..)
				.map(|(entry, index)| self.decode_storage(spec_version, index, entry))
				.collect(),
		}
	}

	/// Splits the SCALE encoded `System.Events` value into single event records.
	///
	/// Event arguments carry no length prefix, so every event in the block must
	/// have a registered schema to find where the next one starts.
	pub fn frame_events(
		&self,
		spec_version: SpecVersion,
		blob: &[u8],
	) -> Result<Vec<RawEvent>, DecodeError> {
		let records = |failure: ScaleError| {
			DecodeError::new(spec_version, DecodeTarget::EventRecords, failure)
		};

		let mut input = Input::new(blob);
		let count = input.length(MIN_EVENT_RECORD_LEN).map_err(records)?;
		let mut events = Vec::with_capacity(count);

		for index in 0..count as u32 {
			let phase_offset = input.offset();
			let phase = match input.byte().map_err(records)? {
				0 => Phase::ApplyExtrinsic(u32::from_le_bytes(input.array().map_err(records)?)),
				1 => Phase::Finalization,
				2 => Phase::Initialization,
				value => {
					return Err(records(ScaleError::InvalidDiscriminant {
						offset: phase_offset,
						value,
					}))
				},
			};
			let pallet_index = input.byte().map_err(records)?;
			let variant_index = input.byte().map_err(records)?;

			let target = DecodeTarget::Event(index);
			let (pallet, item) = self
				.registry
				.lookup_variant(spec_version, ItemKind::Event, pallet_index, variant_index)
				.map_err(|error| DecodeError::new(spec_version, target.clone(), error))?;
			let ResolvedSchema { type_hash, schema } = self
				.registry
				.resolve(spec_version, ItemKind::Event, pallet, item)
				.map_err(|error| {
					DecodeError::new(spec_version, target.clone(), error).with_item(pallet, item)
				})?;

			let start = input.offset();
			scale::decode_fields(&schema.fields, &mut input).map_err(|error| {
				DecodeError::new(spec_version, target.clone(), error)
					.with_item(pallet, item)
					.with_type_hash(type_hash)
			})?;
			let data = input.consumed_since(start).to_vec();

			let topic_count = input.length(32).map_err(records)?;
			let topics = (0..topic_count)
				.map(|_| input.array::<32>())
				.collect::<Result<Vec<_>, _>>()
				.map_err(records)?;

			events.push(RawEvent {
				index,
				phase,
				pallet_index,
				variant_index,
				data,
				topics,
			});
		}

		input.finish().map_err(records)?;
		Ok(events)
	}

	pub fn decode_extrinsic(
		&self,
		spec_version: SpecVersion,
		raw: &RawExtrinsic,
	) -> Result<DecodedExtrinsic, DecodeError> {
		let error = |failure: DecodeFailure| {
			DecodeError::new(spec_version, DecodeTarget::Extrinsic(raw.index), failure)
		};
		let scale_error = |failure: ScaleError| error(failure.into());

		let mut input = Input::new(&raw.bytes);
		let len_offset = input.offset();
		let len = input.length(1).map_err(scale_error)?;
		if len < input.remaining() {
			return Err(scale_error(ScaleError::TrailingBytes {
				offset: len_offset,
				remaining: input.remaining() - len,
			}));
		}

		let version = input.byte().map_err(scale_error)?;
		if version & !SIGNED_BIT != EXTRINSIC_VERSION {
			return Err(error(DecodeFailure::UnsupportedVersion(version & !SIGNED_BIT)));
		}
		let signed = version & SIGNED_BIT != 0;

		let (signer, extra) = if signed {
			let format = self
				.registry
				.extrinsic_format(spec_version)
				.map_err(|failure| error(failure.into()))?;
			let address = scale::decode(&format.address, &mut input).map_err(scale_error)?;
			scale::decode(&format.signature, &mut input).map_err(scale_error)?;
			let extra = scale::decode_fields(&format.extra, &mut input).map_err(scale_error)?;
			(address.as_account_id(), extra)
		} else {
			(None, vec![])
		};

		let pallet_index = input.byte().map_err(scale_error)?;
		let call_index = input.byte().map_err(scale_error)?;
		let (pallet, item) = self
			.registry
			.lookup_variant(spec_version, ItemKind::Call, pallet_index, call_index)
			.map_err(|failure| error(failure.into()))?;
		let ResolvedSchema { type_hash, schema } = self
			.registry
			.resolve(spec_version, ItemKind::Call, pallet, item)
			.map_err(|failure| error(failure.into()).with_item(pallet, item))?;

		let item_error = |failure: ScaleError| {
			scale_error(failure)
				.with_item(pallet, item)
				.with_type_hash(type_hash)
		};
		let fields = scale::decode_fields(&schema.fields, &mut input).map_err(item_error)?;
		input.finish().map_err(item_error)?;

		Ok(DecodedExtrinsic {
			index: raw.index,
			signer,
			signed,
			extra,
			call: DecodedItem {
				kind: ItemKind::Call,
				pallet: pallet.to_string(),
				name: item.to_string(),
				type_hash,
				fields,
			},
		})
	}

	pub fn decode_event(
		&self,
		spec_version: SpecVersion,
		raw: &RawEvent,
	) -> Result<DecodedEvent, DecodeError> {
		let target = DecodeTarget::Event(raw.index);
		let (pallet, item) = self
			.registry
			.lookup_variant(
				spec_version,
				ItemKind::Event,
				raw.pallet_index,
				raw.variant_index,
			)
			.map_err(|error| DecodeError::new(spec_version, target.clone(), error))?;
		let ResolvedSchema { type_hash, schema } = self
			.registry
			.resolve(spec_version, ItemKind::Event, pallet, item)
			.map_err(|error| {
				DecodeError::new(spec_version, target.clone(), error).with_item(pallet, item)
			})?;
		let fields = scale::decode_exact(&schema.fields, &raw.data).map_err(|error| {
			DecodeError::new(spec_version, target.clone(), error)
				.with_item(pallet, item)
				.with_type_hash(type_hash)
		})?;

		Ok(DecodedEvent {
			index: raw.index,
			phase: raw.phase,
			topics: raw.topics.clone(),
			event: DecodedItem {
				kind: ItemKind::Event,
				pallet: pallet.to_string(),
				name: item.to_string(),
				type_hash,
				fields,
			},
		})
	}

	pub fn decode_storage(
		&self,
		spec_version: SpecVersion,
		index: u32,
		raw: &RawStorageEntry,
	) -> Result<DecodedStorage, DecodeError> {
		let (pallet, item) = (raw.pallet.as_str(), raw.item.as_str());
		let error = |failure: DecodeFailure| {
			DecodeError::new(spec_version, DecodeTarget::Storage(index), failure)
				.with_item(pallet, item)
		};

		let ResolvedSchema { type_hash, schema } = self
			.registry
			.resolve(spec_version, ItemKind::Storage, pallet, item)
			.map_err(|failure| error(failure.into()))?;
		let scale_error = |failure: ScaleError| error(failure.into()).with_type_hash(type_hash);

		let key_fields = schema
			.storage_keys()
			.iter()
			.map(|key| Field::new(&key.name, key.ty.clone()))
			.collect::<Vec<_>>();
		let keys = scale::decode_exact(&key_fields, &raw.key).map_err(scale_error)?;
		let value = raw
			.value
			.as_deref()
			.map(|bytes| scale::decode_exact(&schema.fields, bytes))
			.transpose()
			.map_err(scale_error)?;

		Ok(DecodedStorage {
			pallet: raw.pallet.clone(),
			item: raw.item.clone(),
			type_hash,
			keys,
			value,
		})
	}

	/// Builds the hashed storage key for `pallet.item` with the given key arguments.
	pub fn storage_query(
		&self,
		spec_version: SpecVersion,
		pallet: &str,
		item: &str,
		args: &Fields,
	) -> Result<StorageQuery, DecodeError> {
		let error = |failure: DecodeFailure| {
			DecodeError::new(spec_version, DecodeTarget::StorageQuery, failure)
				.with_item(pallet, item)
		};
		let ResolvedSchema { type_hash, schema } = self
			.registry
			.resolve(spec_version, ItemKind::Storage, pallet, item)
			.map_err(|failure| error(failure.into()))?;

		let mut key = vec![];
		let mut storage_key = storage_prefix(pallet, item).to_vec();
		for key_def in schema.storage_keys() {
			let scale_error = |failure: ScaleError| error(failure.into()).with_type_hash(type_hash);
			let value = args
				.field(&key_def.name)
				.ok_or_else(|| scale_error(ScaleError::MissingField(key_def.name.clone())))?;
			let mut encoded = vec![];
			scale::encode(&key_def.ty, value, &mut encoded).map_err(scale_error)?;
			storage_key.extend(hash_storage_key(key_def.hasher, &encoded));
			key.extend(encoded);
		}

		Ok(StorageQuery {
			pallet: pallet.to_string(),
			item: item.to_string(),
			key,
			storage_key,
		})
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::{
		registry::{
			subtensor::{self, FINNEY_SPEC_VERSION, SUBTENSOR_PALLET},
			PalletDefinition, RegistryDefinition, RuntimeDefinition, StorageKey, StorageHasher,
			TypeDef,
		},
		types::RawHeader,
	};
	use codec::{Compact, Encode};
	use hex_literal::hex;

	pub const FROM: [u8; 32] =
		hex!("84d83d08ca89f8e60424ffa286f165c16dd8752e4faa4d8977221e6720678d28");
	pub const TO: [u8; 32] =
		hex!("1874a43d7c6d888f9eda3d22a3a49704e3cadb240eb80652ef58ffaf4857fa44");

	pub fn finney_decoder() -> BlockDecoder {
		BlockDecoder::new(Arc::new(subtensor::finney().build().unwrap()))
	}

	pub fn header(height: BlockHeight) -> RawHeader {
		RawHeader {
			height,
			hash: BlockHash([0xab; 32]),
			parent_hash: BlockHash([0xaa; 32]),
			timestamp: None,
		}
	}

	pub fn event(index: u32, pallet_index: u8, variant_index: u8, data: Vec<u8>) -> RawEvent {
		RawEvent {
			index,
			phase: Phase::ApplyExtrinsic(1),
			pallet_index,
			variant_index,
			data,
			topics: vec![],
		}
	}

	pub fn transfer_data(from: [u8; 32], to: [u8; 32], amount: u64) -> Vec<u8> {
		(from, to, amount).encode()
	}

	pub fn record(
		phase: Phase,
		pallet_index: u8,
		variant_index: u8,
		data: &[u8],
		topics: Vec<[u8; 32]>,
	) -> Vec<u8> {
		let mut bytes = phase.encode();
		bytes.push(pallet_index);
		bytes.push(variant_index);
		bytes.extend_from_slice(data);
		bytes.extend(topics.encode());
		bytes
	}

	fn extrinsic(index: u32, body: Vec<u8>) -> RawExtrinsic {
		let mut bytes = Compact(body.len() as u32).encode();
		bytes.extend(body);
		RawExtrinsic { index, bytes }
	}

	fn extrinsic_success() -> Vec<u8> {
		// weight { ref_time, proof_size }, class Normal, pays_fee Yes
		let mut data = (Compact(1_000u64), Compact(0u64)).encode();
		data.extend([0, 0]);
		data
	}

	#[test]
	fn frame_event_records() {
		let decoder = finney_decoder();
		let transfer = transfer_data(FROM, TO, 1_000_000_000);
		let mut blob = Compact(2u32).encode();
		blob.extend(record(Phase::ApplyExtrinsic(0), 0, 0, &extrinsic_success(), vec![]));
		blob.extend(record(Phase::ApplyExtrinsic(1), 5, 2, &transfer, vec![[9u8; 32]]));

		let events = decoder.frame_events(FINNEY_SPEC_VERSION, &blob).unwrap();
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].data, extrinsic_success());
		assert_eq!(events[1].index, 1);
		assert_eq!(events[1].phase, Phase::ApplyExtrinsic(1));
		assert_eq!(events[1].data, transfer);
		assert_eq!(events[1].topics, vec![[9u8; 32]]);
	}

	#[test]
	fn framing_fails_on_unregistered_event() {
		let decoder = finney_decoder();
		let mut blob = Compact(1u32).encode();
		blob.extend(record(Phase::Finalization, 5, 9, &[], vec![]));

		let error = decoder.frame_events(FINNEY_SPEC_VERSION, &blob).unwrap_err();
		assert_eq!(error.target, DecodeTarget::Event(0));
		assert!(matches!(
			error.failure,
			DecodeFailure::Resolution(ResolutionError::UnknownVariant { .. })
		));
	}

	#[test]
	fn framing_rejects_trailing_bytes() {
		let decoder = finney_decoder();
		let mut blob = Compact(0u32).encode();
		blob.push(0);
		let error = decoder.frame_events(FINNEY_SPEC_VERSION, &blob).unwrap_err();
		assert_eq!(error.target, DecodeTarget::EventRecords);
		assert_eq!(error.offset(), Some(1));
	}

	#[test]
	fn corrupted_event_is_isolated() {
		let decoder = finney_decoder();
		let mut corrupted = transfer_data(FROM, TO, 5);
		corrupted.push(0xff);
		let raw = RawBlock {
			header: header(10),
			extrinsics: vec![],
			events: vec![
				event(0, 5, 2, transfer_data(FROM, TO, 1)),
				event(1, 5, 2, corrupted),
				event(2, 5, 2, transfer_data(TO, FROM, 2)),
			],
			storage: vec![],
		};

		let report = decoder.decode_items(&raw, FINNEY_SPEC_VERSION);
		let errors: Vec<_> = report.errors().collect();
		assert_eq!(errors.len(), 1);
		assert_eq!(errors[0].target, DecodeTarget::Event(1));
		assert_eq!(errors[0].pallet.as_deref(), Some("Balances"));
		assert_eq!(errors[0].item.as_deref(), Some("Transfer"));
		assert!(errors[0].type_hash.is_some());
		assert_eq!(errors[0].offset(), Some(72));
		assert!(report.events[0].is_ok() && report.events[2].is_ok());

		assert_eq!(
			report.clone().into_block(PartialDecodePolicy::FailBlock).unwrap_err(),
			*errors[0]
		);
		let block = report.into_block(PartialDecodePolicy::SkipItems).unwrap();
		assert_eq!(block.events.len(), 2);
		assert_eq!(block.skipped.len(), 1);
	}

	#[test]
	fn decode_signed_extrinsic() {
		let decoder = finney_decoder();
		let mut body = vec![0x84];
		body.push(0);
		body.extend(FROM);
		body.push(1);
		body.extend([7u8; 64]);
		body.push(0);
		body.extend(Compact(3u32).encode());
		body.extend(Compact(0u32).encode());
		body.extend([subtensor::SUBTENSOR_INDEX, 2]);
		body.extend(TO);
		body.extend(500_000u64.encode());

		let decoded = decoder
			.decode_extrinsic(FINNEY_SPEC_VERSION, &extrinsic(1, body))
			.unwrap();
		assert!(decoded.signed);
		assert_eq!(decoded.signer, Some(FROM));
		assert_eq!(decoded.extra[1], ("nonce".to_string(), Value::Compact(3)));
		assert!(decoded.call.is(SUBTENSOR_PALLET, "add_stake"));
		assert_eq!(decoded.call.field("hotkey"), Some(&Value::AccountId(TO)));
		assert_eq!(decoded.call.field("amount_staked"), Some(&Value::U64(500_000)));
	}

	#[test]
	fn extrinsic_envelope_errors() {
		let decoder = finney_decoder();

		let error = decoder
			.decode_extrinsic(FINNEY_SPEC_VERSION, &extrinsic(0, vec![0x03, 2, 0, 0]))
			.unwrap_err();
		assert_eq!(error.failure, DecodeFailure::UnsupportedVersion(3));

		let mut raw = extrinsic(0, vec![0x04, 2, 0, 0]);
		raw.bytes.push(0);
		let error = decoder.decode_extrinsic(FINNEY_SPEC_VERSION, &raw).unwrap_err();
		assert!(matches!(
			error.failure,
			DecodeFailure::Scale(ScaleError::TrailingBytes { .. })
		));

		let mut raw = extrinsic(0, vec![0x04, 2, 0, 0]);
		raw.bytes.pop();
		let error = decoder.decode_extrinsic(FINNEY_SPEC_VERSION, &raw).unwrap_err();
		assert!(matches!(
			error.failure,
			DecodeFailure::Scale(ScaleError::LengthOverflow { .. })
		));
	}

	#[test]
	fn timestamp_from_inherent() {
		let decoder = finney_decoder();
		let mut body = vec![0x04, subtensor::TIMESTAMP_INDEX, 0];
		body.extend(Compact(1_700_000_000_000u64).encode());
		let raw = RawBlock {
			header: header(10),
			extrinsics: vec![extrinsic(0, body)],
			events: vec![],
			storage: vec![],
		};

		let block = decoder.decode(&raw, FINNEY_SPEC_VERSION).unwrap();
		assert_eq!(block.header.timestamp, 1_700_000_000_000);
		assert!(!block.extrinsics[0].signed);
		assert_eq!(block.extrinsics[0].signer, None);
	}

	#[test]
	fn timestamp_prefers_storage_and_defaults_to_header() {
		let decoder = finney_decoder();
		let mut raw = RawBlock {
			header: header(10),
			extrinsics: vec![],
			events: vec![],
			storage: vec![],
		};
		raw.header.timestamp = Some(42);
		assert_eq!(decoder.decode(&raw, FINNEY_SPEC_VERSION).unwrap().header.timestamp, 42);

		raw.storage.push(RawStorageEntry {
			pallet: "Timestamp".into(),
			item: "Now".into(),
			key: vec![],
			value: Some(99u64.encode()),
		});
		assert_eq!(decoder.decode(&raw, FINNEY_SPEC_VERSION).unwrap().header.timestamp, 99);

		raw.storage.clear();
		raw.header.timestamp = None;
		assert_eq!(decoder.decode(&raw, FINNEY_SPEC_VERSION).unwrap().header.timestamp, 0);
	}

	#[test]
	fn unregistered_version_is_fatal() {
		let decoder = finney_decoder();
		let raw = RawBlock {
			header: header(10),
			extrinsics: vec![],
			events: vec![event(0, 5, 2, transfer_data(FROM, TO, 1))],
			storage: vec![],
		};
		let error = decoder.decode(&raw, SpecVersion(121)).unwrap_err();
		assert_eq!(
			error.failure,
			DecodeFailure::Resolution(ResolutionError::UnknownRuntime(SpecVersion(121)))
		);
	}

	fn difficulty_runtime(
		spec_version: u32,
		activation_height: BlockHeight,
		value: TypeDef,
	) -> RuntimeDefinition {
		RuntimeDefinition::new(spec_version, activation_height).pallet(
			PalletDefinition::new(SUBTENSOR_PALLET, subtensor::SUBTENSOR_INDEX).storage(
				"Difficulty",
				vec![StorageKey {
					name: "netuid".into(),
					hasher: StorageHasher::Identity,
					ty: TypeDef::U16,
				}],
				vec![Field::new("value", value)],
			),
		)
	}

	#[test]
	fn storage_layout_follows_upgrade() {
		let definition = RegistryDefinition {
			indexed_until: None,
			runtimes: vec![
				difficulty_runtime(100, 0, TypeDef::U32),
				difficulty_runtime(105, 105, TypeDef::U64),
			],
		};
		let resolver = definition.resolver().unwrap();
		let decoder = BlockDecoder::new(Arc::new(definition.build().unwrap()));

		let entry = |value: &[u8]| RawStorageEntry {
			pallet: SUBTENSOR_PALLET.into(),
			item: "Difficulty".into(),
			key: hex!("0100").to_vec(),
			value: Some(value.to_vec()),
		};
		let pre_upgrade = entry(&hex!("40420f00"));
		let post_upgrade = entry(&hex!("00e40b5402000000"));

		let spec = resolver.resolve(100).unwrap();
		assert_eq!(spec, SpecVersion(100));
		let decoded = decoder.decode_storage(spec, 0, &pre_upgrade).unwrap();
		assert_eq!(decoded.keys, vec![("netuid".to_string(), Value::U16(1))]);
		assert_eq!(
			decoded.value,
			Some(vec![("value".to_string(), Value::U32(1_000_000))])
		);

		let spec = resolver.resolve(105).unwrap();
		assert_eq!(spec, SpecVersion(105));
		let decoded = decoder.decode_storage(spec, 0, &post_upgrade).unwrap();
		assert_eq!(
			decoded.value,
			Some(vec![("value".to_string(), Value::U64(10_000_000_000))])
		);

		// the old payload no longer fits the upgraded layout
		let error = decoder.decode_storage(spec, 0, &pre_upgrade).unwrap_err();
		assert!(matches!(
			error.failure,
			DecodeFailure::Scale(ScaleError::Eof { .. })
		));
	}

	#[test]
	fn storage_query_key() {
		let decoder = finney_decoder();
		let args = vec![("netuid".to_string(), Value::U16(1))];
		let query = decoder
			.storage_query(FINNEY_SPEC_VERSION, SUBTENSOR_PALLET, "Burn", &args)
			.unwrap();
		assert_eq!(query.key, hex!("0100"));
		assert_eq!(query.storage_key.len(), 34);
		assert_eq!(query.storage_key[..32], storage_prefix(SUBTENSOR_PALLET, "Burn"));
		assert_eq!(query.storage_key[32..], hex!("0100"));

		let error = decoder
			.storage_query(FINNEY_SPEC_VERSION, SUBTENSOR_PALLET, "Burn", &vec![])
			.unwrap_err();
		assert_eq!(
			error.failure,
			DecodeFailure::Scale(ScaleError::MissingField("netuid".into()))
		);
	}
}
