use codec::{Decode, Encode};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

/// Block number on the indexed chain.
pub type BlockHeight = u32;

/// Identifier of a runtime's binary schema, bumped by every runtime upgrade.
#[derive(
	Clone,
	Copy,
	Debug,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Encode,
	Decode,
	Serialize,
	Deserialize,
)]
#[serde(transparent)]
pub struct SpecVersion(pub u32);

impl fmt::Display for SpecVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "v{}", self.0)
	}
}

impl From<u32> for SpecVersion {
	fn from(value: u32) -> Self {
		SpecVersion(value)
	}
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Encode, Decode)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
	/// First five hex digits, used as a short tag inside entity identifiers.
	pub fn short(&self) -> String {
		hex::encode(&self.0[..3])[..5].to_string()
	}
}

impl fmt::Display for BlockHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{}", hex::encode(self.0))
	}
}

impl fmt::Debug for BlockHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

impl FromStr for BlockHash {
	type Err = String;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let bytes = hex::decode(value.trim_start_matches("0x")).map_err(|e| e.to_string())?;
		let hash: [u8; 32] = bytes
			.try_into()
			.map_err(|bytes: Vec<u8>| format!("Expected 32 bytes hash, got {}", bytes.len()))?;
		Ok(BlockHash(hash))
	}
}

impl Serialize for BlockHash {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for BlockHash {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = String::deserialize(deserializer)?;
		value.parse().map_err(de::Error::custom)
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHeader {
	pub height: BlockHeight,
	pub hash: BlockHash,
	pub parent_hash: BlockHash,
	/// Milliseconds since the unix epoch, when the source already knows it.
	pub timestamp: Option<u64>,
}

/// Extrinsic bytes exactly as returned by the node, including the length prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawExtrinsic {
	pub index: u32,
	pub bytes: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub enum Phase {
	ApplyExtrinsic(u32),
	Finalization,
	Initialization,
}

/// One framed event record out of `System.Events`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEvent {
	pub index: u32,
	pub phase: Phase,
	pub pallet_index: u8,
	pub variant_index: u8,
	/// Argument bytes of this event only.
	pub data: Vec<u8>,
	pub topics: Vec<[u8; 32]>,
}

/// Storage value read at the block, together with the encoded map key arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawStorageEntry {
	pub pallet: String,
	pub item: String,
	pub key: Vec<u8>,
	pub value: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawBlock {
	pub header: RawHeader,
	pub extrinsics: Vec<RawExtrinsic>,
	pub events: Vec<RawEvent>,
	pub storage: Vec<RawStorageEntry>,
}

pub mod tracing_level_format {
	use serde::{self, Deserialize, Deserializer, Serializer};
	use std::str::FromStr;
	use tracing::Level;

	pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&level.to_string())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = String::deserialize(deserializer)?;
		Level::from_str(&value).map_err(serde::de::Error::custom)
	}
}

pub mod duration_millis_format {
	use super::Duration;
	use serde::{self, Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = u64::deserialize(deserializer)?;
		Ok(Duration::from_millis(value))
	}
}
