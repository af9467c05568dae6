//! Normalized rows produced from decoded blocks.
//!
//! Every row carries a deterministic id derived from the block height, the
//! position of the source item and the block hash, so re-ingesting a block
//! yields the same rows.

use codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::types::{BlockHash, BlockHeight};

#[derive(
	Clone,
	Copy,
	Debug,
	PartialEq,
	Eq,
	Hash,
	PartialOrd,
	Ord,
	Serialize,
	Deserialize,
	Display,
	EnumString,
	EnumIter,
	AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
	Transfer,
	Coldkey,
	Hotkey,
	Neuron,
	NeuronRegistered,
	Difficulty,
	Burn,
	Stake,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Transfer {
	pub id: String,
	pub block_hash: String,
	pub block_num: BlockHeight,
	pub timestamp: u64,
	pub from: String,
	pub to: String,
	/// In rao.
	pub amount: u64,
}

/// Upsert intent for an account seen holding funds.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Coldkey {
	pub id: String,
	pub block_num: BlockHeight,
}

/// Upsert intent for an account seen operating a neuron.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Hotkey {
	pub id: String,
	pub block_num: BlockHeight,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Neuron {
	pub id: String,
	/// Missing on runtimes without subnets.
	pub netuid: Option<u16>,
	pub uid: u32,
	pub hotkey: String,
	pub coldkey: String,
	pub stake: u64,
	pub rank: u64,
	pub incentive: u64,
	pub trust: u64,
	pub consensus: u64,
	pub dividends: u64,
	pub emission: u64,
	/// Dotted IPv4 or IPv6 text, empty when the neuron has not served an axon.
	pub ip: String,
	pub port: u16,
	pub version: u32,
	pub last_update: u64,
	pub block_num: BlockHeight,
	pub timestamp: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct NeuronRegistered {
	pub id: String,
	pub block_num: BlockHeight,
	pub timestamp: u64,
	pub netuid: Option<u16>,
	pub uid: u32,
	pub hotkey: Option<String>,
}

/// Value of a per subnet chain parameter, shared by [`Difficulty`] and [`Burn`] rows.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct ParameterValue {
	pub id: String,
	pub block_num: BlockHeight,
	pub timestamp: u64,
	pub netuid: Option<u16>,
	pub amount: u64,
}

pub type Difficulty = ParameterValue;
pub type Burn = ParameterValue;

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
pub struct Stake {
	pub id: String,
	pub block_num: BlockHeight,
	pub timestamp: u64,
	pub hotkey: String,
	pub amount: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedEntity {
	Transfer(Transfer),
	Coldkey(Coldkey),
	Hotkey(Hotkey),
	Neuron(Neuron),
	NeuronRegistered(NeuronRegistered),
	Difficulty(Difficulty),
	Burn(Burn),
	Stake(Stake),
}

impl NormalizedEntity {
	pub fn kind(&self) -> EntityKind {
		match self {
			NormalizedEntity::Transfer(_) => EntityKind::Transfer,
			NormalizedEntity::Coldkey(_) => EntityKind::Coldkey,
			NormalizedEntity::Hotkey(_) => EntityKind::Hotkey,
			NormalizedEntity::Neuron(_) => EntityKind::Neuron,
			NormalizedEntity::NeuronRegistered(_) => EntityKind::NeuronRegistered,
			NormalizedEntity::Difficulty(_) => EntityKind::Difficulty,
			NormalizedEntity::Burn(_) => EntityKind::Burn,
			NormalizedEntity::Stake(_) => EntityKind::Stake,
		}
	}

	pub fn id(&self) -> &str {
		match self {
			NormalizedEntity::Transfer(Transfer { id, .. })
			| NormalizedEntity::Coldkey(Coldkey { id, .. })
			| NormalizedEntity::Hotkey(Hotkey { id, .. })
			| NormalizedEntity::Neuron(Neuron { id, .. })
			| NormalizedEntity::NeuronRegistered(NeuronRegistered { id, .. })
			| NormalizedEntity::Difficulty(ParameterValue { id, .. })
			| NormalizedEntity::Burn(ParameterValue { id, .. })
			| NormalizedEntity::Stake(Stake { id, .. }) => id,
		}
	}

	/// Subnet and value of sampled parameter rows.
	pub fn sample(&self) -> Option<(EntityKind, u16, u64)> {
		match self {
			NormalizedEntity::Difficulty(value) | NormalizedEntity::Burn(value) => {
				Some((self.kind(), value.netuid.unwrap_or_default(), value.amount))
			},
			_ => None,
		}
	}
}

/// Id of a row produced by the event or extrinsic at `index` within the block.
pub fn item_id(height: BlockHeight, index: u32, hash: &BlockHash) -> String {
	format!("{height:010}-{index:06}-{}", hash.short())
}

pub fn sample_id(height: BlockHeight, netuid: Option<u16>) -> String {
	format!("{height}-{}", netuid.unwrap_or_default())
}

pub fn neuron_id(height: BlockHeight, netuid: Option<u16>, uid: u32) -> String {
	format!("{height:010}-{}-{uid}", netuid.unwrap_or_default())
}
