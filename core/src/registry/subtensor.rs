//! Built-in layouts of the Subtensor runtimes.
//!
//! Only the items consumed by the entity mapper are described, together with the
//! `System` and `Timestamp` items present in every block. Pallet and variant
//! indices follow the declaration order of the runtime pallets. A registry file
//! generated from chain metadata replaces these when a complete catalogue is needed.

use super::{
	Field, PalletDefinition, RegistryDefinition, RuntimeDefinition, StorageHasher, StorageKey,
	TypeDef, VariantDef,
};
use crate::types::{BlockHeight, SpecVersion};

pub const SYSTEM_INDEX: u8 = 0;
pub const TIMESTAMP_INDEX: u8 = 2;
pub const BALANCES_INDEX: u8 = 5;
pub const SUBTENSOR_INDEX: u8 = 7;

pub const SUBTENSOR_PALLET: &str = "SubtensorModule";

/// Nakamoto runtime versions with built-in layouts, oldest first.
pub const NAKAMOTO_SPEC_VERSIONS: [SpecVersion; 3] =
	[SpecVersion(100), SpecVersion(102), SpecVersion(105)];

pub const FINNEY_SPEC_VERSION: SpecVersion = SpecVersion(120);

fn unit_variants(names: &[&str]) -> TypeDef {
	TypeDef::Variant(
		names
			.iter()
			.enumerate()
			.map(|(index, name)| VariantDef {
				index: index as u8,
				name: name.to_string(),
				fields: vec![],
			})
			.collect(),
	)
}

fn positional(types: Vec<TypeDef>) -> Vec<Field> {
	types
		.into_iter()
		.enumerate()
		.map(|(position, ty)| Field::new(&position.to_string(), ty))
		.collect()
}

fn identity_key(name: &str, ty: TypeDef) -> StorageKey {
	StorageKey {
		name: name.to_string(),
		hasher: StorageHasher::Identity,
		ty,
	}
}

fn system(weight: TypeDef) -> PalletDefinition {
	let dispatch_info = TypeDef::Composite(vec![
		Field::new("weight", weight),
		Field::new("class", unit_variants(&["Normal", "Operational", "Mandatory"])),
		Field::new("pays_fee", unit_variants(&["Yes", "No"])),
	]);
	PalletDefinition::new("System", SYSTEM_INDEX).event(
		0,
		"ExtrinsicSuccess",
		vec![Field::new("dispatch_info", dispatch_info)],
	)
}

fn timestamp() -> PalletDefinition {
	PalletDefinition::new("Timestamp", TIMESTAMP_INDEX)
		.call(0, "set", vec![Field::new("now", TypeDef::Compact)])
		.storage("Now", vec![], vec![Field::new("value", TypeDef::U64)])
}

fn balances(named: bool) -> PalletDefinition {
	let fields = if named {
		vec![
			Field::new("from", TypeDef::AccountId),
			Field::new("to", TypeDef::AccountId),
			Field::new("amount", TypeDef::U64),
		]
	} else {
		positional(vec![TypeDef::AccountId, TypeDef::AccountId, TypeDef::U64])
	};
	PalletDefinition::new("Balances", BALANCES_INDEX).event(2, "Transfer", fields)
}

fn neuron_metadata() -> Vec<Field> {
	vec![
		Field::new("version", TypeDef::U32),
		Field::new("ip", TypeDef::U128),
		Field::new("port", TypeDef::U16),
		Field::new("ip_type", TypeDef::U8),
		Field::new("uid", TypeDef::U32),
		Field::new("modality", TypeDef::U8),
		Field::new("hotkey", TypeDef::AccountId),
		Field::new("coldkey", TypeDef::AccountId),
		Field::new("active", TypeDef::U32),
		Field::new("last_update", TypeDef::U64),
		Field::new("priority", TypeDef::U64),
		Field::new("stake", TypeDef::U64),
		Field::new("rank", TypeDef::U64),
		Field::new("trust", TypeDef::U64),
		Field::new("consensus", TypeDef::U64),
		Field::new("incentive", TypeDef::U64),
		Field::new("dividends", TypeDef::U64),
		Field::new("emission", TypeDef::U64),
		Field::new(
			"bonds",
			TypeDef::vec(TypeDef::Tuple(vec![TypeDef::U32, TypeDef::U64])),
		),
		Field::new(
			"weights",
			TypeDef::vec(TypeDef::Tuple(vec![TypeDef::U32, TypeDef::U32])),
		),
	]
}

fn nakamoto_subtensor(spec_version: SpecVersion) -> PalletDefinition {
	let pallet = PalletDefinition::new(SUBTENSOR_PALLET, SUBTENSOR_INDEX)
		.event(1, "NeuronRegistered", positional(vec![TypeDef::U32]))
		.event(
			3,
			"StakeAdded",
			positional(vec![TypeDef::AccountId, TypeDef::U64]),
		)
		.call(
			1,
			"add_stake",
			vec![
				Field::new("hotkey", TypeDef::AccountId),
				Field::new("ammount_staked", TypeDef::U64),
			],
		)
		.storage(
			"Neurons",
			vec![identity_key("uid", TypeDef::U32)],
			neuron_metadata(),
		)
		.storage("Difficulty", vec![], vec![Field::new("value", TypeDef::U64)]);

	if spec_version >= SpecVersion(105) {
		pallet.event(16, "DifficultySet", positional(vec![TypeDef::U64]))
	} else {
		pallet
	}
}

fn finney_subtensor() -> PalletDefinition {
	let netuid_value = || {
		(
			vec![identity_key("netuid", TypeDef::U16)],
			vec![Field::new("value", TypeDef::U64)],
		)
	};
	let (burn_keys, burn_fields) = netuid_value();
	let (difficulty_keys, difficulty_fields) = netuid_value();

	PalletDefinition::new(SUBTENSOR_PALLET, SUBTENSOR_INDEX)
		.event(
			2,
			"StakeAdded",
			positional(vec![TypeDef::AccountId, TypeDef::U64]),
		)
		.event(
			5,
			"NeuronRegistered",
			positional(vec![TypeDef::U16, TypeDef::U16, TypeDef::AccountId]),
		)
		.event(
			10,
			"DifficultySet",
			positional(vec![TypeDef::U16, TypeDef::U64]),
		)
		.event(40, "BurnSet", positional(vec![TypeDef::U16, TypeDef::U64]))
		.call(
			2,
			"add_stake",
			vec![
				Field::new("hotkey", TypeDef::AccountId),
				Field::new("amount_staked", TypeDef::U64),
			],
		)
		.storage("Burn", burn_keys, burn_fields)
		.storage("Difficulty", difficulty_keys, difficulty_fields)
}

/// Layout of one Nakamoto runtime version activated at the given height.
pub fn nakamoto_runtime(
	spec_version: SpecVersion,
	activation_height: BlockHeight,
) -> RuntimeDefinition {
	RuntimeDefinition::new(spec_version.0, activation_height)
		.pallet(system(TypeDef::U64))
		.pallet(timestamp())
		.pallet(balances(spec_version >= SpecVersion(102)))
		.pallet(nakamoto_subtensor(spec_version))
}

pub fn finney_runtime(activation_height: BlockHeight) -> RuntimeDefinition {
	let weight = TypeDef::Composite(vec![
		Field::new("ref_time", TypeDef::Compact),
		Field::new("proof_size", TypeDef::Compact),
	]);
	RuntimeDefinition::new(FINNEY_SPEC_VERSION.0, activation_height)
		.pallet(system(weight))
		.pallet(timestamp())
		.pallet(balances(true))
		.pallet(finney_subtensor())
}

/// Finney ran a single indexed runtime from genesis.
pub fn finney() -> RegistryDefinition {
	RegistryDefinition {
		indexed_until: None,
		runtimes: vec![finney_runtime(0)],
	}
}

/// Nakamoto runtimes, activated at the given heights in version order.
pub fn nakamoto(activation_heights: [BlockHeight; 3]) -> RegistryDefinition {
	RegistryDefinition {
		indexed_until: None,
		runtimes: NAKAMOTO_SPEC_VERSIONS
			.iter()
			.zip(activation_heights)
			.map(|(spec_version, height)| nakamoto_runtime(*spec_version, height))
			.collect(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::ItemKind;

	#[test]
	fn transfer_layout_changes_at_102() {
		let registry = nakamoto([0, 100, 200]).build().unwrap();
		let v100 = registry
			.resolve(SpecVersion(100), ItemKind::Event, "Balances", "Transfer")
			.unwrap();
		let v102 = registry
			.resolve(SpecVersion(102), ItemKind::Event, "Balances", "Transfer")
			.unwrap();
		let v105 = registry
			.resolve(SpecVersion(105), ItemKind::Event, "Balances", "Transfer")
			.unwrap();
		assert_ne!(v100.type_hash, v102.type_hash);
		assert_eq!(v102.type_hash, v105.type_hash);
	}

	#[test]
	fn difficulty_set_exists_from_105() {
		let registry = nakamoto([0, 100, 200]).build().unwrap();
		assert!(registry
			.resolve(SpecVersion(102), ItemKind::Event, SUBTENSOR_PALLET, "DifficultySet")
			.is_err());
		assert!(registry
			.resolve(SpecVersion(105), ItemKind::Event, SUBTENSOR_PALLET, "DifficultySet")
			.is_ok());
	}

	#[test]
	fn finney_burn_and_difficulty_share_layout() {
		let registry = finney().build().unwrap();
		let burn = registry
			.resolve(FINNEY_SPEC_VERSION, ItemKind::Storage, SUBTENSOR_PALLET, "Burn")
			.unwrap();
		let difficulty = registry
			.resolve(FINNEY_SPEC_VERSION, ItemKind::Storage, SUBTENSOR_PALLET, "Difficulty")
			.unwrap();
		assert_eq!(burn.type_hash, difficulty.type_hash);
		assert_eq!(
			registry
				.lookup_variant(FINNEY_SPEC_VERSION, ItemKind::Event, SUBTENSOR_INDEX, 40)
				.unwrap(),
			(SUBTENSOR_PALLET, "BurnSet")
		);
	}
}
