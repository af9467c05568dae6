use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

use crate::{
	decoder::{
		DecodedBlock, DecodedEvent, DecodedExtrinsic, DecodedHeader, DecodedStorage, FieldsExt,
		Value,
	},
	entity::{
		item_id, neuron_id, sample_id, Coldkey, Hotkey, Neuron, NeuronRegistered,
		NormalizedEntity, ParameterValue, Stake, Transfer,
	},
	registry::{subtensor::SUBTENSOR_PALLET, ItemKind},
	types::{BlockHash, BlockHeight},
	utils::ss58_encode,
};

/// Non fatal outcome of mapping one decoded item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingWarning {
	#[error("No mapping for {kind} {pallet}.{item}")]
	Unmapped {
		kind: ItemKind,
		pallet: String,
		item: String,
	},
	#[error("Field {field} of {pallet}.{item} is missing or has an unexpected type")]
	Shape {
		pallet: String,
		item: String,
		field: String,
	},
}

pub type MappingResult = Result<NormalizedEntity, MappingWarning>;

/// Lazy sequence of the rows of one block.
pub struct EntityStream<'a> {
	items: Box<dyn Iterator<Item = MappingResult> + Send + 'a>,
}

impl Iterator for EntityStream<'_> {
	type Item = MappingResult;

	fn next(&mut self) -> Option<Self::Item> {
		self.items.next()
	}
}

/// Turns decoded blocks into normalized rows.
///
/// Mapping is a pure function of the block, calling [`EntityMapper::map`] again
/// on the same block yields the same rows.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntityMapper;

impl EntityMapper {
	pub fn map<'a>(&self, block: &'a DecodedBlock) -> EntityStream<'a> {
		let context = BlockContext::from(&block.header);
		let calls = block
			.extrinsics
			.iter()
			.flat_map(move |extrinsic| map_call(context, extrinsic));
		let events = block
			.events
			.iter()
			.flat_map(move |event| map_event(context, event));
		let storage = block
			.storage
			.iter()
			.flat_map(move |entry| map_storage(context, entry));

		EntityStream {
			items: Box::new(calls.chain(events).chain(storage)),
		}
	}
}

#[derive(Clone, Copy)]
struct BlockContext {
	height: BlockHeight,
	hash: BlockHash,
	timestamp: u64,
}

impl From<&DecodedHeader> for BlockContext {
	fn from(header: &DecodedHeader) -> Self {
		BlockContext {
			height: header.height,
			hash: header.hash,
			timestamp: header.timestamp,
		}
	}
}

/// Field access that reports the offending field as a [`MappingWarning::Shape`].
struct Item<'a> {
	pallet: &'a str,
	name: &'a str,
	fields: &'a [(String, Value)],
}

impl<'a> Item<'a> {
	fn shape(&self, field: &str) -> MappingWarning {
		MappingWarning::Shape {
			pallet: self.pallet.to_string(),
			item: self.name.to_string(),
			field: field.to_string(),
		}
	}

	fn unmapped(&self, kind: ItemKind) -> MappingWarning {
		MappingWarning::Unmapped {
			kind,
			pallet: self.pallet.to_string(),
			item: self.name.to_string(),
		}
	}

	fn value(&self, name: &str, position: usize) -> Result<&'a Value, MappingWarning> {
		self.fields
			.field_or_position(name, position)
			.ok_or_else(|| self.shape(name))
	}

	fn convert<T>(
		&self,
		name: &str,
		position: usize,
		convert: impl Fn(&Value) -> Option<T>,
	) -> Result<T, MappingWarning> {
		convert(self.value(name, position)?).ok_or_else(|| self.shape(name))
	}

	fn u64(&self, name: &str, position: usize) -> Result<u64, MappingWarning> {
		self.convert(name, position, Value::as_u64)
	}

	fn u32(&self, name: &str, position: usize) -> Result<u32, MappingWarning> {
		self.convert(name, position, Value::as_u32)
	}

	fn u16(&self, name: &str, position: usize) -> Result<u16, MappingWarning> {
		self.convert(name, position, Value::as_u16)
	}

	fn account(&self, name: &str, position: usize) -> Result<String, MappingWarning> {
		self.convert(name, position, |value| {
			value.as_account_id().map(|account| ss58_encode(&account))
		})
	}
}

fn collect(result: Result<Vec<NormalizedEntity>, MappingWarning>) -> Vec<MappingResult> {
	match result {
		Ok(entities) => entities.into_iter().map(Ok).collect(),
		Err(warning) => vec![Err(warning)],
	}
}

fn map_event(context: BlockContext, decoded: &DecodedEvent) -> Vec<MappingResult> {
	let event = &decoded.event;
	let item = Item {
		pallet: &event.pallet,
		name: &event.name,
		fields: &event.fields,
	};
	let id = item_id(context.height, decoded.index, &context.hash);

	collect(match (item.pallet, item.name) {
		("Balances", "Transfer") => transfer(context, &item, id),
		(SUBTENSOR_PALLET, "NeuronRegistered") => neuron_registered(context, &item, id),
		(SUBTENSOR_PALLET, "DifficultySet") => {
			parameter(context, &item, id).map(|value| vec![NormalizedEntity::Difficulty(value)])
		},
		(SUBTENSOR_PALLET, "BurnSet") => {
			parameter(context, &item, id).map(|value| vec![NormalizedEntity::Burn(value)])
		},
		(SUBTENSOR_PALLET, "StakeAdded") => stake_added(context, &item, id),
		_ => Err(item.unmapped(ItemKind::Event)),
	})
}

fn map_call(context: BlockContext, extrinsic: &DecodedExtrinsic) -> Vec<MappingResult> {
	let call = &extrinsic.call;
	let item = Item {
		pallet: &call.pallet,
		name: &call.name,
		fields: &call.fields,
	};

	collect(match (item.pallet, item.name) {
		(SUBTENSOR_PALLET, "add_stake") => item.account("hotkey", 0).map(|hotkey| {
			vec![NormalizedEntity::Hotkey(Hotkey {
				id: hotkey,
				block_num: context.height,
			})]
		}),
		_ => Err(item.unmapped(ItemKind::Call)),
	})
}

fn map_storage(context: BlockContext, entry: &DecodedStorage) -> Vec<MappingResult> {
	let keys = Item {
		pallet: &entry.pallet,
		name: &entry.item,
		fields: &entry.keys,
	};
	let netuid = entry
		.keys
		.field("netuid")
		.map(|value| value.as_u16().ok_or_else(|| keys.shape("netuid")))
		.transpose();
	let netuid = match netuid {
		Ok(netuid) => netuid,
		Err(warning) => return vec![Err(warning)],
	};

	let value = Item {
		fields: entry.value.as_deref().unwrap_or_default(),
		..keys
	};
	collect(match (value.pallet, value.name) {
		(SUBTENSOR_PALLET, "Difficulty") => sample(context, &value, netuid, entry.value.is_some())
			.map(|value| vec![NormalizedEntity::Difficulty(value)]),
		(SUBTENSOR_PALLET, "Burn") => sample(context, &value, netuid, entry.value.is_some())
			.map(|value| vec![NormalizedEntity::Burn(value)]),
		(SUBTENSOR_PALLET, "Neurons") if entry.value.is_none() => Ok(vec![]),
		(SUBTENSOR_PALLET, "Neurons") => neuron(context, &keys, &value, netuid),
		_ => Err(value.unmapped(ItemKind::Storage)),
	})
}

fn transfer(
	context: BlockContext,
	item: &Item,
	id: String,
) -> Result<Vec<NormalizedEntity>, MappingWarning> {
	let from = item.account("from", 0)?;
	let to = item.account("to", 1)?;
	let amount = item.u64("amount", 2)?;

	Ok(vec![
		NormalizedEntity::Coldkey(Coldkey {
			id: from.clone(),
			block_num: context.height,
		}),
		NormalizedEntity::Coldkey(Coldkey {
			id: to.clone(),
			block_num: context.height,
		}),
		NormalizedEntity::Transfer(Transfer {
			id,
			block_hash: context.hash.to_string(),
			block_num: context.height,
			timestamp: context.timestamp,
			from,
			to,
			amount,
		}),
	])
}

fn neuron_registered(
	context: BlockContext,
	item: &Item,
	id: String,
) -> Result<Vec<NormalizedEntity>, MappingWarning> {
	// subnet runtimes report (netuid, uid, hotkey), earlier ones the uid only
	let (netuid, uid, hotkey) = match item.fields.len() {
		1 => (None, item.u32("uid", 0)?, None),
		_ => (
			Some(item.u16("netuid", 0)?),
			item.u32("uid", 1)?,
			Some(item.account("hotkey", 2)?),
		),
	};

	let mut entities = vec![];
	if let Some(hotkey) = &hotkey {
		entities.push(NormalizedEntity::Hotkey(Hotkey {
			id: hotkey.clone(),
			block_num: context.height,
		}));
	}
	entities.push(NormalizedEntity::NeuronRegistered(NeuronRegistered {
		id,
		block_num: context.height,
		timestamp: context.timestamp,
		netuid,
		uid,
		hotkey,
	}));
	Ok(entities)
}

fn parameter(
	context: BlockContext,
	item: &Item,
	id: String,
) -> Result<ParameterValue, MappingWarning> {
	let (netuid, amount) = match item.fields.len() {
		1 => (None, item.u64("value", 0)?),
		_ => (Some(item.u16("netuid", 0)?), item.u64("value", 1)?),
	};
	Ok(ParameterValue {
		id,
		block_num: context.height,
		timestamp: context.timestamp,
		netuid,
		amount,
	})
}

fn stake_added(
	context: BlockContext,
	item: &Item,
	id: String,
) -> Result<Vec<NormalizedEntity>, MappingWarning> {
	let hotkey = item.account("hotkey", 0)?;
	let amount = item.u64("amount", 1)?;
	Ok(vec![
		NormalizedEntity::Hotkey(Hotkey {
			id: hotkey.clone(),
			block_num: context.height,
		}),
		NormalizedEntity::Stake(Stake {
			id,
			block_num: context.height,
			timestamp: context.timestamp,
			hotkey,
			amount,
		}),
	])
}

/// Missing storage values read as the type default.
fn sample(
	context: BlockContext,
	item: &Item,
	netuid: Option<u16>,
	stored: bool,
) -> Result<ParameterValue, MappingWarning> {
	let amount = if stored { item.u64("value", 0)? } else { 0 };
	Ok(ParameterValue {
		id: sample_id(context.height, netuid),
		block_num: context.height,
		timestamp: context.timestamp,
		netuid,
		amount,
	})
}

fn ip_address(ip: u128, ip_type: u8) -> String {
	match (ip, ip_type) {
		(0, _) => String::new(),
		(ip, 4) => u32::try_from(ip)
			.map(|ip| Ipv4Addr::from(ip).to_string())
			.unwrap_or_else(|_| Ipv6Addr::from(ip).to_string()),
		(ip, _) => Ipv6Addr::from(ip).to_string(),
	}
}

fn neuron(
	context: BlockContext,
	keys: &Item,
	value: &Item,
	netuid: Option<u16>,
) -> Result<Vec<NormalizedEntity>, MappingWarning> {
	let uid = match keys.fields.field("uid") {
		Some(_) => keys.u32("uid", 0)?,
		None => value.u32("uid", 4)?,
	};
	let hotkey = value.account("hotkey", 6)?;
	let coldkey = value.account("coldkey", 7)?;
	let ip = value.convert("ip", 1, Value::as_u128)?;
	let ip_type = value.convert("ip_type", 3, |value| {
		value.as_u128().and_then(|ip_type| u8::try_from(ip_type).ok())
	})?;

	Ok(vec![
		NormalizedEntity::Hotkey(Hotkey {
			id: hotkey.clone(),
			block_num: context.height,
		}),
		NormalizedEntity::Coldkey(Coldkey {
			id: coldkey.clone(),
			block_num: context.height,
		}),
		NormalizedEntity::Neuron(Neuron {
			id: neuron_id(context.height, netuid, uid),
			netuid,
			uid,
			hotkey,
			coldkey,
			stake: value.u64("stake", 11)?,
			rank: value.u64("rank", 12)?,
			incentive: value.u64("incentive", 15)?,
			trust: value.u64("trust", 13)?,
			consensus: value.u64("consensus", 14)?,
			dividends: value.u64("dividends", 16)?,
			emission: value.u64("emission", 17)?,
			ip: ip_address(ip, ip_type),
			port: value.u16("port", 2)?,
			version: value.u32("version", 0)?,
			last_update: value.u64("last_update", 9)?,
			block_num: context.height,
			timestamp: context.timestamp,
		}),
	])
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		decoder::{tests::FROM, tests::TO, DecodedItem, Fields},
		entity::EntityKind,
		registry::TypeHash,
		types::{Phase, SpecVersion},
	};

	const HOTKEY: [u8; 32] = [7u8; 32];

	fn block(events: Vec<DecodedEvent>, storage: Vec<DecodedStorage>) -> DecodedBlock {
		DecodedBlock {
			header: DecodedHeader {
				height: 150,
				hash: BlockHash([0xab; 32]),
				parent_hash: BlockHash([0xaa; 32]),
				timestamp: 1_700_000_000_000,
			},
			spec_version: SpecVersion(120),
			extrinsics: vec![],
			events,
			storage,
			skipped: vec![],
		}
	}

	fn event(index: u32, pallet: &str, name: &str, fields: Fields) -> DecodedEvent {
		DecodedEvent {
			index,
			phase: Phase::ApplyExtrinsic(1),
			topics: vec![],
			event: DecodedItem {
				kind: ItemKind::Event,
				pallet: pallet.to_string(),
				name: name.to_string(),
				type_hash: TypeHash([0u8; 32]),
				fields,
			},
		}
	}

	fn named(fields: Vec<(&str, Value)>) -> Fields {
		fields
			.into_iter()
			.map(|(name, value)| (name.to_string(), value))
			.collect()
	}

	fn positional(values: Vec<Value>) -> Fields {
		values
			.into_iter()
			.enumerate()
			.map(|(position, value)| (position.to_string(), value))
			.collect()
	}

	fn entities(block: &DecodedBlock) -> Vec<NormalizedEntity> {
		EntityMapper.map(block).filter_map(Result::ok).collect()
	}

	#[test]
	fn transfer_yields_transfer_and_coldkeys() {
		let fields = named(vec![
			("from", Value::AccountId(FROM)),
			("to", Value::AccountId(TO)),
			("amount", Value::U64(1_000_000_000)),
		]);
		let block = block(vec![event(4, "Balances", "Transfer", fields)], vec![]);

		let entities = entities(&block);
		assert_eq!(entities.len(), 3);
		let NormalizedEntity::Transfer(transfer) = &entities[2] else {
			panic!("expected a transfer, got {:?}", entities[2]);
		};
		assert_eq!(transfer.amount, 1_000_000_000);
		assert_eq!(transfer.from, "5F4tQyWrhfGVcNhoqeiNsR6KjD4wMZ2kfhLj4oHYuyHbZAc3");
		assert_eq!(transfer.to, "5Ccmf1dJKzGtXX7h17eN72MVMRsFwvYjPVmkXPUaapczECf6");
		assert_eq!(transfer.id, "0000000150-000004-ababa");
		assert_eq!(entities[0].id(), transfer.from);
		assert_eq!(entities[1].id(), transfer.to);
		assert_eq!(entities[0].kind(), EntityKind::Coldkey);
	}

	#[test]
	fn positional_transfer_maps_the_same() {
		let named = block(
			vec![event(
				4,
				"Balances",
				"Transfer",
				named(vec![
					("from", Value::AccountId(FROM)),
					("to", Value::AccountId(TO)),
					("amount", Value::U64(5)),
				]),
			)],
			vec![],
		);
		let positional = block(
			vec![event(
				4,
				"Balances",
				"Transfer",
				positional(vec![Value::AccountId(FROM), Value::AccountId(TO), Value::U64(5)]),
			)],
			vec![],
		);
		assert_eq!(entities(&named), entities(&positional));
	}

	#[test]
	fn neuron_registration_layouts() {
		let subnet = block(
			vec![event(
				1,
				SUBTENSOR_PALLET,
				"NeuronRegistered",
				positional(vec![Value::U16(3), Value::U16(12), Value::AccountId(HOTKEY)]),
			)],
			vec![],
		);
		let entities_subnet = entities(&subnet);
		assert_eq!(entities_subnet[0].kind(), EntityKind::Hotkey);
		let NormalizedEntity::NeuronRegistered(registered) = &entities_subnet[1] else {
			panic!("expected a registration");
		};
		assert_eq!((registered.netuid, registered.uid), (Some(3), 12));
		assert_eq!(registered.hotkey.as_deref(), Some(entities_subnet[0].id()));

		let legacy = block(
			vec![event(1, SUBTENSOR_PALLET, "NeuronRegistered", positional(vec![Value::U32(9)]))],
			vec![],
		);
		let entities_legacy = entities(&legacy);
		assert_eq!(entities_legacy.len(), 1);
		let NormalizedEntity::NeuronRegistered(registered) = &entities_legacy[0] else {
			panic!("expected a registration");
		};
		assert_eq!((registered.netuid, registered.uid, registered.hotkey.clone()), (None, 9, None));
	}

	#[test]
	fn difficulty_set_yields_difficulty() {
		let block = block(
			vec![event(
				2,
				SUBTENSOR_PALLET,
				"DifficultySet",
				positional(vec![Value::U16(1), Value::U64(10_000)]),
			)],
			vec![],
		);
		let entities = entities(&block);
		assert_eq!(entities.len(), 1);
		assert_eq!(entities[0].sample(), Some((EntityKind::Difficulty, 1, 10_000)));
	}

	#[test]
	fn stake_added_yields_stake_and_hotkey() {
		let block = block(
			vec![event(
				2,
				SUBTENSOR_PALLET,
				"StakeAdded",
				positional(vec![Value::AccountId(HOTKEY), Value::U64(77)]),
			)],
			vec![],
		);
		let kinds: Vec<_> = entities(&block).iter().map(NormalizedEntity::kind).collect();
		assert_eq!(kinds, vec![EntityKind::Hotkey, EntityKind::Stake]);
	}

	#[test]
	fn warnings_do_not_stop_mapping() {
		let block = block(
			vec![
				event(0, "System", "ExtrinsicSuccess", vec![]),
				event(1, "Balances", "Transfer", positional(vec![Value::AccountId(FROM)])),
				event(
					2,
					SUBTENSOR_PALLET,
					"BurnSet",
					positional(vec![Value::U16(1), Value::U64(3)]),
				),
			],
			vec![],
		);
		let results: Vec<_> = EntityMapper.map(&block).collect();
		assert_eq!(results.len(), 3);
		assert!(matches!(
			&results[0],
			Err(MappingWarning::Unmapped {
				kind: ItemKind::Event,
				item,
				..
			}) if item == "ExtrinsicSuccess"
		));
		assert!(matches!(
			&results[1],
			Err(MappingWarning::Shape { field, .. }) if field == "to"
		));
		assert!(results[2].is_ok());
	}

	#[test]
	fn mapping_is_restartable() {
		let block = block(
			vec![event(
				4,
				"Balances",
				"Transfer",
				positional(vec![Value::AccountId(FROM), Value::AccountId(TO), Value::U64(5)]),
			)],
			vec![],
		);
		let first: Vec<_> = EntityMapper.map(&block).collect();
		let second: Vec<_> = EntityMapper.map(&block).collect();
		assert_eq!(first, second);
	}

	#[test]
	fn storage_samples() {
		let entry = |item: &str, value: Option<u64>| DecodedStorage {
			pallet: SUBTENSOR_PALLET.into(),
			item: item.into(),
			type_hash: TypeHash([0u8; 32]),
			keys: named(vec![("netuid", Value::U16(11))]),
			value: value.map(|value| named(vec![("value", Value::U64(value))])),
		};
		let block = block(vec![], vec![entry("Burn", Some(1_000)), entry("Difficulty", None)]);
		let entities = entities(&block);
		assert_eq!(entities[0].id(), "150-11");
		assert_eq!(entities[0].sample(), Some((EntityKind::Burn, 11, 1_000)));
		assert_eq!(entities[1].sample(), Some((EntityKind::Difficulty, 11, 0)));
	}

	#[test]
	fn neuron_storage_yields_neuron_and_keys() {
		let metadata = named(vec![
			("version", Value::U32(2)),
			("ip", Value::U128(0x7f00_0001)),
			("port", Value::U16(8091)),
			("ip_type", Value::U8(4)),
			("uid", Value::U32(5)),
			("modality", Value::U8(0)),
			("hotkey", Value::AccountId(HOTKEY)),
			("coldkey", Value::AccountId(FROM)),
			("active", Value::U32(1)),
			("last_update", Value::U64(140)),
			("priority", Value::U64(0)),
			("stake", Value::U64(1_000)),
			("rank", Value::U64(1)),
			("trust", Value::U64(2)),
			("consensus", Value::U64(3)),
			("incentive", Value::U64(4)),
			("dividends", Value::U64(5)),
			("emission", Value::U64(6)),
		]);
		let entry = DecodedStorage {
			pallet: SUBTENSOR_PALLET.into(),
			item: "Neurons".into(),
			type_hash: TypeHash([0u8; 32]),
			keys: named(vec![("uid", Value::U32(5))]),
			value: Some(metadata),
		};
		let block = block(vec![], vec![entry]);
		let entities = entities(&block);
		assert_eq!(entities.len(), 3);
		let NormalizedEntity::Neuron(neuron) = &entities[2] else {
			panic!("expected a neuron");
		};
		assert_eq!(neuron.id, "0000000150-0-5");
		assert_eq!(neuron.ip, "127.0.0.1");
		assert_eq!((neuron.stake, neuron.incentive, neuron.emission), (1_000, 4, 6));
		assert_eq!(neuron.coldkey, entities[1].id());
	}
}
