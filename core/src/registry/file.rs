use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use tracing::info;

use super::{
	ExtrinsicFormat, Field, ItemKind, RegistryError, StorageKey, TypeHash, TypeSchema,
	VersionRegistry,
};
use crate::{
	resolver::{ActivationRange, SpecResolver},
	types::{BlockHeight, SpecVersion},
};

/// Serialized form of a registry, one entry per runtime version.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDefinition {
	/// Last height the activation table is known to cover, unbounded when missing.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub indexed_until: Option<BlockHeight>,
	pub runtimes: Vec<RuntimeDefinition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeDefinition {
	pub spec_version: SpecVersion,
	/// First block executed with this runtime.
	pub activation_height: BlockHeight,
	#[serde(default)]
	pub extrinsic: ExtrinsicFormat,
	pub pallets: Vec<PalletDefinition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalletDefinition {
	pub name: String,
	pub index: u8,
	#[serde(default)]
	pub calls: Vec<VariantItem>,
	#[serde(default)]
	pub events: Vec<VariantItem>,
	#[serde(default)]
	pub storage: Vec<StorageItem>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantItem {
	pub index: u8,
	pub name: String,
	#[serde(default)]
	pub fields: Vec<Field>,
	/// Checked against the computed hash when present.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub type_hash: Option<TypeHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageItem {
	pub name: String,
	#[serde(default)]
	pub keys: Vec<StorageKey>,
	pub fields: Vec<Field>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub type_hash: Option<TypeHash>,
}

impl RuntimeDefinition {
	pub fn new(spec_version: u32, activation_height: BlockHeight) -> Self {
		RuntimeDefinition {
			spec_version: SpecVersion(spec_version),
			activation_height,
			extrinsic: ExtrinsicFormat::default(),
			pallets: vec![],
		}
	}

	pub fn pallet(mut self, pallet: PalletDefinition) -> Self {
		self.pallets.push(pallet);
		self
	}
}

impl PalletDefinition {
	pub fn new(name: &str, index: u8) -> Self {
		PalletDefinition {
			name: name.to_string(),
			index,
			calls: vec![],
			events: vec![],
			storage: vec![],
		}
	}

	pub fn call(mut self, index: u8, name: &str, fields: Vec<Field>) -> Self {
		self.calls.push(VariantItem {
			index,
			name: name.to_string(),
			fields,
			type_hash: None,
		});
		self
	}

	pub fn event(mut self, index: u8, name: &str, fields: Vec<Field>) -> Self {
		self.events.push(VariantItem {
			index,
			name: name.to_string(),
			fields,
			type_hash: None,
		});
		self
	}

	pub fn storage(mut self, name: &str, keys: Vec<StorageKey>, fields: Vec<Field>) -> Self {
		self.storage.push(StorageItem {
			name: name.to_string(),
			keys,
			fields,
			type_hash: None,
		});
		self
	}
}

impl RegistryDefinition {
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
		let content = fs::read_to_string(path)?;
		Ok(serde_json::from_str(&content)?)
	}

	/// Registers every runtime, pallet and item into a fresh registry.
	pub fn build(&self) -> Result<VersionRegistry, RegistryError> {
		let mut registry = VersionRegistry::new();
		for runtime in &self.runtimes {
			let spec = runtime.spec_version;
			registry.register_runtime(spec, runtime.extrinsic.clone())?;

			for pallet in &runtime.pallets {
				registry.register_pallet(spec, &pallet.name, pallet.index)?;

				let variants = [
					(ItemKind::Call, &pallet.calls),
					(ItemKind::Event, &pallet.events),
				];
				for (kind, items) in variants {
					for item in items.iter() {
						let schema = TypeSchema {
							kind,
							fields: item.fields.clone(),
							storage: None,
						};
						let type_hash = item.type_hash.unwrap_or_else(|| schema.type_hash());
						registry.register_variant(
							spec,
							kind,
							&pallet.name,
							&item.name,
							item.index,
						)?;
						registry.register(spec, &pallet.name, &item.name, type_hash, schema)?;
					}
				}

				for item in &pallet.storage {
					let schema = TypeSchema::storage(item.keys.clone(), item.fields.clone());
					let type_hash = item.type_hash.unwrap_or_else(|| schema.type_hash());
					registry.register(spec, &pallet.name, &item.name, type_hash, schema)?;
				}
			}
		}

		info!(
			runtimes = self.runtimes.len(),
			schemas = registry.schema_count(),
			"Version registry loaded"
		);
		Ok(registry)
	}

	pub fn activation_ranges(&self) -> Vec<ActivationRange> {
		self.runtimes
			.iter()
			.map(|runtime| ActivationRange {
				start_height: runtime.activation_height,
				spec_version: runtime.spec_version,
			})
			.collect()
	}

	pub fn resolver(&self) -> Result<SpecResolver, RegistryError> {
		SpecResolver::new(self.activation_ranges(), self.indexed_until)
			.map_err(|error| RegistryError::Activation(error.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::{StorageHasher, TypeDef};

	const REGISTRY_JSON: &str = r#"{
		"indexed_until": 2000,
		"runtimes": [
			{
				"spec_version": 100,
				"activation_height": 0,
				"pallets": [
					{
						"name": "Balances",
						"index": 5,
						"events": [
							{ "index": 2, "name": "Transfer", "fields": [
								{ "name": "0", "type": "account_id" },
								{ "name": "1", "type": "account_id" },
								{ "name": "2", "type": "u64" }
							] }
						]
					},
					{
						"name": "SubtensorModule",
						"index": 7,
						"storage": [
							{
								"name": "Difficulty",
								"keys": [{ "name": "netuid", "hasher": "identity", "type": "u16" }],
								"fields": [{ "name": "value", "type": "u32" }]
							}
						]
					}
				]
			},
			{
				"spec_version": 105,
				"activation_height": 1000,
				"pallets": []
			}
		]
	}"#;

	#[test]
	fn parse_and_build() {
		let definition: RegistryDefinition = serde_json::from_str(REGISTRY_JSON).unwrap();
		assert_eq!(definition.indexed_until, Some(2000));
		assert_eq!(definition.runtimes[0].extrinsic, ExtrinsicFormat::default());

		let registry = definition.build().unwrap();
		assert_eq!(
			registry.spec_versions().collect::<Vec<_>>(),
			vec![SpecVersion(100), SpecVersion(105)]
		);
		assert_eq!(
			registry
				.lookup_variant(SpecVersion(100), ItemKind::Event, 5, 2)
				.unwrap(),
			("Balances", "Transfer")
		);

		let resolved = registry
			.resolve(SpecVersion(100), ItemKind::Storage, "SubtensorModule", "Difficulty")
			.unwrap();
		assert_eq!(
			resolved.schema.storage_keys()[0].hasher,
			StorageHasher::Identity
		);
		assert_eq!(resolved.schema.fields[0].ty, TypeDef::U32);
	}

	#[test]
	fn explicit_type_hash_is_verified() {
		let mut definition: RegistryDefinition = serde_json::from_str(REGISTRY_JSON).unwrap();
		definition.runtimes[0].pallets[0].events[0].type_hash = Some(TypeHash([1u8; 32]));
		assert!(matches!(
			definition.build(),
			Err(RegistryError::TypeHashMismatch { .. })
		));
	}

	#[test]
	fn activation_table_from_definition() {
		let definition: RegistryDefinition = serde_json::from_str(REGISTRY_JSON).unwrap();
		let resolver = definition.resolver().unwrap();
		assert_eq!(
			resolver.resolve_height(999).known(),
			Some(SpecVersion(100))
		);
		assert_eq!(
			resolver.resolve_height(1000).known(),
			Some(SpecVersion(105))
		);
		assert_eq!(resolver.resolve_height(2001).known(), None);
	}

	#[test]
	fn definition_json_roundtrip() {
		let definition = RegistryDefinition {
			indexed_until: None,
			runtimes: vec![RuntimeDefinition::new(120, 0).pallet(
				PalletDefinition::new("Timestamp", 2)
					.call(0, "set", vec![Field::new("now", TypeDef::Compact)]),
			)],
		};
		let json = serde_json::to_string(&definition).unwrap();
		let parsed: RegistryDefinition = serde_json::from_str(&json).unwrap();
		assert_eq!(parsed, definition);
	}
}
