//! Per runtime version catalogue of call, event and storage layouts.
//!
//! The registry is filled once at startup, either from the built-in Subtensor
//! layouts or from a registry file, and is read-only afterwards.

use codec::{Decode, Encode};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
	collections::{BTreeMap, HashMap},
	fmt,
	str::FromStr,
	sync::Arc,
};
use thiserror::Error;
use tracing::debug;

use crate::types::{BlockHeight, SpecVersion};

mod file;
mod schema;
pub mod subtensor;

pub use file::*;
pub use schema::*;

/// Content hash of a [`TypeSchema`] layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct TypeHash(pub [u8; 32]);

impl fmt::Display for TypeHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", hex::encode(self.0))
	}
}

impl fmt::Debug for TypeHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "TypeHash({self})")
	}
}

impl FromStr for TypeHash {
	type Err = String;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let bytes = hex::decode(value.trim_start_matches("0x")).map_err(|e| e.to_string())?;
		let hash: [u8; 32] = bytes
			.try_into()
			.map_err(|bytes: Vec<u8>| format!("Expected 32 bytes type hash, got {}", bytes.len()))?;
		Ok(TypeHash(hash))
	}
}

impl Serialize for TypeHash {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for TypeHash {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let value = String::deserialize(deserializer)?;
		value.parse().map_err(de::Error::custom)
	}
}

/// Lookup failures. Every one of them is fatal for the block being processed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
	#[error("No {kind} schema registered for {pallet}.{item} at spec {spec_version}")]
	SchemaNotFound {
		spec_version: SpecVersion,
		kind: ItemKind,
		pallet: String,
		item: String,
	},
	#[error("Unknown {kind} variant {pallet_index}:{variant_index} at spec {spec_version}")]
	UnknownVariant {
		spec_version: SpecVersion,
		kind: ItemKind,
		pallet_index: u8,
		variant_index: u8,
	},
	#[error("Runtime {0} is not registered")]
	UnknownRuntime(SpecVersion),
	#[error("Pallet {pallet} is not registered at spec {spec_version}")]
	UnknownPallet {
		spec_version: SpecVersion,
		pallet: String,
	},
	#[error("Height {0} is outside of the indexed activation ranges")]
	UnknownHeight(BlockHeight),
	#[error("Node reports spec {reported} at height {height}, registry resolves {resolved}")]
	UnregisteredUpgrade {
		height: BlockHeight,
		resolved: SpecVersion,
		reported: SpecVersion,
	},
}

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("Type hash mismatch for {pallet}.{item}: given {given}, computed {computed}")]
	TypeHashMismatch {
		pallet: String,
		item: String,
		given: TypeHash,
		computed: TypeHash,
	},
	#[error("{kind} {pallet}.{item} is already registered at spec {spec_version} with a different schema")]
	Conflict {
		spec_version: SpecVersion,
		kind: ItemKind,
		pallet: String,
		item: String,
	},
	#[error("Runtime {0} is registered twice")]
	DuplicateRuntime(SpecVersion),
	#[error("Pallet {pallet} or its index {index} is registered twice at spec {spec_version}")]
	DuplicatePallet {
		spec_version: SpecVersion,
		pallet: String,
		index: u8,
	},
	#[error("{kind} index {index} of pallet {pallet} is used twice at spec {spec_version}")]
	DuplicateVariant {
		spec_version: SpecVersion,
		kind: ItemKind,
		pallet: String,
		index: u8,
	},
	#[error("Storage items have no variant index")]
	StorageVariant,
	#[error(transparent)]
	Resolution(#[from] ResolutionError),
	#[error("Cannot read registry file: {0}")]
	Io(#[from] std::io::Error),
	#[error("Cannot parse registry file: {0}")]
	Json(#[from] serde_json::Error),
	#[error("Invalid activation table: {0}")]
	Activation(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ItemKey {
	spec_version: SpecVersion,
	kind: ItemKind,
	pallet: String,
	item: String,
}

impl ItemKey {
	fn new(spec_version: SpecVersion, kind: ItemKind, pallet: &str, item: &str) -> Self {
		ItemKey {
			spec_version,
			kind,
			pallet: pallet.to_string(),
			item: item.to_string(),
		}
	}
}

#[derive(Clone, Debug, Default)]
struct PalletLayout {
	name: String,
	calls: BTreeMap<u8, String>,
	events: BTreeMap<u8, String>,
}

#[derive(Clone, Debug)]
struct RuntimeLayout {
	extrinsic: ExtrinsicFormat,
	pallets: BTreeMap<u8, PalletLayout>,
	pallet_indices: HashMap<String, u8>,
}

/// Schema resolved for one item together with its content hash.
#[derive(Clone, Debug)]
pub struct ResolvedSchema {
	pub type_hash: TypeHash,
	pub schema: Arc<TypeSchema>,
}

#[derive(Clone, Debug, Default)]
pub struct VersionRegistry {
	runtimes: BTreeMap<SpecVersion, RuntimeLayout>,
	items: HashMap<ItemKey, TypeHash>,
	schemas: HashMap<TypeHash, Arc<TypeSchema>>,
}

impl VersionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a runtime version with its extrinsic envelope.
	pub fn register_runtime(
		&mut self,
		spec_version: SpecVersion,
		extrinsic: ExtrinsicFormat,
	) -> Result<(), RegistryError> {
		if self.runtimes.contains_key(&spec_version) {
			return Err(RegistryError::DuplicateRuntime(spec_version));
		}
		self.runtimes.insert(
			spec_version,
			RuntimeLayout {
				extrinsic,
				pallets: BTreeMap::new(),
				pallet_indices: HashMap::new(),
			},
		);
		Ok(())
	}

	pub fn register_pallet(
		&mut self,
		spec_version: SpecVersion,
		pallet: &str,
		index: u8,
	) -> Result<(), RegistryError> {
		let runtime = self
			.runtimes
			.get_mut(&spec_version)
			.ok_or(ResolutionError::UnknownRuntime(spec_version))?;
		if runtime.pallets.contains_key(&index) || runtime.pallet_indices.contains_key(pallet) {
			return Err(RegistryError::DuplicatePallet {
				spec_version,
				pallet: pallet.to_string(),
				index,
			});
		}
		runtime.pallets.insert(
			index,
			PalletLayout {
				name: pallet.to_string(),
				..Default::default()
			},
		);
		runtime.pallet_indices.insert(pallet.to_string(), index);
		Ok(())
	}

	/// Maps the wire index of a call or event to its name.
	pub fn register_variant(
		&mut self,
		spec_version: SpecVersion,
		kind: ItemKind,
		pallet: &str,
		item: &str,
		index: u8,
	) -> Result<(), RegistryError> {
		let runtime = self
			.runtimes
			.get_mut(&spec_version)
			.ok_or(ResolutionError::UnknownRuntime(spec_version))?;
		let unknown_pallet = || ResolutionError::UnknownPallet {
			spec_version,
			pallet: pallet.to_string(),
		};
		let pallet_index = runtime
			.pallet_indices
			.get(pallet)
			.ok_or_else(unknown_pallet)?;
		let layout = runtime
			.pallets
			.get_mut(pallet_index)
			.ok_or_else(unknown_pallet)?;

		let variants = match kind {
			ItemKind::Call => &mut layout.calls,
			ItemKind::Event => &mut layout.events,
			ItemKind::Storage => return Err(RegistryError::StorageVariant),
		};
		if variants.contains_key(&index) {
			return Err(RegistryError::DuplicateVariant {
				spec_version,
				kind,
				pallet: pallet.to_string(),
				index,
			});
		}
		variants.insert(index, item.to_string());
		Ok(())
	}

	/// Registers the schema of `pallet.item` for the given runtime version.
	///
	/// `type_hash` must match the content hash of `schema`. Registering the same
	/// schema twice is a no-op, registering a different one under the same key fails.
	pub fn register(
		&mut self,
		spec_version: SpecVersion,
		pallet: &str,
		item: &str,
		type_hash: TypeHash,
		schema: TypeSchema,
	) -> Result<(), RegistryError> {
		let computed = schema.type_hash();
		if computed != type_hash {
			return Err(RegistryError::TypeHashMismatch {
				pallet: pallet.to_string(),
				item: item.to_string(),
				given: type_hash,
				computed,
			});
		}

		let key = ItemKey::new(spec_version, schema.kind, pallet, item);
		match self.items.get(&key) {
			Some(existing) if *existing == type_hash => return Ok(()),
			Some(_) => {
				return Err(RegistryError::Conflict {
					spec_version,
					kind: schema.kind,
					pallet: pallet.to_string(),
					item: item.to_string(),
				})
			},
			None => {},
		}

		debug!(%spec_version, pallet, item, %type_hash, "Registering schema");
		self.schemas
			.entry(type_hash)
			.or_insert_with(|| Arc::new(schema));
		self.items.insert(key, type_hash);
		Ok(())
	}

	/// Exact match lookup, there is no fallback to neighbouring versions.
	pub fn resolve(
		&self,
		spec_version: SpecVersion,
		kind: ItemKind,
		pallet: &str,
		item: &str,
	) -> Result<ResolvedSchema, ResolutionError> {
		self.items
			.get(&ItemKey::new(spec_version, kind, pallet, item))
			.and_then(|type_hash| {
				self.schemas.get(type_hash).map(|schema| ResolvedSchema {
					type_hash: *type_hash,
					schema: schema.clone(),
				})
			})
			.ok_or_else(|| ResolutionError::SchemaNotFound {
				spec_version,
				kind,
				pallet: pallet.to_string(),
				item: item.to_string(),
			})
	}

	/// Resolves wire indices of a call or event to `(pallet, item)` names.
	pub fn lookup_variant(
		&self,
		spec_version: SpecVersion,
		kind: ItemKind,
		pallet_index: u8,
		variant_index: u8,
	) -> Result<(&str, &str), ResolutionError> {
		let unknown = || ResolutionError::UnknownVariant {
			spec_version,
			kind,
			pallet_index,
			variant_index,
		};
		let pallet = self
			.runtime(spec_version)?
			.pallets
			.get(&pallet_index)
			.ok_or_else(unknown)?;
		let variants = match kind {
			ItemKind::Call => &pallet.calls,
			ItemKind::Event => &pallet.events,
			ItemKind::Storage => return Err(unknown()),
		};
		let item = variants.get(&variant_index).ok_or_else(unknown)?;
		Ok((pallet.name.as_str(), item.as_str()))
	}

	pub fn extrinsic_format(
		&self,
		spec_version: SpecVersion,
	) -> Result<&ExtrinsicFormat, ResolutionError> {
		Ok(&self.runtime(spec_version)?.extrinsic)
	}

	pub fn pallet_index(&self, spec_version: SpecVersion, pallet: &str) -> Option<u8> {
		self.runtimes
			.get(&spec_version)?
			.pallet_indices
			.get(pallet)
			.copied()
	}

	pub fn spec_versions(&self) -> impl Iterator<Item = SpecVersion> + '_ {
		self.runtimes.keys().copied()
	}

	/// Number of distinct layouts, shared layouts are counted once.
	pub fn schema_count(&self) -> usize {
		self.schemas.len()
	}

	fn runtime(&self, spec_version: SpecVersion) -> Result<&RuntimeLayout, ResolutionError> {
		self.runtimes
			.get(&spec_version)
			.ok_or(ResolutionError::UnknownRuntime(spec_version))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn transfer() -> TypeSchema {
		TypeSchema::event(vec![
			Field::new("from", TypeDef::AccountId),
			Field::new("to", TypeDef::AccountId),
			Field::new("amount", TypeDef::U64),
		])
	}

	fn registry() -> VersionRegistry {
		let mut registry = VersionRegistry::new();
		for spec in [100, 102] {
			let spec = SpecVersion(spec);
			registry
				.register_runtime(spec, ExtrinsicFormat::default())
				.unwrap();
			registry.register_pallet(spec, "Balances", 5).unwrap();
			registry
				.register_variant(spec, ItemKind::Event, "Balances", "Transfer", 2)
				.unwrap();
			let schema = transfer();
			registry
				.register(spec, "Balances", "Transfer", schema.type_hash(), schema)
				.unwrap();
		}
		registry
	}

	#[test]
	fn resolve_requires_exact_version() {
		let registry = registry();
		assert!(registry
			.resolve(SpecVersion(100), ItemKind::Event, "Balances", "Transfer")
			.is_ok());
		assert_eq!(
			registry
				.resolve(SpecVersion(101), ItemKind::Event, "Balances", "Transfer")
				.unwrap_err(),
			ResolutionError::SchemaNotFound {
				spec_version: SpecVersion(101),
				kind: ItemKind::Event,
				pallet: "Balances".into(),
				item: "Transfer".into(),
			}
		);
	}

	#[test]
	fn resolve_distinguishes_kinds() {
		let registry = registry();
		assert!(registry
			.resolve(SpecVersion(100), ItemKind::Call, "Balances", "Transfer")
			.is_err());
	}

	#[test]
	fn identical_schemas_are_shared() {
		let registry = registry();
		assert_eq!(registry.schema_count(), 1);
		let a = registry
			.resolve(SpecVersion(100), ItemKind::Event, "Balances", "Transfer")
			.unwrap();
		let b = registry
			.resolve(SpecVersion(102), ItemKind::Event, "Balances", "Transfer")
			.unwrap();
		assert!(Arc::ptr_eq(&a.schema, &b.schema));
	}

	#[test]
	fn register_rejects_wrong_type_hash() {
		let mut registry = registry();
		let result = registry.register(
			SpecVersion(100),
			"Balances",
			"Transfer",
			TypeHash([0u8; 32]),
			transfer(),
		);
		assert!(matches!(
			result,
			Err(RegistryError::TypeHashMismatch { .. })
		));
	}

	#[test]
	fn register_rejects_conflicting_schema() {
		let mut registry = registry();
		let schema = TypeSchema::event(vec![Field::new("amount", TypeDef::U128)]);
		let result = registry.register(
			SpecVersion(100),
			"Balances",
			"Transfer",
			schema.type_hash(),
			schema,
		);
		assert!(matches!(result, Err(RegistryError::Conflict { .. })));

		let schema = transfer();
		assert!(registry
			.register(
				SpecVersion(100),
				"Balances",
				"Transfer",
				schema.type_hash(),
				schema
			)
			.is_ok());
	}

	#[test]
	fn lookup_variant_by_wire_index() {
		let registry = registry();
		assert_eq!(
			registry
				.lookup_variant(SpecVersion(100), ItemKind::Event, 5, 2)
				.unwrap(),
			("Balances", "Transfer")
		);
		assert!(matches!(
			registry.lookup_variant(SpecVersion(100), ItemKind::Event, 5, 3),
			Err(ResolutionError::UnknownVariant { .. })
		));
		assert!(matches!(
			registry.lookup_variant(SpecVersion(99), ItemKind::Event, 5, 2),
			Err(ResolutionError::UnknownRuntime(SpecVersion(99)))
		));
	}

	#[test]
	fn duplicate_indices_are_rejected() {
		let mut registry = registry();
		assert!(matches!(
			registry.register_pallet(SpecVersion(100), "System", 5),
			Err(RegistryError::DuplicatePallet { .. })
		));
		assert!(matches!(
			registry.register_pallet(SpecVersion(100), "Balances", 6),
			Err(RegistryError::DuplicatePallet { pallet, index: 6, .. }) if pallet == "Balances"
		));
		assert_eq!(registry.pallet_index(SpecVersion(100), "Balances"), Some(5));
		assert!(matches!(
			registry.register_variant(SpecVersion(100), ItemKind::Event, "Balances", "Other", 2),
			Err(RegistryError::DuplicateVariant { .. })
		));
		assert!(matches!(
			registry.register_variant(SpecVersion(100), ItemKind::Event, "Missing", "Other", 0),
			Err(RegistryError::Resolution(
				ResolutionError::UnknownPallet { .. }
			))
		));
	}

	#[test]
	fn type_hash_text_roundtrip() {
		let hash = transfer().type_hash();
		let text = hash.to_string();
		assert_eq!(text.len(), 64);
		assert_eq!(text.parse::<TypeHash>().unwrap(), hash);
		assert_eq!(format!("0x{text}").parse::<TypeHash>().unwrap(), hash);
	}
}
