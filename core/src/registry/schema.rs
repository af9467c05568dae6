use codec::Encode;
use serde::{Deserialize, Serialize};
use sp_crypto_hashing::blake2_256;
use strum::Display;

use super::TypeHash;

/// Kind of runtime item a schema describes.
#[derive(
	Clone,
	Copy,
	Debug,
	PartialEq,
	Eq,
	Hash,
	PartialOrd,
	Ord,
	Encode,
	Serialize,
	Deserialize,
	Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
	Call,
	Event,
	Storage,
}

/// Binary layout vocabulary used by type schemas.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeDef {
	Bool,
	U8,
	U16,
	U32,
	U64,
	U128,
	I8,
	I16,
	I32,
	I64,
	/// SCALE compact encoded unsigned integer.
	Compact,
	AccountId,
	Hash,
	/// Length prefixed byte blob.
	Bytes,
	Str,
	/// Transaction mortality, one byte when immortal and two otherwise.
	Era,
	Array(u32, Box<TypeDef>),
	Vec(Box<TypeDef>),
	Tuple(Vec<TypeDef>),
	Option(Box<TypeDef>),
	/// Tagged union discriminated by a leading byte.
	Variant(Vec<VariantDef>),
	Composite(Vec<Field>),
}

impl TypeDef {
	pub fn vec(inner: TypeDef) -> Self {
		TypeDef::Vec(Box::new(inner))
	}

	pub fn array(len: u32, inner: TypeDef) -> Self {
		TypeDef::Array(len, Box::new(inner))
	}

	pub fn option(inner: TypeDef) -> Self {
		TypeDef::Option(Box::new(inner))
	}

	/// Smallest number of bytes any value of this type occupies on the wire.
	pub fn min_encoded_len(&self) -> usize {
		use TypeDef::*;
		match self {
			Bool | U8 | I8 | Compact | Bytes | Str | Era | Vec(_) | Option(_) | Variant(_) => 1,
			U16 | I16 => 2,
			U32 | I32 => 4,
			U64 | I64 => 8,
			U128 => 16,
			AccountId | Hash => 32,
			Array(len, inner) => (*len as usize).saturating_mul(inner.min_encoded_len()),
			Tuple(items) => items.iter().map(TypeDef::min_encoded_len).sum(),
			Composite(fields) => fields.iter().map(|f| f.ty.min_encoded_len()).sum(),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Serialize, Deserialize)]
pub struct Field {
	pub name: String,
	#[serde(rename = "type")]
	pub ty: TypeDef,
}

impl Field {
	pub fn new(name: &str, ty: TypeDef) -> Self {
		Field {
			name: name.to_string(),
			ty,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Serialize, Deserialize)]
pub struct VariantDef {
	pub index: u8,
	pub name: String,
	#[serde(default)]
	pub fields: Vec<Field>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Encode, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageHasher {
	Identity,
	Twox64Concat,
	Blake2_128Concat,
}

#[derive(Clone, Debug, PartialEq, Eq, Encode, Serialize, Deserialize)]
pub struct StorageKey {
	pub name: String,
	pub hasher: StorageHasher,
	#[serde(rename = "type")]
	pub ty: TypeDef,
}

/// Key layout of a storage item, empty for plain values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Encode, Serialize, Deserialize)]
pub struct StorageLayout {
	pub keys: Vec<StorageKey>,
}

/// Binary layout of a single call, event or storage value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSchema {
	pub kind: ItemKind,
	pub fields: Vec<Field>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub storage: Option<StorageLayout>,
}

impl TypeSchema {
	pub fn call(fields: Vec<Field>) -> Self {
		TypeSchema {
			kind: ItemKind::Call,
			fields,
			storage: None,
		}
	}

	pub fn event(fields: Vec<Field>) -> Self {
		TypeSchema {
			kind: ItemKind::Event,
			fields,
			storage: None,
		}
	}

	pub fn storage(keys: Vec<StorageKey>, fields: Vec<Field>) -> Self {
		TypeSchema {
			kind: ItemKind::Storage,
			fields,
			storage: Some(StorageLayout { keys }),
		}
	}

	/// Content hash of the layout. Names of the pallet and item are not part of it,
	/// so identical layouts are shared between items and runtime versions.
	pub fn type_hash(&self) -> TypeHash {
		let storage = self.storage.clone().unwrap_or_default();
		TypeHash(blake2_256(&(&self.fields, &storage).encode()))
	}

	pub fn storage_keys(&self) -> &[StorageKey] {
		self.storage
			.as_ref()
			.map(|layout| layout.keys.as_slice())
			.unwrap_or_default()
	}
}

/// Envelope of signed extrinsics for one runtime version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtrinsicFormat {
	pub address: TypeDef,
	pub signature: TypeDef,
	pub extra: Vec<Field>,
}

impl Default for ExtrinsicFormat {
	fn default() -> Self {
		let account_variant = |index: u8, name: &str, ty: TypeDef| VariantDef {
			index,
			name: name.to_string(),
			fields: vec![Field::new("0", ty)],
		};

		ExtrinsicFormat {
			address: TypeDef::Variant(vec![
				account_variant(0, "Id", TypeDef::AccountId),
				account_variant(1, "Index", TypeDef::Compact),
				account_variant(2, "Raw", TypeDef::Bytes),
				account_variant(3, "Address32", TypeDef::Hash),
				account_variant(4, "Address20", TypeDef::array(20, TypeDef::U8)),
			]),
			signature: TypeDef::Variant(vec![
				account_variant(0, "Ed25519", TypeDef::array(64, TypeDef::U8)),
				account_variant(1, "Sr25519", TypeDef::array(64, TypeDef::U8)),
				account_variant(2, "Ecdsa", TypeDef::array(65, TypeDef::U8)),
			]),
			extra: vec![
				Field::new("era", TypeDef::Era),
				Field::new("nonce", TypeDef::Compact),
				Field::new("tip", TypeDef::Compact),
			],
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn transfer_fields() -> Vec<Field> {
		vec![
			Field::new("from", TypeDef::AccountId),
			Field::new("to", TypeDef::AccountId),
			Field::new("amount", TypeDef::U64),
		]
	}

	#[test]
	fn identical_layouts_share_type_hash() {
		let a = TypeSchema::event(transfer_fields());
		let b = TypeSchema::event(transfer_fields());
		assert_eq!(a.type_hash(), b.type_hash());
	}

	#[test]
	fn layout_changes_change_type_hash() {
		let a = TypeSchema::event(transfer_fields());
		let mut fields = transfer_fields();
		fields[2].ty = TypeDef::U128;
		let b = TypeSchema::event(fields);
		assert_ne!(a.type_hash(), b.type_hash());
	}

	#[test]
	fn storage_keys_are_part_of_type_hash() {
		let value = vec![Field::new("value", TypeDef::U64)];
		let identity = TypeSchema::storage(
			vec![StorageKey {
				name: "netuid".into(),
				hasher: StorageHasher::Identity,
				ty: TypeDef::U16,
			}],
			value.clone(),
		);
		let twox = TypeSchema::storage(
			vec![StorageKey {
				name: "netuid".into(),
				hasher: StorageHasher::Twox64Concat,
				ty: TypeDef::U16,
			}],
			value,
		);
		assert_ne!(identity.type_hash(), twox.type_hash());
	}

	#[test]
	fn type_def_json_format() {
		let ty: TypeDef = serde_json::from_str(r#"{"vec": {"tuple": ["u32", "u64"]}}"#).unwrap();
		assert_eq!(ty, TypeDef::vec(TypeDef::Tuple(vec![TypeDef::U32, TypeDef::U64])));
		let ty: TypeDef = serde_json::from_str(r#""account_id""#).unwrap();
		assert_eq!(ty, TypeDef::AccountId);
	}

	#[test]
	fn min_encoded_len_of_composites() {
		let ty = TypeDef::Tuple(vec![TypeDef::U16, TypeDef::AccountId, TypeDef::Compact]);
		assert_eq!(ty.min_encoded_len(), 35);
		assert_eq!(TypeDef::array(4, TypeDef::U32).min_encoded_len(), 16);
	}
}
