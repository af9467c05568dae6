/// Transaction mortality as carried in the signed extrinsic envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Era {
	Immortal,
	Mortal(u8, u8),
}

/// Decoded value tree, independent of the runtime version it was decoded with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
	Bool(bool),
	U8(u8),
	U16(u16),
	U32(u32),
	U64(u64),
	U128(u128),
	I8(i8),
	I16(i16),
	I32(i32),
	I64(i64),
	Compact(u128),
	AccountId([u8; 32]),
	Hash([u8; 32]),
	Bytes(Vec<u8>),
	Str(String),
	Era(Era),
	/// Elements of a fixed size array or of a length prefixed vector.
	Sequence(Vec<Value>),
	Tuple(Vec<Value>),
	Option(Option<Box<Value>>),
	Variant {
		index: u8,
		name: String,
		fields: Fields,
	},
	Composite(Fields),
}

/// Named values in declaration order.
pub type Fields = Vec<(String, Value)>;

impl Value {
	/// Any unsigned integer, compact or fixed width.
	pub fn as_u128(&self) -> Option<u128> {
		match *self {
			Value::U8(value) => Some(value.into()),
			Value::U16(value) => Some(value.into()),
			Value::U32(value) => Some(value.into()),
			Value::U64(value) => Some(value.into()),
			Value::U128(value) | Value::Compact(value) => Some(value),
			_ => None,
		}
	}

	pub fn as_u64(&self) -> Option<u64> {
		self.as_u128().and_then(|value| value.try_into().ok())
	}

	pub fn as_u32(&self) -> Option<u32> {
		self.as_u128().and_then(|value| value.try_into().ok())
	}

	pub fn as_u16(&self) -> Option<u16> {
		self.as_u128().and_then(|value| value.try_into().ok())
	}

	/// Raw account id, looking through single field wrappers like `MultiAddress::Id`.
	pub fn as_account_id(&self) -> Option<[u8; 32]> {
		match self {
			Value::AccountId(account) => Some(*account),
			Value::Variant { fields, .. } | Value::Composite(fields) if fields.len() == 1 => {
				fields[0].1.as_account_id()
			},
			_ => None,
		}
	}

	pub fn as_bytes(&self) -> Option<Vec<u8>> {
		match self {
			Value::Bytes(bytes) => Some(bytes.clone()),
			Value::Sequence(items) => items
				.iter()
				.map(|item| match item {
					Value::U8(byte) => Some(*byte),
					_ => None,
				})
				.collect(),
			_ => None,
		}
	}

	pub fn field(&self, name: &str) -> Option<&Value> {
		match self {
			Value::Variant { fields, .. } | Value::Composite(fields) => fields.field(name),
			_ => None,
		}
	}
}

/// Field access on decoded [`Fields`].
pub trait FieldsExt {
	fn field(&self, name: &str) -> Option<&Value>;

	/// Looks the field up by name and falls back to its position, so that layouts
	/// with named and with positional fields are read the same way.
	fn field_or_position(&self, name: &str, position: usize) -> Option<&Value>;
}

impl FieldsExt for [(String, Value)] {
	fn field(&self, name: &str) -> Option<&Value> {
		self.iter()
			.find(|(field, _)| field == name)
			.map(|(_, value)| value)
	}

	fn field_or_position(&self, name: &str, position: usize) -> Option<&Value> {
		self.field(name)
			.or_else(|| self.field(&position.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unsigned_accessors_check_range() {
		assert_eq!(Value::Compact(7).as_u16(), Some(7));
		assert_eq!(Value::U64(70_000).as_u16(), None);
		assert_eq!(Value::U128(u64::MAX as u128).as_u64(), Some(u64::MAX));
		assert_eq!(Value::I32(1).as_u128(), None);
	}

	#[test]
	fn account_id_through_address_variant() {
		let address = Value::Variant {
			index: 0,
			name: "Id".into(),
			fields: vec![("0".into(), Value::AccountId([7u8; 32]))],
		};
		assert_eq!(address.as_account_id(), Some([7u8; 32]));
		let index = Value::Variant {
			index: 1,
			name: "Index".into(),
			fields: vec![("0".into(), Value::Compact(3))],
		};
		assert_eq!(index.as_account_id(), None);
	}

	#[test]
	fn positional_fallback() {
		let named: Fields = vec![("amount".into(), Value::U64(5))];
		let positional: Fields = vec![
			("0".into(), Value::AccountId([0u8; 32])),
			("1".into(), Value::U64(6)),
		];
		assert_eq!(named.field_or_position("amount", 1), Some(&Value::U64(5)));
		assert_eq!(
			positional.field_or_position("amount", 1),
			Some(&Value::U64(6))
		);
		assert_eq!(positional.field_or_position("missing", 4), None);
	}

	#[test]
	fn bytes_from_u8_sequence() {
		let value = Value::Sequence(vec![Value::U8(1), Value::U8(2)]);
		assert_eq!(value.as_bytes(), Some(vec![1, 2]));
		let value = Value::Sequence(vec![Value::U16(1)]);
		assert_eq!(value.as_bytes(), None);
	}
}
