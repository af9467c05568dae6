//! SCALE decoding and encoding driven by [`TypeDef`] layouts.

use codec::{Compact, Decode, Encode};
use thiserror::Error;

use super::value::{Era, Fields, Value};
use crate::registry::{Field, TypeDef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleError {
	#[error("Unexpected end of input at offset {offset}: {needed} bytes needed, {available} available")]
	Eof {
		offset: usize,
		needed: usize,
		available: usize,
	},
	#[error("Invalid bool byte {value:#04x} at offset {offset}")]
	InvalidBool { offset: usize, value: u8 },
	#[error("Invalid option tag {value:#04x} at offset {offset}")]
	InvalidOption { offset: usize, value: u8 },
	#[error("Invalid variant discriminant {value} at offset {offset}")]
	InvalidDiscriminant { offset: usize, value: u8 },
	#[error("Invalid compact integer at offset {offset}: {reason}")]
	InvalidCompact { offset: usize, reason: String },
	#[error("Length {len} at offset {offset} does not fit into the {available} remaining bytes")]
	LengthOverflow {
		offset: usize,
		len: u128,
		available: usize,
	},
	#[error("Invalid UTF-8 string at offset {offset}")]
	InvalidUtf8 { offset: usize },
	#[error("{remaining} trailing bytes at offset {offset}")]
	TrailingBytes { offset: usize, remaining: usize },
	#[error("Value does not match {expected}")]
	Mismatch { expected: &'static str },
	#[error("Value {value} is out of range for {expected}")]
	OutOfRange { expected: &'static str, value: u128 },
	#[error("Missing field {0}")]
	MissingField(String),
}

impl ScaleError {
	/// Input offset the error occurred at, encoding errors have none.
	pub fn offset(&self) -> Option<usize> {
		use ScaleError::*;
		match self {
			Eof { offset, .. }
			| InvalidBool { offset, .. }
			| InvalidOption { offset, .. }
			| InvalidDiscriminant { offset, .. }
			| InvalidCompact { offset, .. }
			| LengthOverflow { offset, .. }
			| InvalidUtf8 { offset }
			| TrailingBytes { offset, .. } => Some(*offset),
			Mismatch { .. } | OutOfRange { .. } | MissingField(_) => None,
		}
	}
}

/// Byte cursor that keeps track of the consumed offset.
#[derive(Debug)]
pub struct Input<'a> {
	bytes: &'a [u8],
	offset: usize,
}

impl<'a> Input<'a> {
	pub fn new(bytes: &'a [u8]) -> Self {
		Input { bytes, offset: 0 }
	}

	pub fn offset(&self) -> usize {
		self.offset
	}

	pub fn remaining(&self) -> usize {
		self.bytes.len() - self.offset
	}

	pub fn is_empty(&self) -> bool {
		self.remaining() == 0
	}

	/// Bytes consumed between `start` and the current offset.
	pub fn consumed_since(&self, start: usize) -> &'a [u8] {
		&self.bytes[start..self.offset]
	}

	pub fn take(&mut self, len: usize) -> Result<&'a [u8], ScaleError> {
		if len > self.remaining() {
			return Err(ScaleError::Eof {
				offset: self.offset,
				needed: len,
				available: self.remaining(),
			});
		}
		let bytes = &self.bytes[self.offset..self.offset + len];
		self.offset += len;
		Ok(bytes)
	}

	pub fn byte(&mut self) -> Result<u8, ScaleError> {
		Ok(self.take(1)?[0])
	}

	pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ScaleError> {
		let mut array = [0u8; N];
		array.copy_from_slice(self.take(N)?);
		Ok(array)
	}

	pub fn compact(&mut self) -> Result<u128, ScaleError> {
		let offset = self.offset;
		if self.is_empty() {
			return Err(ScaleError::Eof {
				offset,
				needed: 1,
				available: 0,
			});
		}
		let mut slice = &self.bytes[offset..];
		let Compact(value) =
			Compact::<u128>::decode(&mut slice).map_err(|error| ScaleError::InvalidCompact {
				offset,
				reason: error.to_string(),
			})?;
		self.offset = self.bytes.len() - slice.len();
		Ok(value)
	}

	/// Reads a length prefix and checks that `len` elements of at least
	/// `min_element_len` bytes can still be present. Zero sized elements count as one
	/// byte, so a length never exceeds the remaining input.
	pub fn length(&mut self, min_element_len: usize) -> Result<usize, ScaleError> {
		let offset = self.offset;
		let len = self.compact()?;
		let overflow = || ScaleError::LengthOverflow {
			offset,
			len,
			available: self.remaining(),
		};
		let len = usize::try_from(len).map_err(|_| overflow())?;
		if len.saturating_mul(min_element_len.max(1)) > self.remaining() {
			return Err(overflow());
		}
		Ok(len)
	}

	/// Fails when any input is left unconsumed.
	pub fn finish(self) -> Result<(), ScaleError> {
		match self.remaining() {
			0 => Ok(()),
			remaining => Err(ScaleError::TrailingBytes {
				offset: self.offset,
				remaining,
			}),
		}
	}
}

pub fn decode(ty: &TypeDef, input: &mut Input) -> Result<Value, ScaleError> {
	let offset = input.offset();
	let value = match ty {
		TypeDef::Bool => match input.byte()? {
			0 => Value::Bool(false),
			1 => Value::Bool(true),
			value => return Err(ScaleError::InvalidBool { offset, value }),
		},
		TypeDef::U8 => Value::U8(input.byte()?),
		TypeDef::U16 => Value::U16(u16::from_le_bytes(input.array()?)),
		TypeDef::U32 => Value::U32(u32::from_le_bytes(input.array()?)),
		TypeDef::U64 => Value::U64(u64::from_le_bytes(input.array()?)),
		TypeDef::U128 => Value::U128(u128::from_le_bytes(input.array()?)),
		TypeDef::I8 => Value::I8(i8::from_le_bytes(input.array()?)),
		TypeDef::I16 => Value::I16(i16::from_le_bytes(input.array()?)),
		TypeDef::I32 => Value::I32(i32::from_le_bytes(input.array()?)),
		TypeDef::I64 => Value::I64(i64::from_le_bytes(input.array()?)),
		TypeDef::Compact => Value::Compact(input.compact()?),
		TypeDef::AccountId => Value::AccountId(input.array()?),
		TypeDef::Hash => Value::Hash(input.array()?),
		TypeDef::Bytes => {
			let len = input.length(1)?;
			Value::Bytes(input.take(len)?.to_vec())
		},
		TypeDef::Str => {
			let len = input.length(1)?;
			let bytes = input.take(len)?.to_vec();
			Value::Str(String::from_utf8(bytes).map_err(|_| ScaleError::InvalidUtf8 { offset })?)
		},
		TypeDef::Era => match input.byte()? {
			0 => Value::Era(Era::Immortal),
			first => Value::Era(Era::Mortal(first, input.byte()?)),
		},
		TypeDef::Array(len, inner) => Value::Sequence(
			(0..*len)
				.map(|_| decode(inner, input))
				.collect::<Result<_, _>>()?,
		),
		TypeDef::Vec(inner) => {
			let len = input.length(inner.min_encoded_len())?;
			Value::Sequence(
				(0..len)
					.map(|_| decode(inner, input))
					.collect::<Result<_, _>>()?,
			)
		},
		TypeDef::Tuple(items) => Value::Tuple(
			items
				.iter()
				.map(|item| decode(item, input))
				.collect::<Result<_, _>>()?,
		),
		TypeDef::Option(inner) => match input.byte()? {
			0 => Value::Option(None),
			1 => Value::Option(Some(Box::new(decode(inner, input)?))),
			value => return Err(ScaleError::InvalidOption { offset, value }),
		},
		TypeDef::Variant(variants) => {
			let index = input.byte()?;
			let variant = variants
				.iter()
				.find(|variant| variant.index == index)
				.ok_or(ScaleError::InvalidDiscriminant {
					offset,
					value: index,
				})?;
			Value::Variant {
				index,
				name: variant.name.clone(),
				fields: decode_fields(&variant.fields, input)?,
			}
		},
		TypeDef::Composite(fields) => Value::Composite(decode_fields(fields, input)?),
	};
	Ok(value)
}

pub fn decode_fields(fields: &[Field], input: &mut Input) -> Result<Fields, ScaleError> {
	fields
		.iter()
		.map(|field| Ok((field.name.clone(), decode(&field.ty, input)?)))
		.collect()
}

/// Decodes `bytes` as the given fields, requiring the whole buffer to be consumed.
pub fn decode_exact(fields: &[Field], bytes: &[u8]) -> Result<Fields, ScaleError> {
	let mut input = Input::new(bytes);
	let decoded = decode_fields(fields, &mut input)?;
	input.finish()?;
	Ok(decoded)
}

fn unsigned<T: TryFrom<u128> + Encode>(
	value: &Value,
	expected: &'static str,
	out: &mut Vec<u8>,
) -> Result<(), ScaleError> {
	let raw = value.as_u128().ok_or(ScaleError::Mismatch { expected })?;
	let narrowed = T::try_from(raw).map_err(|_| ScaleError::OutOfRange {
		expected,
		value: raw,
	})?;
	narrowed.encode_to(out);
	Ok(())
}

fn sequence<'v>(
	value: &'v Value,
	expected: &'static str,
) -> Result<&'v [Value], ScaleError> {
	match value {
		Value::Sequence(items) => Ok(items),
		_ => Err(ScaleError::Mismatch { expected }),
	}
}

pub fn encode(ty: &TypeDef, value: &Value, out: &mut Vec<u8>) -> Result<(), ScaleError> {
	match (ty, value) {
		(TypeDef::Bool, Value::Bool(flag)) => flag.encode_to(out),
		(TypeDef::U8, _) => unsigned::<u8>(value, "u8", out)?,
		(TypeDef::U16, _) => unsigned::<u16>(value, "u16", out)?,
		(TypeDef::U32, _) => unsigned::<u32>(value, "u32", out)?,
		(TypeDef::U64, _) => unsigned::<u64>(value, "u64", out)?,
		(TypeDef::U128, _) => unsigned::<u128>(value, "u128", out)?,
		(TypeDef::I8, Value::I8(number)) => number.encode_to(out),
		(TypeDef::I16, Value::I16(number)) => number.encode_to(out),
		(TypeDef::I32, Value::I32(number)) => number.encode_to(out),
		(TypeDef::I64, Value::I64(number)) => number.encode_to(out),
		(TypeDef::Compact, _) => {
			let raw = value
				.as_u128()
				.ok_or(ScaleError::Mismatch { expected: "compact" })?;
			Compact(raw).encode_to(out)
		},
		(TypeDef::AccountId, Value::AccountId(bytes)) | (TypeDef::Hash, Value::Hash(bytes)) => {
			out.extend_from_slice(bytes)
		},
		(TypeDef::Bytes, Value::Bytes(bytes)) => bytes.encode_to(out),
		(TypeDef::Str, Value::Str(text)) => text.encode_to(out),
		(TypeDef::Era, Value::Era(Era::Immortal)) => out.push(0),
		(TypeDef::Era, Value::Era(Era::Mortal(first, second))) => {
			out.extend_from_slice(&[*first, *second])
		},
		(TypeDef::Array(len, inner), _) => {
			let items = sequence(value, "array")?;
			if items.len() != *len as usize {
				return Err(ScaleError::Mismatch { expected: "array" });
			}
			for item in items {
				encode(inner, item, out)?;
			}
		},
		(TypeDef::Vec(inner), _) => {
			let items = sequence(value, "vec")?;
			Compact(items.len() as u64).encode_to(out);
			for item in items {
				encode(inner, item, out)?;
			}
		},
		(TypeDef::Tuple(types), Value::Tuple(items)) if types.len() == items.len() => {
			for (ty, item) in types.iter().zip(items) {
				encode(ty, item, out)?;
			}
		},
		(TypeDef::Option(_), Value::Option(None)) => out.push(0),
		(TypeDef::Option(inner), Value::Option(Some(item))) => {
			out.push(1);
			encode(inner, item, out)?;
		},
		(TypeDef::Variant(variants), Value::Variant { index, fields, .. }) => {
			let variant = variants
				.iter()
				.find(|variant| variant.index == *index)
				.ok_or(ScaleError::Mismatch { expected: "variant" })?;
			out.push(*index);
			encode_fields(&variant.fields, fields, out)?;
		},
		(TypeDef::Composite(defs), Value::Composite(fields)) => encode_fields(defs, fields, out)?,
		(ty, _) => {
			return Err(ScaleError::Mismatch {
				expected: type_name(ty),
			})
		},
	}
	Ok(())
}

pub fn encode_fields(defs: &[Field], fields: &Fields, out: &mut Vec<u8>) -> Result<(), ScaleError> {
	for def in defs {
		let value = fields
			.iter()
			.find(|(name, _)| *name == def.name)
			.map(|(_, value)| value)
			.ok_or_else(|| ScaleError::MissingField(def.name.clone()))?;
		encode(&def.ty, value, out)?;
	}
	Ok(())
}

fn type_name(ty: &TypeDef) -> &'static str {
	match ty {
		TypeDef::Bool => "bool",
		TypeDef::I8 => "i8",
		TypeDef::I16 => "i16",
		TypeDef::I32 => "i32",
		TypeDef::I64 => "i64",
		TypeDef::AccountId => "account_id",
		TypeDef::Hash => "hash",
		TypeDef::Bytes => "bytes",
		TypeDef::Str => "str",
		TypeDef::Era => "era",
		TypeDef::Tuple(_) => "tuple",
		TypeDef::Option(_) => "option",
		TypeDef::Variant(_) => "variant",
		TypeDef::Composite(_) => "composite",
		_ => "unsigned integer",
	}
}
