use crate::data::{DataError, Database, WriteBatch};
use std::{
	collections::{BTreeMap, HashMap},
	sync::{Arc, RwLock},
};

use super::RecordKey;

#[derive(Clone)]
pub struct MemoryDB {
	map: Arc<RwLock<HashMap<HashMapKey, String>>>,
}

#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct HashMapKey(pub String);

impl Default for MemoryDB {
	fn default() -> Self {
		MemoryDB {
			map: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl<T: RecordKey> From<T> for HashMapKey {
	fn from(value: T) -> Self {
		let key = value.key();
		HashMapKey(match value.space() {
			Some(space) => format!("{space}::{key}"),
			None => key,
		})
	}
}

impl MemoryDB {
	/// Every stored record in key order.
	pub fn snapshot(&self) -> BTreeMap<String, String> {
		let map = self.map.read().expect("Lock acquired");
		map.iter()
			.map(|(HashMapKey(key), value)| (key.clone(), value.clone()))
			.collect()
	}
}

#[derive(Default)]
pub struct MemoryBatch {
	writes: Vec<(HashMapKey, Option<String>)>,
}

impl WriteBatch for MemoryBatch {
	fn put<T: RecordKey>(&mut self, key: T, value: T::Type) {
		let value = serde_json::to_string(&value).expect("Encoding data for MemoryDB failed");
		self.writes.push((key.into(), Some(value)));
	}

	fn delete<T: RecordKey>(&mut self, key: T) {
		self.writes.push((key.into(), None));
	}
}

impl Database for MemoryDB {
	type Batch = MemoryBatch;

	fn get<T: RecordKey>(&self, key: T) -> Option<T::Type> {
		let map = self.map.read().expect("Lock acquired");
		map.get(&key.into())
			.map(|value| serde_json::from_str(value).expect("Decoding data from MemoryDB failed"))
	}

	fn batch(&self) -> MemoryBatch {
		MemoryBatch::default()
	}

	fn write(&self, batch: MemoryBatch) -> Result<(), DataError> {
		// single write lock, readers never observe a partially applied batch
		let mut map = self.map.write().expect("Lock acquired");
		for (key, value) in batch.writes {
			match value {
				Some(value) => map.insert(key, value),
				None => map.remove(&key),
			};
		}
		Ok(())
	}
}
