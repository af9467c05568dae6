use crate::{
	entity::{EntityKind, NormalizedEntity},
	types::{BlockHash, BlockHeight, SpecVersion},
};
use codec::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

mod keys;
use keys::*;

pub(crate) mod mem_db;
pub use mem_db::*;

#[cfg(feature = "rocksdb")]
mod rocks_db;
#[cfg(feature = "rocksdb")]
pub use rocks_db::*;

#[cfg(not(feature = "rocksdb"))]
pub type DB = mem_db::MemoryDB;
#[cfg(feature = "rocksdb")]
pub type DB = rocks_db::RocksDB;

/// Column family for normalized entity rows
pub const ENTITIES_CF: &str = "entities_cf";

/// Column family for ingestion progress
pub const INGEST_STATE_CF: &str = "ingest_state_cf";

#[derive(Debug, Error)]
pub enum DataError {
	#[cfg(feature = "rocksdb")]
	#[error(transparent)]
	RocksDB(#[from] rocksdb::Error),
	#[error("Column family {0} is not opened")]
	MissingColumnFamily(&'static str),
}

/// Type of the database key which we can get from the custom key.
pub trait RecordKey {
	type Type: Serialize + for<'a> Deserialize<'a> + Encode + Decode;

	fn space(&self) -> Option<&'static str>;

	/// Returns key space (if any) and key
	fn key(&self) -> String;
}

/// Writes collected for one atomic [`Database::write`].
pub trait WriteBatch {
	fn put<T: RecordKey>(&mut self, key: T, value: T::Type);

	fn delete<T: RecordKey>(&mut self, key: T);
}

/// Writes only go through a [`WriteBatch`].
pub trait Database {
	type Batch: WriteBatch;

	/// Gets value for given key.
	/// Key is serialized into database key, value is deserialized into the given type.
	fn get<T: RecordKey>(&self, key: T) -> Option<T::Type>;

	fn batch(&self) -> Self::Batch;

	/// Applies every write of the batch or none of them.
	fn write(&self, batch: Self::Batch) -> Result<(), DataError>;
}

/// Ingestion record of one persisted block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct LedgerEntry {
	pub height: BlockHeight,
	pub block_hash: BlockHash,
	pub spec_version: SpecVersion,
	pub entity_count: u32,
	/// Items dropped because they could not be decoded.
	pub skipped_items: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct LatestSample {
	pub block_num: BlockHeight,
	pub amount: u64,
}

pub struct EntityKey<'a>(pub EntityKind, pub &'a str);

impl RecordKey for EntityKey<'_> {
	type Type = NormalizedEntity;

	fn space(&self) -> Option<&'static str> {
		Some(ENTITIES_CF)
	}

	fn key(&self) -> String {
		let EntityKey(kind, id) = self;
		format!("{ENTITY_PREFIX}:{kind}:{id}")
	}
}

pub struct LedgerKey(pub BlockHeight);

impl RecordKey for LedgerKey {
	type Type = LedgerEntry;

	fn space(&self) -> Option<&'static str> {
		Some(INGEST_STATE_CF)
	}

	fn key(&self) -> String {
		let LedgerKey(height) = self;
		format!("{LEDGER_PREFIX}:{height:010}")
	}
}

pub struct LatestSampleKey(pub EntityKind, pub u16);

impl RecordKey for LatestSampleKey {
	type Type = LatestSample;

	fn space(&self) -> Option<&'static str> {
		Some(INGEST_STATE_CF)
	}

	fn key(&self) -> String {
		let LatestSampleKey(kind, netuid) = self;
		format!("{LATEST_SAMPLE_PREFIX}:{kind}:{netuid}")
	}
}

pub struct LastPersistedHeightKey;

impl RecordKey for LastPersistedHeightKey {
	type Type = BlockHeight;

	fn space(&self) -> Option<&'static str> {
		Some(INGEST_STATE_CF)
	}

	fn key(&self) -> String {
		LAST_PERSISTED_HEIGHT_KEY.into()
	}
}

/// Durable output of the ingester.
pub trait EntitySink {
	fn last_persisted_height(&self) -> Option<BlockHeight>;

	/// Stores the rows, the ledger entry and the new resume height in one atomic write.
	fn persist_block(
		&self,
		ledger: LedgerEntry,
		entities: &[NormalizedEntity],
	) -> Result<(), DataError>;

	fn latest_sample(&self, kind: EntityKind, netuid: u16) -> Option<LatestSample>;

	fn entity(&self, kind: EntityKind, id: &str) -> Option<NormalizedEntity>;

	fn ledger(&self, height: BlockHeight) -> Option<LedgerEntry>;
}

impl<D: Database> EntitySink for D {
	fn last_persisted_height(&self) -> Option<BlockHeight> {
		self.get(LastPersistedHeightKey)
	}

	fn persist_block(
		&self,
		ledger: LedgerEntry,
		entities: &[NormalizedEntity],
	) -> Result<(), DataError> {
		let height = ledger.height;
		let mut batch = self.batch();
		for entity in entities {
			if let Some((kind, netuid, amount)) = entity.sample() {
				let sample = LatestSample {
					block_num: height,
					amount,
				};
				batch.put(LatestSampleKey(kind, netuid), sample);
			}
			batch.put(EntityKey(entity.kind(), entity.id()), entity.clone());
		}
		batch.put(LedgerKey(height), ledger);
		batch.put(LastPersistedHeightKey, height);
		self.write(batch)?;
		debug!(height, entities = entities.len(), "Block persisted");
		Ok(())
	}

	fn latest_sample(&self, kind: EntityKind, netuid: u16) -> Option<LatestSample> {
		self.get(LatestSampleKey(kind, netuid))
	}

	fn entity(&self, kind: EntityKind, id: &str) -> Option<NormalizedEntity> {
		self.get(EntityKey(kind, id))
	}

	fn ledger(&self, height: BlockHeight) -> Option<LedgerEntry> {
		self.get(LedgerKey(height))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entity::{Coldkey, ParameterValue};

	fn ledger(height: BlockHeight, entity_count: u32) -> LedgerEntry {
		LedgerEntry {
			height,
			block_hash: BlockHash([1u8; 32]),
			spec_version: SpecVersion(120),
			entity_count,
			skipped_items: 0,
		}
	}

	#[test]
	fn persist_block_updates_state() {
		let db = MemoryDB::default();
		assert_eq!(db.last_persisted_height(), None);

		let coldkey = NormalizedEntity::Coldkey(Coldkey {
			id: "5F4tQyWrhfGVcNhoqeiNsR6KjD4wMZ2kfhLj4oHYuyHbZAc3".into(),
			block_num: 50,
		});
		let burn = NormalizedEntity::Burn(ParameterValue {
			id: "50-3".into(),
			block_num: 50,
			timestamp: 0,
			netuid: Some(3),
			amount: 900,
		});
		db.persist_block(ledger(50, 2), &[coldkey.clone(), burn])
			.unwrap();

		assert_eq!(db.last_persisted_height(), Some(50));
		assert_eq!(db.ledger(50), Some(ledger(50, 2)));
		assert_eq!(
			db.entity(EntityKind::Coldkey, coldkey.id()),
			Some(coldkey)
		);
		assert_eq!(
			db.latest_sample(EntityKind::Burn, 3),
			Some(LatestSample {
				block_num: 50,
				amount: 900
			})
		);
		assert_eq!(db.latest_sample(EntityKind::Difficulty, 3), None);
	}

	#[test]
	fn persisting_twice_is_idempotent() {
		let db = MemoryDB::default();
		let coldkey = NormalizedEntity::Coldkey(Coldkey {
			id: "a".into(),
			block_num: 7,
		});
		db.persist_block(ledger(7, 1), &[coldkey.clone()]).unwrap();
		let first = db.snapshot();
		db.persist_block(ledger(7, 1), &[coldkey]).unwrap();
		assert_eq!(db.snapshot(), first);
	}

	#[test]
	fn record_keys() {
		assert_eq!(
			EntityKey(EntityKind::NeuronRegistered, "1-2-3").key(),
			"entity:neuron_registered:1-2-3"
		);
		assert_eq!(LedgerKey(42).key(), "ledger:0000000042");
		assert_eq!(
			LatestSampleKey(EntityKind::Difficulty, 21).key(),
			"latest_sample:difficulty:21"
		);
	}
}
