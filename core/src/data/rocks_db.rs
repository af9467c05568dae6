use super::*;
use crate::data::{self, ENTITIES_CF, INGEST_STATE_CF};
use codec::{Decode, Encode};
use color_eyre::eyre::Result;
use rocksdb::{ColumnFamilyDescriptor, Options};
use std::sync::Arc;

#[derive(Clone)]
pub struct RocksDB {
	db: Arc<rocksdb::DB>,
}

#[derive(Eq, Hash, PartialEq)]
pub struct RocksDBKey(Option<&'static str>, Vec<u8>);

impl<T: RecordKey> From<T> for RocksDBKey {
	fn from(value: T) -> Self {
		RocksDBKey(value.space(), value.key().into_bytes())
	}
}

impl RocksDB {
	pub fn open(path: &str) -> Result<RocksDB> {
		let cf_opts = vec![
			ColumnFamilyDescriptor::new(ENTITIES_CF, Options::default()),
			ColumnFamilyDescriptor::new(INGEST_STATE_CF, Options::default()),
		];

		let mut db_opts = Options::default();
		db_opts.create_if_missing(true);
		db_opts.create_missing_column_families(true);

		let db = Arc::new(rocksdb::DB::open_cf_descriptors(&db_opts, path, cf_opts)?);
		Ok(RocksDB { db })
	}
}

pub struct RocksBatch {
	db: Arc<rocksdb::DB>,
	batch: rocksdb::WriteBatch,
	missing_cf: Option<&'static str>,
}

impl WriteBatch for RocksBatch {
	fn put<T: RecordKey>(&mut self, key: T, value: T::Type) {
		let RocksDBKey(column_family, key) = key.into();
		let Some(cf) = column_family else {
			return self.batch.put(key, <T::Type>::encode(&value));
		};
		match self.db.cf_handle(cf) {
			Some(cf_handle) => self.batch.put_cf(&cf_handle, key, <T::Type>::encode(&value)),
			None => self.missing_cf = Some(cf),
		}
	}

	fn delete<T: RecordKey>(&mut self, key: T) {
		let RocksDBKey(column_family, key) = key.into();
		let Some(cf) = column_family else {
			return self.batch.delete(key);
		};
		match self.db.cf_handle(cf) {
			Some(cf_handle) => self.batch.delete_cf(&cf_handle, key),
			None => self.missing_cf = Some(cf),
		}
	}
}

impl data::Database for RocksDB {
	type Batch = RocksBatch;

	fn get<T: RecordKey>(&self, key: T) -> Option<T::Type> {
		let RocksDBKey(column_family, key) = key.into();
		// if Column Family descriptor was provided, get the key from that partition
		let Some(cf) = column_family else {
			// else, just get it from the default partition
			return self
				.db
				.get(key)
				.expect("Get operation has failed on RocksDB")
				.map(|value| {
					<T::Type>::decode(&mut &value[..]).expect("Failed to decode the RocksDB data.")
				});
		};

		let cf_handle = self
			.db
			.cf_handle(cf)
			.expect("Couldn't get Column Family handle from RocksDB");

		self.db
			.get_cf(&cf_handle, key)
			.expect("Get operation with Column Family has failed on RocksDB")
			.map(|value| {
				<T::Type>::decode(&mut &value[..]).expect("Failed to decode the RocksDB data.")
			})
	}

	fn batch(&self) -> RocksBatch {
		RocksBatch {
			db: self.db.clone(),
			batch: rocksdb::WriteBatch::default(),
			missing_cf: None,
		}
	}

	fn write(&self, batch: RocksBatch) -> Result<(), DataError> {
		if let Some(cf) = batch.missing_cf {
			return Err(DataError::MissingColumnFamily(cf));
		}
		self.db.write(batch.batch)?;
		Ok(())
	}
}
