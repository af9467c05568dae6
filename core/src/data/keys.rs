/// Keys predefined for persistance:
/// Prefix of normalized entity rows
pub const ENTITY_PREFIX: &str = "entity";
/// Prefix of the per block ingestion ledger
pub const LEDGER_PREFIX: &str = "ledger";
/// Prefix of the latest sampled parameter values
pub const LATEST_SAMPLE_PREFIX: &str = "latest_sample";
/// Key for storing the last fully persisted block height
pub const LAST_PERSISTED_HEIGHT_KEY: &str = "last_persisted_height";
