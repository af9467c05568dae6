use crate::{registry::StorageHasher, shutdown::Controller, types::BlockHeight};
use color_eyre::Result;
use futures::Future;
use sp_crypto_hashing::{blake2_128, blake2_512, twox_128, twox_64};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, Instrument, Level, Subscriber};
use tracing_error::ErrorLayer;
use tracing_subscriber::{fmt::format, layer::SubscriberExt, EnvFilter, FmtSubscriber};

/// Generic Substrate address format used by Subtensor.
pub const SS58_PREFIX: u8 = 42;

const SS58_CHECKSUM_PREFIX: &[u8] = b"SS58PRE";
const SS58_CHECKSUM_LEN: usize = 2;

pub fn spawn_in_span<F>(future: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tokio::spawn(future.in_current_span())
}

pub fn install_panic_hooks(shutdown: Controller<String>) -> Result<()> {
	// initialize color-eyre hooks
	let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default()
		.display_location_section(true)
		.display_env_section(true)
		.into_hooks();

	// install hook as global handler
	eyre_hook.install()?;

	std::panic::set_hook(Box::new(move |panic_info| {
		// trigger shutdown to stop other tasks if panic occurs
		let _ = shutdown.trigger_shutdown("Panic occurred, shutting down".to_string());

		let msg = format!("{}", panic_hook.panic_report(panic_info));
		error!("Error: {}", strip_ansi_escapes::strip_str(msg));

		#[cfg(debug_assertions)]
		{
			// better-panic stacktrace that is only enabled when debugging
			better_panic::Settings::auto()
				.most_recent_first(false)
				.lineno_suffix(true)
				.verbosity(better_panic::Verbosity::Medium)
				.create_panic_handler()(panic_info);
		}
	}));
	Ok(())
}

fn env_filter(log_level: Level) -> EnvFilter {
	EnvFilter::new(format!("taotensor={log_level},warn"))
}

pub fn json_subscriber(log_level: Level) -> impl Subscriber + Send + Sync {
	FmtSubscriber::builder()
		.json()
		.with_env_filter(env_filter(log_level))
		.with_span_events(format::FmtSpan::CLOSE)
		.finish()
		.with(ErrorLayer::default())
}

pub fn default_subscriber(log_level: Level) -> impl Subscriber + Send + Sync {
	FmtSubscriber::builder()
		.with_env_filter(env_filter(log_level))
		.with_span_events(format::FmtSpan::CLOSE)
		.finish()
		.with(ErrorLayer::default())
}

pub fn rng() -> rand::rngs::ThreadRng {
	rand::thread_rng()
}

/// Heights at which chain parameters are sampled.
pub fn is_sampling_height(height: BlockHeight, interval: u32) -> bool {
	interval != 0 && height % interval == 0
}

/// Prefix of every storage key of `pallet.item`.
pub fn storage_prefix(pallet: &str, item: &str) -> [u8; 32] {
	let mut prefix = [0u8; 32];
	prefix[..16].copy_from_slice(&twox_128(pallet.as_bytes()));
	prefix[16..].copy_from_slice(&twox_128(item.as_bytes()));
	prefix
}

/// Hashes one SCALE encoded map key the way the runtime lays it out in storage.
pub fn hash_storage_key(hasher: StorageHasher, encoded: &[u8]) -> Vec<u8> {
	let mut key = match hasher {
		StorageHasher::Identity => return encoded.to_vec(),
		StorageHasher::Twox64Concat => twox_64(encoded).to_vec(),
		StorageHasher::Blake2_128Concat => blake2_128(encoded).to_vec(),
	};
	key.extend_from_slice(encoded);
	key
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Ss58Error {
	#[error("Invalid base58 encoding: {0}")]
	Base58(String),
	#[error("Invalid address length {0}")]
	Length(usize),
	#[error("Unexpected address prefix {0}")]
	Prefix(u8),
	#[error("Invalid address checksum")]
	Checksum,
}

fn ss58_checksum(payload: &[u8]) -> [u8; SS58_CHECKSUM_LEN] {
	let mut preimage = SS58_CHECKSUM_PREFIX.to_vec();
	preimage.extend_from_slice(payload);
	let hash = blake2_512(&preimage);
	[hash[0], hash[1]]
}

pub fn ss58_encode(account: &[u8; 32]) -> String {
	let mut bytes = Vec::with_capacity(1 + 32 + SS58_CHECKSUM_LEN);
	bytes.push(SS58_PREFIX);
	bytes.extend_from_slice(account);
	let checksum = ss58_checksum(&bytes);
	bytes.extend_from_slice(&checksum);
	bs58::encode(bytes).into_string()
}

pub fn ss58_decode(address: &str) -> Result<[u8; 32], Ss58Error> {
	let bytes = bs58::decode(address)
		.into_vec()
		.map_err(|error| Ss58Error::Base58(error.to_string()))?;
	if bytes.len() != 1 + 32 + SS58_CHECKSUM_LEN {
		return Err(Ss58Error::Length(bytes.len()));
	}
	if bytes[0] != SS58_PREFIX {
		return Err(Ss58Error::Prefix(bytes[0]));
	}
	let (payload, checksum) = bytes.split_at(1 + 32);
	if ss58_checksum(payload) != checksum {
		return Err(Ss58Error::Checksum);
	}
	let mut account = [0u8; 32];
	account.copy_from_slice(&payload[1..]);
	Ok(account)
}

#[cfg(test)]
mod tests {
	use super::*;
	use hex_literal::hex;
	use test_case::test_case;

	#[test_case(hex!("d43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d"), "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY" ; "alice")]
	#[test_case(hex!("84d83d08ca89f8e60424ffa286f165c16dd8752e4faa4d8977221e6720678d28"), "5F4tQyWrhfGVcNhoqeiNsR6KjD4wMZ2kfhLj4oHYuyHbZAc3" ; "sender")]
	#[test_case(hex!("1874a43d7c6d888f9eda3d22a3a49704e3cadb240eb80652ef58ffaf4857fa44"), "5Ccmf1dJKzGtXX7h17eN72MVMRsFwvYjPVmkXPUaapczECf6" ; "receiver")]
	fn ss58_addresses(account: [u8; 32], address: &str) {
		assert_eq!(ss58_encode(&account), address);
		assert_eq!(ss58_decode(address), Ok(account));
	}

	#[test]
	fn ss58_rejects_bad_checksum() {
		let mut address = ss58_encode(&[1u8; 32]);
		let last = address.pop().unwrap();
		address.push(if last == 'a' { 'b' } else { 'a' });
		assert_eq!(ss58_decode(&address), Err(Ss58Error::Checksum));
		assert!(matches!(ss58_decode("0OIl"), Err(Ss58Error::Base58(_))));
	}

	#[test]
	fn well_known_storage_prefixes() {
		assert_eq!(
			storage_prefix("System", "Events"),
			hex!("26aa394eea5630e07c48ae0c9558cef780d41e5e16056765bc8461851072c9d7")
		);
		assert_eq!(
			storage_prefix("Timestamp", "Now"),
			hex!("f0c365c3cf59d671eb72da0e7a4113c49f1f0515f462cdcf84e0f1d6045dfcbb")
		);
	}

	#[test]
	fn concat_hashers_keep_key() {
		let encoded = hex!("0100");
		assert_eq!(hash_storage_key(StorageHasher::Identity, &encoded), encoded);
		let twox = hash_storage_key(StorageHasher::Twox64Concat, &encoded);
		assert_eq!(twox.len(), 10);
		assert_eq!(twox[8..], encoded);
		let blake = hash_storage_key(StorageHasher::Blake2_128Concat, &encoded);
		assert_eq!(blake.len(), 18);
		assert_eq!(blake[16..], encoded);
	}

	#[test_case(0, 50 => true)]
	#[test_case(100, 50 => true)]
	#[test_case(101, 50 => false)]
	#[test_case(100, 0 => false ; "disabled")]
	fn sampling_heights(height: BlockHeight, interval: u32) -> bool {
		is_sampling_height(height, interval)
	}
}
