use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
	registry::ResolutionError,
	types::{BlockHeight, SpecVersion},
};

/// Runtime `spec_version` active from `start_height` (inclusive) until the next range starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRange {
	pub start_height: BlockHeight,
	pub spec_version: SpecVersion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
	Known(SpecVersion),
	/// Below genesis or beyond the indexed part of the chain.
	Unknown,
}

impl Resolution {
	pub fn known(self) -> Option<SpecVersion> {
		match self {
			Resolution::Known(spec_version) => Some(spec_version),
			Resolution::Unknown => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivationError {
	#[error("Activation table is empty")]
	Empty,
	#[error("Activation ranges must strictly increase: {previous:?} is followed by {next:?}")]
	NotIncreasing {
		previous: ActivationRange,
		next: ActivationRange,
	},
	#[error("Indexed bound {indexed_until} is below the last activation height {last_start}")]
	Bound {
		indexed_until: BlockHeight,
		last_start: BlockHeight,
	},
}

/// Maps block heights to the runtime version that executed them.
#[derive(Clone, Debug)]
pub struct SpecResolver {
	ranges: Vec<ActivationRange>,
	/// Last height known to run the latest registered runtime.
	indexed_until: BlockHeight,
}

impl SpecResolver {
	/// Without an indexed bound, only the activation height of the latest runtime is
	/// known to run it and every later height has to be confirmed with the node.
	pub fn new(
		ranges: Vec<ActivationRange>,
		indexed_until: Option<BlockHeight>,
	) -> Result<Self, ActivationError> {
		let last = ranges.last().ok_or(ActivationError::Empty)?;
		let indexed_until = indexed_until.unwrap_or(last.start_height);
		if indexed_until < last.start_height {
			return Err(ActivationError::Bound {
				indexed_until,
				last_start: last.start_height,
			});
		}

		for pair in ranges.windows(2) {
			let (previous, next) = (pair[0], pair[1]);
			if next.start_height <= previous.start_height
				|| next.spec_version <= previous.spec_version
			{
				return Err(ActivationError::NotIncreasing { previous, next });
			}
		}

		Ok(SpecResolver {
			ranges,
			indexed_until,
		})
	}

	/// Activation heights are inclusive, so an upgrade height resolves to the new version.
	pub fn resolve_height(&self, height: BlockHeight) -> Resolution {
		if height < self.genesis_height() {
			return Resolution::Unknown;
		}
		if height > self.indexed_until {
			return Resolution::Unknown;
		}

		let index = self
			.ranges
			.partition_point(|range| range.start_height <= height);
		// genesis check above guarantees at least one range starts at or below height
		Resolution::Known(self.ranges[index - 1].spec_version)
	}

	pub fn resolve(&self, height: BlockHeight) -> Result<SpecVersion, ResolutionError> {
		self.resolve_height(height)
			.known()
			.ok_or(ResolutionError::UnknownHeight(height))
	}

	/// Checks the runtime version reported by the node for a block past the indexed
	/// bound and, when it matches the latest registered runtime, extends the bound.
	pub fn confirm(
		&mut self,
		height: BlockHeight,
		reported: SpecVersion,
	) -> Result<SpecVersion, ResolutionError> {
		let resolved = match self.resolve_height(height) {
			Resolution::Known(spec_version) => spec_version,
			Resolution::Unknown if height >= self.genesis_height() => self.latest().spec_version,
			Resolution::Unknown => return Err(ResolutionError::UnknownHeight(height)),
		};

		if resolved != reported {
			return Err(ResolutionError::UnregisteredUpgrade {
				height,
				resolved,
				reported,
			});
		}
		self.extend_to(height);
		Ok(resolved)
	}

	/// Raises the indexed bound. A lower bound than the current one is ignored.
	pub fn extend_to(&mut self, height: BlockHeight) {
		if height > self.indexed_until {
			debug!(from = self.indexed_until, to = height, "Extending indexed bound");
			self.indexed_until = height;
		}
	}

	pub fn genesis_height(&self) -> BlockHeight {
		self.ranges[0].start_height
	}

	pub fn indexed_until(&self) -> BlockHeight {
		self.indexed_until
	}

	pub fn latest(&self) -> ActivationRange {
		self.ranges[self.ranges.len() - 1]
	}

}
