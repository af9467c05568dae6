use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

mod client;
pub mod configuration;

pub use client::Client;

use crate::utils::rng;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
	pub host: String,
}

impl Display for Node {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.host)
	}
}

#[derive(Clone, Debug)]
pub struct Nodes {
	list: Vec<Node>,
}

impl Nodes {
	pub fn new(nodes: &[String]) -> Self {
		Self {
			list: nodes
				.iter()
				.map(|host| Node {
					host: host.to_string(),
				})
				.collect(),
		}
	}

	/// Shuffles the list of available Nodes, partitioning out the host currently in use.
	///
	/// Returns the shuffled other Nodes followed by the current one, so that switching
	/// after a failure tries different hosts first.
	pub fn shuffle(&self, current_host: &str) -> Vec<Node> {
		let (mut others, current): (Vec<_>, Vec<_>) = self
			.list
			.iter()
			.cloned()
			.partition(|Node { host }| host != current_host);
		others.shuffle(&mut rng());
		others.extend(current);
		others
	}
}
