use std::{
	fmt::Debug,
	future::Future,
	sync::{Arc, Mutex},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Shutdown controller shared by every task of the process.
///
/// The first triggered shutdown wins and its reason is kept. Futures wrapped with
/// [`Controller::with_cancel`] resolve to `Err(reason)` once the shutdown is triggered.
/// The controller is cheap to clone and thread-safe.
#[derive(Clone)]
pub struct Controller<T: Clone> {
	token: CancellationToken,
	reason: Arc<Mutex<Option<T>>>,
}

impl<T: Clone + Debug> Controller<T> {
	pub fn new() -> Self {
		Self {
			token: CancellationToken::new(),
			reason: Arc::new(Mutex::new(None)),
		}
	}

	pub fn is_shutdown_triggered(&self) -> bool {
		self.token.is_cancelled()
	}

	/// Returns [`None`] if the shutdown has not been triggered yet.
	pub fn shutdown_reason(&self) -> Option<T> {
		self.reason.lock().unwrap().clone()
	}

	/// Triggers the shutdown. Fails if it was already triggered, keeping the original reason.
	pub fn trigger_shutdown(&self, reason: T) -> Result<(), ShutdownHasStarted<T>> {
		let mut current = self.reason.lock().unwrap();
		if let Some(original) = current.as_ref() {
			return Err(ShutdownHasStarted {
				reason: original.clone(),
				ignored: reason,
			});
		}
		*current = Some(reason);
		self.token.cancel();
		Ok(())
	}

	/// Resolves with the shutdown reason once the shutdown is triggered.
	pub async fn triggered_shutdown(&self) -> T {
		self.token.cancelled().await;
		self.reason
			.lock()
			.unwrap()
			.clone()
			.expect("reason is set before the token is cancelled")
	}

	/// Runs the future until it completes or the shutdown is triggered.
	pub async fn with_cancel<F: Future>(&self, future: F) -> Result<F::Output, T> {
		tokio::select! {
			biased;
			reason = self.triggered_shutdown() => Err(reason),
			output = future => Ok(output),
		}
	}

	/// Runs the future and triggers the shutdown when it completes.
	pub async fn with_trigger<F: Future>(&self, reason: T, future: F) -> F::Output {
		let output = future.await;
		let _ = self.trigger_shutdown(reason);
		output
	}

	/// Triggers the shutdown on Ctrl-C or SIGTERM.
	pub async fn on_user_signal(self, reason: T) {
		user_signal().await;
		let _ = self.trigger_shutdown(reason);
	}
}

impl<T: Clone + Debug> Default for Controller<T> {
	fn default() -> Self {
		Self::new()
	}
}

/// Returned when the shutdown is triggered more than once.
#[derive(Debug, Clone, Error)]
#[error("Shutdown has already started with reason {reason:?}, ignoring {ignored:?}")]
pub struct ShutdownHasStarted<T: Debug> {
	/// Reason of the shutdown in progress.
	pub reason: T,
	pub ignored: T,
}

/// Completes on each of the default termination signals.
///
/// On Unix these are Ctrl-C (SIGINT) and SIGTERM, on Windows Ctrl-C only.
pub async fn user_signal() {
	let ctrl_c = tokio::signal::ctrl_c();
	#[cfg(unix)]
	{
		let sig = async {
			let mut os_sig =
				tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
			os_sig.recv().await;
			std::io::Result::Ok(())
		};

		tokio::select! {
			_ = ctrl_c => {},
			_ = sig => {}
		}
	}

	#[cfg(not(unix))]
	{
		let _ = ctrl_c.await;
	}
}
