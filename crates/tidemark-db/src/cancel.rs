//! Cooperative cancellation of suspension points

use std::future::Future;
use tidemark_core::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Runs `future` unless `token` is cancelled first.
///
/// An already cancelled token wins without polling `future`.
///
/// # Examples
///
/// ```
/// use tidemark_db::cancel::cancellable;
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let token = CancellationToken::new();
/// assert_eq!(cancellable(&token, async { 7 }).await.unwrap(), 7);
///
/// token.cancel();
/// assert!(cancellable(&token, async { 7 }).await.unwrap_err().is_canceled());
/// # });
/// ```
pub async fn cancellable<F>(token: &CancellationToken, future: F) -> Result<F::Output>
where
	F: Future,
{
	tokio::select! {
		biased;
		_ = token.cancelled() => Err(Error::Canceled),
		output = future => Ok(output),
	}
}
