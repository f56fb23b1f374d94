//! Auth guard: token lifecycle and transparent re-authentication
//!
//! The service's bearer tokens are short-lived. Any operation can fail with a
//! 401 mid-run; the guard re-authenticates with the stored credentials and
//! replays the operation, up to a bounded number of *consecutive* failures.
//! A successful operation resets the budget, so the bound applies to failure
//! streaks, not to the lifetime of the run.

use crate::client::LoadTestApi;
use crate::error::Result;
use crate::types::Credentials;
use std::future::Future;

/// Maximum consecutive auth failures before the error is propagated
pub const MAX_AUTH_RETRIES: u32 = 3;

/// Owns the credentials for one run and the consecutive-failure budget.
///
/// Scoped per run, not process-wide: running several orchestrators in
/// parallel gives each its own guard.
pub struct AuthGuard {
    credentials: Credentials,
    retries: u32,
}

impl AuthGuard {
    /// Create a guard holding the credentials for the run
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            retries: 0,
        }
    }

    /// Authenticate against the service, making the refreshed token current
    pub async fn login<A: LoadTestApi + ?Sized>(&self, api: &A) -> Result<()> {
        api.authenticate(&self.credentials).await
    }

    /// Run an operation, transparently re-authenticating and replaying it on
    /// authorization failures.
    ///
    /// The operation is the retry unit: when the orchestrator passes its
    /// whole poll-and-download sequence here, an expired token anywhere in
    /// the sequence replays the sequence, not just the failing call.
    /// Non-auth errors propagate unchanged, as do auth errors once the
    /// budget of consecutive failures is spent.
    pub async fn with_retry<A, F, Fut, T>(&mut self, api: &A, mut operation: F) -> Result<T>
    where
        A: LoadTestApi + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        loop {
            match operation().await {
                Ok(value) => {
                    self.retries = 0;
                    return Ok(value);
                }
                Err(e) if e.is_auth_error() && self.retries < MAX_AUTH_RETRIES => {
                    self.retries += 1;
                    tracing::warn!(
                        attempt = self.retries,
                        max_attempts = MAX_AUTH_RETRIES,
                        error = %e,
                        "authorization expired, re-authenticating"
                    );
                    self.login(api).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
