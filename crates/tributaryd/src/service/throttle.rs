//! Tenant admission control.

use std::time::Duration;

use crate::query::QueryError;

/// External gatekeeper consulted before a request is queued.
///
/// Implementations may block while the tenant's budget refills; the time
/// spent is returned so it can be reported.
#[cfg_attr(test, mockall::automock)]
pub trait Throttler: Send + Sync {
    /// Admits or rejects a request from `tenant` (`None` for anonymous
    /// requests).
    ///
    /// # Errors
    ///
    /// Returns the rejection, typically a tenant-throttled or
    /// request-rate error.
    fn admit<'a>(&self, tenant: Option<&'a str>) -> Result<Duration, QueryError>;
}
