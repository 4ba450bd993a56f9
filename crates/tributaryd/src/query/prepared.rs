//! Named prepared statements and the cache that resolves them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::QueryError;

/// A cached, named, pre-planned statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prepared {
    name: String,
    statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<Value>,
    #[serde(default)]
    plan: Value,
}

impl Prepared {
    /// Builds a prepared statement.
    pub fn new(name: impl Into<String>, statement: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            statement: statement.into(),
            signature: None,
            plan: Value::Null,
        }
    }

    /// Attaches the result signature.
    #[must_use]
    pub fn with_signature(mut self, signature: Value) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Attaches an executor-specific plan.
    #[must_use]
    pub fn with_plan(mut self, plan: Value) -> Self {
        self.plan = plan;
        self
    }

    /// Name clients refer to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statement text the plan was built from.
    #[must_use]
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Result signature, if known.
    #[must_use]
    pub const fn signature(&self) -> Option<&Value> {
        self.signature.as_ref()
    }

    /// Executor-specific plan.
    #[must_use]
    pub const fn plan(&self) -> &Value {
        &self.plan
    }

    /// Base64 form accepted by the `encoded_plan` parameter.
    ///
    /// # Errors
    ///
    /// Fails only if the plan holds a value JSON cannot represent.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_vec(self).map(|bytes| STANDARD.encode(bytes))
    }

    fn decode(encoded: &str) -> Result<Self, QueryError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(QueryError::prepared_decoding)?;
        serde_json::from_slice(&bytes).map_err(QueryError::prepared_decoding)
    }
}

/// Lookup table of prepared statements.
#[cfg_attr(test, mockall::automock)]
pub trait PreparedCache: Send + Sync {
    /// Returns the statement registered under `name`.
    fn get(&self, name: &str) -> Option<Arc<Prepared>>;

    /// Registers or replaces a statement.
    fn add(&self, prepared: Arc<Prepared>);
}

/// Process-local [`PreparedCache`].
#[derive(Debug, Default)]
pub struct PreparedStatements {
    entries: RwLock<HashMap<String, Arc<Prepared>>>,
}

impl PreparedStatements {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreparedCache for PreparedStatements {
    fn get(&self, name: &str) -> Option<Arc<Prepared>> {
        let entries = self
            .entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.get(name).cloned()
    }

    fn add(&self, prepared: Arc<Prepared>) {
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entries.insert(prepared.name().to_owned(), prepared);
    }
}

/// Finds `name` in the cache, falling back to decoding `encoded_plan` only
/// when the cache has no such entry.
pub(crate) fn resolve_prepared(
    cache: &dyn PreparedCache,
    name: &str,
    encoded_plan: Option<&str>,
) -> Result<Arc<Prepared>, QueryError> {
    if let Some(prepared) = cache.get(name) {
        return Ok(prepared);
    }
    let Some(encoded) = encoded_plan else {
        return Err(QueryError::no_such_prepared(name));
    };
    let decoded = Prepared::decode(encoded)?;
    if decoded.name() != name {
        return Err(QueryError::prepared_decoding(format!(
            "encoded plan is named {} but {name} was requested",
            decoded.name()
        )));
    }
    let prepared = Arc::new(decoded);
    cache.add(Arc::clone(&prepared));
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use serde_json::json;

    use super::*;
    use crate::query::errors::ErrorCode;

    #[test]
    fn cached_statement_wins_over_encoded_plan() {
        let cached = Arc::new(Prepared::new("p1", "SELECT 1"));
        let mut cache = MockPreparedCache::new();
        cache
            .expect_get()
            .with(eq("p1"))
            .return_const(Some(Arc::clone(&cached)));
        cache.expect_add().never();

        let resolved = resolve_prepared(&cache, "p1", Some("not even base64")).expect("resolves");
        assert_eq!(resolved, cached);
    }

    #[test]
    fn unknown_name_without_plan_is_no_such_prepared() {
        let cache = PreparedStatements::new();
        let error = resolve_prepared(&cache, "p1", None).expect_err("must fail");
        assert_eq!(error.code(), ErrorCode::NO_SUCH_PREPARED);
        assert_eq!(error.http_status(), 404);
    }

    #[test]
    fn encoded_plan_is_decoded_and_cached() {
        let cache = PreparedStatements::new();
        let prepared = Prepared::new("p2", "SELECT 2").with_signature(json!({"$1": "number"}));
        let encoded = prepared.encode().expect("encode");

        let resolved = resolve_prepared(&cache, "p2", Some(&encoded)).expect("resolves");
        assert_eq!(*resolved, prepared);
        assert_eq!(cache.get("p2").as_deref(), Some(&prepared));
    }

    #[test]
    fn mismatched_or_corrupt_plans_fail_decoding() {
        let cache = PreparedStatements::new();
        let other = Prepared::new("other", "SELECT 3").encode().expect("encode");

        let mismatch = resolve_prepared(&cache, "p3", Some(&other)).expect_err("mismatch");
        assert_eq!(mismatch.code(), ErrorCode::PREPARED_DECODING);

        let corrupt = resolve_prepared(&cache, "p3", Some("%%%")).expect_err("corrupt");
        assert_eq!(corrupt.code(), ErrorCode::PREPARED_DECODING);
    }
}
