//! Scan-consistency model: consistency levels, scan vectors, and the
//! per-keyspace vector source handed to the executor.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use strum::{Display, EnumString, IntoStaticStr};

use super::errors::{ErrorCode, QueryError};

/// Number of partitions covered by a full scan vector.
pub const SCAN_VECTOR_SIZE: usize = 1024;

/// Namespace assumed when a vector-map key names only a keyspace.
pub const DEFAULT_NAMESPACE: &str = "default";

const SCAN_VECTOR: &str = "scan_vector";
const SCAN_VECTORS: &str = "scan_vectors";

/// How fresh index scans must be relative to the request.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, EnumString, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ScanConsistency {
    /// Serve whatever the index holds.
    #[default]
    NotBounded,
    /// Observe every mutation acknowledged before the request arrived.
    RequestPlus,
    /// Observe every mutation acknowledged before the statement started.
    StatementPlus,
    /// Observe at least the mutations named by a scan vector.
    AtPlus,
}

/// One partition bound: mutations up to `sequence` under `guard` must be visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanVectorEntry {
    position: u32,
    sequence: u64,
    guard: String,
}

impl ScanVectorEntry {
    /// Builds an entry.
    pub fn new(position: u32, sequence: u64, guard: impl Into<String>) -> Self {
        Self {
            position,
            sequence,
            guard: guard.into(),
        }
    }

    /// Partition position.
    #[must_use]
    pub const fn position(&self) -> u32 {
        self.position
    }

    /// Sequence number that must be observed.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Partition guard token.
    #[must_use]
    pub fn guard(&self) -> &str {
        &self.guard
    }
}

/// Entries ordered by partition position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScanVector {
    entries: Vec<ScanVectorEntry>,
}

static EMPTY_VECTOR: ScanVector = ScanVector {
    entries: Vec::new(),
};

impl ScanVector {
    /// Entries in position order.
    #[must_use]
    pub fn entries(&self) -> &[ScanVectorEntry] {
        &self.entries
    }

    /// Number of bounded partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no partition is bounded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses either the full form (an array of exactly
    /// [`SCAN_VECTOR_SIZE`] `[sequence, guard]` pairs) or the sparse form (an
    /// object keyed by partition position).
    pub(crate) fn from_json(parameter: &str, value: &Value) -> Result<Self, QueryError> {
        match value {
            Value::Array(items) => Self::from_full(parameter, items),
            Value::Object(items) => Self::from_sparse(parameter, items),
            _ => Err(QueryError::type_mismatch(parameter, "array or object")),
        }
    }

    fn from_full(parameter: &str, items: &[Value]) -> Result<Self, QueryError> {
        if items.len() != SCAN_VECTOR_SIZE {
            return Err(QueryError::bad_value(
                parameter,
                format!("full vector has to contain {SCAN_VECTOR_SIZE} entries"),
            ));
        }
        let entries = items
            .iter()
            .zip(0_u32..)
            .map(|(item, position)| parse_entry(position, item))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    fn from_sparse(parameter: &str, items: &Map<String, Value>) -> Result<Self, QueryError> {
        if items.is_empty() {
            return Err(QueryError::bad_value(
                parameter,
                "sparse vector has to contain at least one entry",
            ));
        }
        let mut entries = items
            .iter()
            .map(|(key, item)| {
                let position = parse_position(parameter, key)?;
                parse_entry(position, item)
            })
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(ScanVectorEntry::position);
        Ok(Self { entries })
    }
}

fn parse_position(parameter: &str, key: &str) -> Result<u32, QueryError> {
    key.trim()
        .parse::<u32>()
        .ok()
        .filter(|position| usize::try_from(*position).is_ok_and(|p| p < SCAN_VECTOR_SIZE))
        .ok_or_else(|| QueryError::bad_value(parameter, format!("invalid partition {key}")))
}

fn parse_entry(position: u32, item: &Value) -> Result<ScanVectorEntry, QueryError> {
    let (sequence, guard) = match item.as_array().map(Vec::as_slice) {
        Some([sequence, guard]) => (sequence, guard),
        _ => {
            return Err(QueryError::new(
                ErrorCode::SCAN_VECTOR_LENGTH,
                format!("Array {position} in scan vector has to contain two elements"),
            ));
        }
    };
    let sequence = sequence.as_u64().ok_or_else(|| {
        QueryError::new(
            ErrorCode::SCAN_VECTOR_SEQUENCE,
            format!("Bad sequence number {sequence} in scan vector at {position}"),
        )
    })?;
    let guard = guard.as_str().ok_or_else(|| {
        QueryError::new(
            ErrorCode::SCAN_VECTOR_GUARD,
            format!("Bad guard {guard} in scan vector at {position}"),
        )
    })?;
    Ok(ScanVectorEntry::new(position, sequence, guard))
}

/// Fully-qualified keyspace used as a vector-map key.
#[derive(Debug)]
struct KeyspaceKey {
    namespace: String,
    keyspace: String,
}

impl KeyspaceKey {
    fn parse(key: &str) -> Self {
        match key.split_once(':') {
            Some((namespace, keyspace)) => Self::new(namespace, keyspace),
            None => Self::new(DEFAULT_NAMESPACE, key),
        }
    }

    fn new(namespace: &str, keyspace: &str) -> Self {
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };
        Self {
            namespace: namespace.to_owned(),
            keyspace: keyspace.to_owned(),
        }
    }
}

/// Where the executor finds the vector bounding a keyspace scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScanVectorSource {
    /// No bound on any keyspace.
    #[default]
    Zero,
    /// One vector applied to every keyspace.
    Single(ScanVector),
    /// Vectors per fully-qualified keyspace.
    PerKeyspace(HashMap<(String, String), ScanVector>),
}

impl ScanVectorSource {
    /// Vector bounding `namespace:keyspace`; unknown keyspaces get an empty
    /// vector.
    #[must_use]
    pub fn scan_vector(&self, namespace: &str, keyspace: &str) -> &ScanVector {
        match self {
            Self::Zero => &EMPTY_VECTOR,
            Self::Single(vector) => vector,
            Self::PerKeyspace(vectors) => {
                let key = KeyspaceKey::new(namespace, keyspace);
                vectors
                    .get(&(key.namespace, key.keyspace))
                    .unwrap_or(&EMPTY_VECTOR)
            }
        }
    }

    fn per_keyspace(items: &Map<String, Value>) -> Result<Self, QueryError> {
        let mut vectors = HashMap::with_capacity(items.len());
        for (key, value) in items {
            let KeyspaceKey {
                namespace,
                keyspace,
            } = KeyspaceKey::parse(key);
            let vector = ScanVector::from_json(SCAN_VECTORS, value)?;
            vectors.insert((namespace, keyspace), vector);
        }
        Ok(Self::PerKeyspace(vectors))
    }
}

/// Scan settings derived from the consistency parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanConfig {
    consistency: ScanConsistency,
    wait: Option<Duration>,
    vectors: ScanVectorSource,
}

impl ScanConfig {
    /// Requested consistency level.
    #[must_use]
    pub const fn consistency(&self) -> ScanConsistency {
        self.consistency
    }

    /// Longest time a scan may wait for the index to catch up.
    #[must_use]
    pub const fn wait(&self) -> Option<Duration> {
        self.wait
    }

    /// Vector source for the executor.
    #[must_use]
    pub const fn vectors(&self) -> &ScanVectorSource {
        &self.vectors
    }
}

/// Raw consistency parameters as extracted from the request.
#[derive(Debug, Default)]
pub(crate) struct ScanParameters {
    pub(crate) consistency: ScanConsistency,
    pub(crate) wait: Option<Duration>,
    pub(crate) vector: Option<Value>,
    pub(crate) vectors: Option<Value>,
}

impl ScanParameters {
    /// Resolves the parameters into a [`ScanConfig`].
    ///
    /// `at_plus` needs exactly one of `scan_vector` / `scan_vectors`; the two
    /// are mutually exclusive at every level.
    pub(crate) fn resolve(self) -> Result<ScanConfig, QueryError> {
        let vectors = match (self.vector, self.vectors) {
            (Some(_), Some(_)) => {
                return Err(QueryError::multiple_values(
                    "scan_vector and scan_vectors",
                ));
            }
            (Some(vector), None) => {
                ScanVectorSource::Single(ScanVector::from_json(SCAN_VECTOR, &vector)?)
            }
            (None, Some(Value::Object(items))) => ScanVectorSource::per_keyspace(&items)?,
            (None, Some(_)) => return Err(QueryError::type_mismatch(SCAN_VECTORS, "object")),
            (None, None) if self.consistency == ScanConsistency::AtPlus => {
                return Err(QueryError::missing_value(
                    "scan_vector or scan_vectors with scan_consistency at_plus",
                ));
            }
            (None, None) => ScanVectorSource::Zero,
        };
        Ok(ScanConfig {
            consistency: self.consistency,
            wait: self.wait,
            vectors,
        })
    }
}
