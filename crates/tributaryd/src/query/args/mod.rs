//! Argument extraction: turns a raw request payload into validated,
//! typed [`QueryParams`].
//!
//! Two strategies share one contract: [`FormArgs`] for URL-encoded payloads
//! and [`JsonArgs`] for JSON bodies. Both walk their fields through
//! [`Builder::apply`], whose `match` over [`Parameter`] is the single
//! name-to-handler table.

mod form;
mod json;
mod parameter;
mod value;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;
use strum::{Display, EnumString};

use self::form::FormArgs;
use self::json::JsonArgs;
pub(crate) use self::parameter::{FieldName, Parameter};
use self::value::ArgValue;
use super::errors::QueryError;
use super::prepared::{Prepared, PreparedCache, resolve_prepared};
use super::scan_vector::{ScanConfig, ScanParameters};
use super::tristate::Tristate;

/// Longest client context id echoed back to the client.
pub const MAX_CLIENT_CONTEXT_ID: usize = 64;

/// The statement a request executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Ad-hoc statement text.
    Text(String),
    /// A prepared statement resolved from the cache or an encoded plan.
    Prepared(Arc<Prepared>),
}

impl Statement {
    /// Statement text, either ad-hoc or the prepared statement's source.
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Prepared(prepared) => prepared.statement(),
        }
    }

    /// Prepared statement name, when executing one.
    #[must_use]
    pub fn prepared_name(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Prepared(prepared) => Some(prepared.name()),
        }
    }
}

impl Default for Statement {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// Profiling detail requested by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Profile {
    /// No profile in the response.
    #[default]
    Off,
    /// Per-phase totals.
    Phases,
    /// Per-operator timings.
    Timings,
}

/// A user/password pair presented with the request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    user: String,
    password: String,
}

impl Credential {
    /// Builds a credential.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// User name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Validated request parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams {
    /// Statement to execute.
    pub statement: Statement,
    /// `$name` arguments, without the `$`.
    pub named_args: BTreeMap<String, Value>,
    /// Positional arguments.
    pub positional_args: Vec<Value>,
    /// Namespace unqualified keyspaces resolve in.
    pub namespace: Option<String>,
    /// Client-requested timeout.
    pub timeout: Option<Duration>,
    /// Scan-consistency settings.
    pub scan: ScanConfig,
    /// Whether mutations are forbidden.
    pub readonly: bool,
    /// `metrics` toggle.
    pub metrics: Tristate,
    /// `signature` toggle.
    pub signature: Tristate,
    /// `pretty` toggle.
    pub pretty: Tristate,
    /// `controls` toggle.
    pub controls: Tristate,
    /// Profiling detail.
    pub profile: Profile,
    /// Executor parallelism cap.
    pub max_parallelism: Option<u64>,
    /// Index scan buffer cap.
    pub scan_cap: Option<u64>,
    /// Operator pipeline buffer cap.
    pub pipeline_cap: Option<u64>,
    /// Operator pipeline batch size.
    pub pipeline_batch: Option<u64>,
    /// Highest index API version the executor may use.
    pub max_index_api: Option<u64>,
    /// Executor feature-control bitmask.
    pub feature_controls: Option<u64>,
    /// `auto_prepare` toggle.
    pub auto_prepare: Tristate,
    /// `auto_execute` toggle.
    pub auto_execute: Tristate,
    /// `use_fts` toggle.
    pub use_fts: Tristate,
    /// Opaque id echoed back to the client.
    pub client_context_id: Option<String>,
    /// Credentials from `creds` and the `Authorization` header.
    pub credentials: Vec<Credential>,
    /// Transaction the request belongs to.
    pub txid: Option<String>,
}

impl QueryParams {
    /// Statement-only parameters, mostly useful for executors under test.
    pub fn for_statement(statement: impl Into<String>) -> Self {
        Self {
            statement: Statement::Text(statement.into()),
            ..Self::default()
        }
    }
}

/// Transport-neutral view of an inbound request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Payload<'a> {
    pub(crate) method: &'a str,
    pub(crate) query: Option<&'a str>,
    pub(crate) content_type: Option<&'a str>,
    pub(crate) body: &'a [u8],
    pub(crate) authorization: Option<&'a str>,
}

/// The two payload encodings.
#[derive(Debug)]
pub(crate) enum RequestArgs {
    Form(FormArgs),
    Json(JsonArgs),
}

impl RequestArgs {
    fn from_payload(payload: &Payload<'_>, post: bool) -> Result<Self, QueryError> {
        let is_json = payload
            .content_type
            .and_then(|value| value.split(';').next())
            .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"));
        if post && is_json {
            JsonArgs::parse(payload.body).map(Self::Json)
        } else {
            FormArgs::parse(post, payload.query, payload.body).map(Self::Form)
        }
    }

    fn for_each<F>(&self, visit: F) -> Result<(), QueryError>
    where
        F: FnMut(FieldName<'_>, ArgValue<'_>) -> Result<(), QueryError>,
    {
        match self {
            Self::Form(args) => args.for_each(visit),
            Self::Json(args) => args.for_each(visit),
        }
    }
}

/// Parses and validates `payload`.
///
/// Handlers run in field order and the first failure aborts extraction;
/// cross-field rules run afterwards.
pub(crate) fn extract(
    payload: &Payload<'_>,
    prepareds: &dyn PreparedCache,
) -> Result<QueryParams, QueryError> {
    let post = match payload.method {
        "POST" => true,
        "GET" => false,
        other => return Err(QueryError::http_method(other)),
    };
    let args = RequestArgs::from_payload(payload, post)?;
    let mut builder = Builder::default();
    args.for_each(|field, value| builder.apply(field, value))?;
    builder.finish(post, payload.authorization, prepareds)
}

#[derive(Debug, Default)]
struct Builder {
    statement: Option<String>,
    prepared: Option<String>,
    encoded_plan: Option<String>,
    readonly: Option<bool>,
    scan: ScanParameters,
    params: QueryParams,
}

impl Builder {
    fn apply(&mut self, field: FieldName<'_>, value: ArgValue<'_>) -> Result<(), QueryError> {
        match field {
            FieldName::Known(parameter) => self.apply_parameter(parameter, value),
            FieldName::Named(name) => {
                let argument = value.json(&format!("${name}"))?;
                self.params.named_args.insert(name.to_owned(), argument);
                Ok(())
            }
            FieldName::Ignored | FieldName::Unknown(_) => Ok(()),
        }
    }

    fn apply_parameter(
        &mut self,
        parameter: Parameter,
        value: ArgValue<'_>,
    ) -> Result<(), QueryError> {
        let params = &mut self.params;
        match parameter {
            Parameter::Statement => self.statement = Some(value.string(parameter)?),
            Parameter::Prepared => self.prepared = Some(value.string(parameter)?),
            Parameter::EncodedPlan => self.encoded_plan = Some(value.string(parameter)?),
            Parameter::Creds => {
                let creds = value.json(parameter.name())?;
                params.credentials.extend(parse_creds(&creds)?);
            }
            Parameter::Args => match value.json(parameter.name())? {
                Value::Array(items) => params.positional_args = items,
                _ => return Err(QueryError::type_mismatch(parameter.name(), "array")),
            },
            Parameter::Timeout => {
                let limit = value.duration(parameter)?;
                params.timeout = (!limit.is_zero()).then_some(limit);
            }
            Parameter::ScanConsistency => {
                let level = value.string(parameter)?;
                self.scan.consistency = level
                    .parse()
                    .map_err(|_| QueryError::unrecognized_value(parameter.name(), &level))?;
            }
            Parameter::ScanWait => self.scan.wait = Some(value.duration(parameter)?),
            Parameter::ScanVector => self.scan.vector = Some(value.json(parameter.name())?),
            Parameter::ScanVectors => self.scan.vectors = Some(value.json(parameter.name())?),
            Parameter::MaxParallelism => params.max_parallelism = Some(value.unsigned(parameter)?),
            Parameter::ScanCap => params.scan_cap = Some(value.unsigned(parameter)?),
            Parameter::PipelineCap => params.pipeline_cap = Some(value.unsigned(parameter)?),
            Parameter::PipelineBatch => params.pipeline_batch = Some(value.unsigned(parameter)?),
            Parameter::Readonly => self.readonly = Some(value.boolean(parameter)?),
            Parameter::Metrics => params.metrics = value.tristate(parameter)?,
            Parameter::Namespace => params.namespace = Some(value.string(parameter)?),
            Parameter::Format => check_format(&value.string(parameter)?)?,
            Parameter::Encoding => check_encoding(&value.string(parameter)?)?,
            Parameter::Compression => check_compression(&value.string(parameter)?)?,
            Parameter::Signature => params.signature = value.tristate(parameter)?,
            Parameter::Pretty => params.pretty = value.tristate(parameter)?,
            Parameter::ClientContextId => {
                params.client_context_id = Some(client_context_id(value)?);
            }
            Parameter::Profile => {
                let profile = value.string(parameter)?;
                params.profile = profile
                    .parse()
                    .map_err(|_| QueryError::unrecognized_value(parameter.name(), &profile))?;
            }
            Parameter::Controls => params.controls = value.tristate(parameter)?,
            Parameter::N1qlFeatCtrl => params.feature_controls = Some(value.unsigned(parameter)?),
            Parameter::MaxIndexApi => params.max_index_api = Some(value.unsigned(parameter)?),
            Parameter::AutoPrepare => params.auto_prepare = value.tristate(parameter)?,
            Parameter::AutoExecute => params.auto_execute = value.tristate(parameter)?,
            Parameter::UseFts => params.use_fts = value.tristate(parameter)?,
            Parameter::Txid => params.txid = Some(value.string(parameter)?),
        }
        Ok(())
    }

    fn finish(
        self,
        post: bool,
        authorization: Option<&str>,
        prepareds: &dyn PreparedCache,
    ) -> Result<QueryParams, QueryError> {
        let Self {
            statement,
            prepared,
            encoded_plan,
            readonly,
            scan,
            mut params,
        } = self;

        let statement = statement.filter(|text| !text.trim().is_empty());
        params.statement = match (statement, prepared) {
            (Some(_), Some(_)) => return Err(QueryError::multiple_values("statement and prepared")),
            (None, None) => return Err(QueryError::missing_value("statement or prepared")),
            (Some(text), None) => Statement::Text(text),
            (None, Some(name)) => Statement::Prepared(resolve_prepared(
                prepareds,
                &name,
                encoded_plan.as_deref(),
            )?),
        };

        params.readonly = match (post, readonly) {
            (false, Some(false)) => return Err(QueryError::readonly()),
            (false, _) => true,
            (true, flag) => flag.unwrap_or(false),
        };

        params.scan = scan.resolve()?;

        if let Some(header) = authorization {
            params.credentials.push(basic_credentials(header)?);
        }
        Ok(params)
    }
}

fn check_format(value: &str) -> Result<(), QueryError> {
    match value.to_ascii_uppercase().as_str() {
        "JSON" => Ok(()),
        "XML" | "CBOR" | "BSON" => Err(QueryError::not_implemented("format", value)),
        _ => Err(QueryError::unrecognized_value("format", value)),
    }
}

fn check_encoding(value: &str) -> Result<(), QueryError> {
    match value.to_ascii_uppercase().as_str() {
        "UTF-8" | "UTF8" => Ok(()),
        _ => Err(QueryError::unrecognized_value("encoding", value)),
    }
}

fn check_compression(value: &str) -> Result<(), QueryError> {
    match value.to_ascii_uppercase().as_str() {
        "NONE" => Ok(()),
        "ZIP" | "RLE" | "LZMA" | "LZO" => Err(QueryError::not_implemented("compression", value)),
        _ => Err(QueryError::unrecognized_value("compression", value)),
    }
}

fn client_context_id(value: ArgValue<'_>) -> Result<String, QueryError> {
    let id = match value {
        ArgValue::Json(Value::Number(number)) => number.to_string(),
        other => other.string(Parameter::ClientContextId)?,
    };
    if id.contains(['"', '\\']) {
        return Err(QueryError::client_id());
    }
    Ok(id.chars().take(MAX_CLIENT_CONTEXT_ID).collect())
}

fn parse_creds(value: &Value) -> Result<Vec<Credential>, QueryError> {
    const CREDS: &str = "creds";
    let Value::Array(items) = value else {
        return Err(QueryError::type_mismatch(CREDS, "array of {user, pass}"));
    };
    items
        .iter()
        .map(|item| {
            let Value::Object(fields) = item else {
                return Err(QueryError::type_mismatch(CREDS, "array of {user, pass}"));
            };
            let field = |key: &str| match fields.get(key) {
                Some(Value::String(text)) => Ok(text.clone()),
                Some(_) => Err(QueryError::type_mismatch(&format!("{CREDS}.{key}"), "string")),
                None => Err(QueryError::missing_value(&format!("{key} in {CREDS}"))),
            };
            Ok(Credential::new(field("user")?, field("pass")?))
        })
        .collect()
}

/// Decodes `Basic` credentials, accepting `user:pass` and
/// `domain:user:pass`; the latter keeps the domain in the user name.
fn basic_credentials(header: &str) -> Result<Credential, QueryError> {
    const AUTHORIZATION: &str = "Authorization header";
    let encoded = header
        .trim()
        .strip_prefix("Basic ")
        .ok_or_else(|| QueryError::bad_value(AUTHORIZATION, "expected Basic credentials"))?;
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|error| QueryError::bad_value(AUTHORIZATION, error))?;
    let text = String::from_utf8(decoded)
        .map_err(|error| QueryError::bad_value(AUTHORIZATION, error))?;
    let parts: Vec<&str> = text.split(':').collect();
    match parts.as_slice() {
        [user, password] => Ok(Credential::new(*user, *password)),
        [domain, user, password] => Ok(Credential::new(format!("{domain}:{user}"), *password)),
        _ => Err(QueryError::bad_value(AUTHORIZATION, "malformed credentials")),
    }
}
