//! A small built-in executor for literal statements.
//!
//! It understands three forms, keyword case ignored:
//!
//! - `SELECT <json>[, <json> ...]` yields one row `{"$1": .., "$2": ..}`;
//! - `SELECT SLEEP(<ms>)` waits, then yields `{"$1": true}`;
//! - `SELECT RANGE(<n>)` yields `n` rows `{"$1": 0}` .. `{"$1": n - 1}`.
//!
//! Anything else is a syntax error.

use std::io;
use std::time::Duration;

use crossbeam::channel::RecvTimeoutError;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::query::QueryError;

use super::SERVICE_TARGET;
use super::executor::{Execution, ExecutionContext, ExecutionOutput, Executor};
use super::pool::{SubmitError, WorkerPool};

#[derive(Debug, Clone, PartialEq)]
enum Program {
    Literals(Vec<Value>),
    Sleep(Duration),
    Range(u64),
}

impl Program {
    fn parse(text: &str) -> Result<Self, QueryError> {
        let text = text.trim().trim_end_matches(';').trim_end();
        let rest = strip_keyword(text, "select")
            .ok_or_else(|| QueryError::parse_syntax(format!("expected SELECT in {text:?}")))?;
        if let Some(argument) = call(rest, "sleep") {
            let millis = parse_count(argument, "SLEEP")?;
            return Ok(Self::Sleep(Duration::from_millis(millis)));
        }
        if let Some(argument) = call(rest, "range") {
            return parse_count(argument, "RANGE").map(Self::Range);
        }
        let literals: Vec<Value> = serde_json::from_str(&format!("[{rest}]"))
            .map_err(|error| QueryError::parse_syntax(format!("invalid projection: {error}")))?;
        if literals.is_empty() {
            return Err(QueryError::parse_syntax("empty projection"));
        }
        Ok(Self::Literals(literals))
    }

    fn signature(&self) -> Value {
        match self {
            Self::Literals(values) => Value::Object(
                values
                    .iter()
                    .enumerate()
                    .map(|(index, value)| (column(index), json!(type_name(value))))
                    .collect(),
            ),
            Self::Sleep(_) => json!({ "$1": "boolean" }),
            Self::Range(_) => json!({ "$1": "number" }),
        }
    }

    fn run(self, context: &ExecutionContext, output: &ExecutionOutput) {
        match self {
            Self::Literals(values) => {
                let row: Map<String, Value> = values
                    .into_iter()
                    .enumerate()
                    .map(|(index, value)| (column(index), value))
                    .collect();
                output.send(Box::new(Value::Object(row)));
            }
            Self::Sleep(duration) => {
                match context.stop_signal().recv_timeout(duration) {
                    Err(RecvTimeoutError::Timeout) => {
                        output.send(Box::new(json!({ "$1": true })));
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!(target: SERVICE_TARGET, request_id = context.id(), "sleep cancelled");
                    }
                }
            }
            Self::Range(count) => {
                for index in 0..count {
                    if !output.send(Box::new(json!({ "$1": index }))) {
                        debug!(target: SERVICE_TARGET, request_id = context.id(), index, "range cancelled");
                        break;
                    }
                }
            }
        }
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let rest = text.get(keyword.len()..)?;
    (head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace))
        .then(|| rest.trim_start())
}

fn call<'a>(text: &'a str, function: &str) -> Option<&'a str> {
    let head = text.get(..function.len())?;
    if !head.eq_ignore_ascii_case(function) {
        return None;
    }
    text.get(function.len()..)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn parse_count(argument: &str, function: &str) -> Result<u64, QueryError> {
    argument.trim().parse().map_err(|_| {
        QueryError::parse_syntax(format!(
            "{function} expects a non-negative integer, got {:?}",
            argument.trim()
        ))
    })
}

fn column(index: usize) -> String {
    format!("${}", index + 1)
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Evaluates literal statements on its own worker pool.
#[derive(Debug)]
pub struct LiteralExecutor {
    pool: WorkerPool,
}

impl LiteralExecutor {
    /// Spawns `workers` evaluation threads with a backlog of `capacity`.
    ///
    /// # Errors
    ///
    /// Returns the spawn error when a worker thread cannot be started.
    pub fn new(workers: usize, capacity: usize) -> io::Result<Self> {
        Ok(Self {
            pool: WorkerPool::new("executor", workers, capacity)?,
        })
    }
}

impl Executor for LiteralExecutor {
    fn execute(
        &self,
        context: ExecutionContext,
        output: ExecutionOutput,
    ) -> Result<Execution, QueryError> {
        let program = Program::parse(context.statement_text())?;
        let signature = program.signature();
        self.pool
            .try_execute(move || {
                program.run(&context, &output);
                // The request must be released before the row channel closes.
                drop(context);
                drop(output);
            })
            .map_err(|error| match error {
                SubmitError::Full => QueryError::queue_full(),
                SubmitError::Closed => QueryError::shut_down(),
            })?;
        Ok(Execution {
            signature: Some(signature),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crossbeam::channel;
    use rstest::rstest;

    use crate::query::{ErrorCode, QueryParams, Request, ResponseDefaults, ResultRow, Row, State};

    use super::*;

    #[rstest]
    #[case("select 1", Program::Literals(vec![json!(1)]))]
    #[case("SELECT \"a\", [true, null];", Program::Literals(vec![json!("a"), json!([true, null])]))]
    #[case("select sleep(250)", Program::Sleep(Duration::from_millis(250)))]
    #[case("Select RANGE ( 3 )", Program::Range(3))]
    fn parses_supported_forms(#[case] text: &str, #[case] expected: Program) {
        assert_eq!(Program::parse(text), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("selectivity 1")]
    #[case("select")]
    #[case("select foo")]
    #[case("select range(-1)")]
    #[case("update x set y = 1")]
    fn rejects_everything_else(#[case] text: &str) {
        let error = Program::parse(text).expect_err("not a literal statement");
        assert_eq!(error.code(), ErrorCode::PARSE_SYNTAX);
    }

    #[test]
    fn signature_names_columns_by_position() {
        let program = Program::Literals(vec![json!(1), json!("x")]);
        assert_eq!(program.signature(), json!({ "$1": "number", "$2": "string" }));
    }

    fn started(statement: &str) -> Arc<Request> {
        let mut request = Request::default();
        request.set_params(
            QueryParams::for_statement(statement),
            ResponseDefaults::default(),
            None,
        );
        Arc::new(request)
    }

    fn collect(rows: &channel::Receiver<Row>) -> Vec<Value> {
        rows.iter()
            .map(|row| {
                let mut out = Vec::new();
                row.encode(&mut out, false).expect("encode row");
                serde_json::from_slice(&out).expect("row is JSON")
            })
            .collect()
    }

    #[test]
    fn range_streams_rows_then_closes() {
        let executor = LiteralExecutor::new(1, 4).expect("spawn executor");
        let request = started("select range(3)");
        let (rows_tx, rows_rx) = channel::bounded(1);
        let output = ExecutionOutput::new(rows_tx, request.stop_signal());

        executor
            .execute(ExecutionContext::new(Arc::clone(&request)), output)
            .expect("execution starts");

        assert_eq!(
            collect(&rows_rx),
            vec![json!({"$1": 0}), json!({"$1": 1}), json!({"$1": 2})]
        );
    }

    #[test]
    fn sleep_ends_early_when_stopped() {
        let executor = LiteralExecutor::new(1, 4).expect("spawn executor");
        let request = started("select sleep(60000)");
        let (rows_tx, rows_rx) = channel::bounded(1);
        let output = ExecutionOutput::new(rows_tx, request.stop_signal());

        executor
            .execute(ExecutionContext::new(Arc::clone(&request)), output)
            .expect("execution starts");
        request.stop(State::Stopped);

        assert!(collect(&rows_rx).is_empty());
    }
}
