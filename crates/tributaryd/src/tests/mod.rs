//! Behavioural test suites for the query service.

mod query_behaviour;
mod support;
