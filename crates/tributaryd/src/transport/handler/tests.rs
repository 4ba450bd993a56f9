//! End-to-end tests for the HTTP connection handler over loopback TCP.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use serde_json::{Value, json};
use tributary_config::SocketEndpoint;

use super::*;
use crate::query::test_utils::NEVER;
use crate::service::{ServiceContext, Settings};
use crate::transport::test_utils::{exchange, status_and_body};
use crate::transport::{ListenerHandle, SocketListener};

struct Server {
    addr: SocketAddr,
    context: Arc<ServiceContext>,
    handle: ListenerHandle,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.shutdown();
        self.context.shutdown();
    }
}

#[fixture]
fn server() -> Server {
    let settings = Settings {
        servicers: 2,
        plus_servicers: 1,
        flush_interval: NEVER,
        max_request_bytes: 256,
        ..Settings::default()
    };
    let context = Arc::new(
        ServiceContext::builder(settings)
            .build()
            .expect("build context"),
    );
    let listener =
        SocketListener::bind(&SocketEndpoint::tcp("127.0.0.1", 0)).expect("bind listener");
    let addr = listener.local_addr().expect("local address");
    let handler = Arc::new(QueryConnectionHandler::new(Dispatcher::new(Arc::clone(
        &context,
    ))));
    let handle = listener.start(handler).expect("start listener");
    Server {
        addr,
        context,
        handle,
    }
}

fn post(path: &str, body: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\nHost: test\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}

fn get(path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: test\r\n\r\n")
}

fn parse(body: &str) -> Value {
    serde_json::from_str(body).expect("JSON body")
}

#[rstest]
fn query_endpoint_streams_the_envelope(server: Server) {
    let response = exchange(server.addr, &post("/query/service", r#"{"statement":"select 1"}"#));
    let (status, body) = status_and_body(&response);

    assert_eq!(status, 200);
    assert!(response.contains("Content-Type: application/json; version=2.0.0"));
    let body = parse(body);
    assert_eq!(body["results"], json!([{"$1": 1}]));
    assert_eq!(body["status"], json!("success"));
}

#[rstest]
fn get_query_reads_url_parameters(server: Server) {
    let response = exchange(server.addr, &get("/query?statement=select%202"));
    let (status, body) = status_and_body(&response);

    assert_eq!(status, 200);
    assert_eq!(parse(body)["results"], json!([{"$1": 2}]));
}

#[rstest]
fn unknown_paths_get_an_empty_object(server: Server) {
    let response = exchange(server.addr, &get("/nowhere"));
    assert_eq!(status_and_body(&response), (404, "{}"));
}

#[rstest]
fn oversized_bodies_are_refused(server: Server) {
    let statement = "x".repeat(400);
    let response = exchange(
        server.addr,
        &post("/query/service", &format!(r#"{{"statement":"{statement}"}}"#)),
    );
    let (status, body) = status_and_body(&response);

    assert_eq!(status, 413);
    let body = parse(body);
    assert_eq!(body["errors"][0]["code"], json!(1193));
    assert_eq!(body["status"], json!("fatal"));
}

#[rstest]
fn admin_endpoints_report_service_state(server: Server) {
    exchange(server.addr, &post("/query/service", r#"{"statement":"select 1"}"#));

    let (status, listing) = {
        let response = exchange(server.addr, &get("/admin/active_requests"));
        let (status, body) = status_and_body(&response);
        (status, parse(body))
    };
    assert_eq!(status, 200);
    assert_eq!(listing, json!([]));

    let response = exchange(server.addr, &get("/admin/vitals"));
    let (status, body) = status_and_body(&response);
    assert_eq!(status, 200);
    let vitals = parse(body);
    assert_eq!(vitals["requests.count"], json!(1));
    assert_eq!(vitals["phase"], json!("running"));

    let response = exchange(
        server.addr,
        "DELETE /admin/active_requests/missing HTTP/1.1\r\nHost: test\r\n\r\n",
    );
    assert_eq!(status_and_body(&response), (404, "{}"));
}

#[rstest]
fn client_disconnect_closes_a_streaming_query(server: Server) {
    let request = post(
        "/query/service",
        r#"{"statement":"select range(100000000)"}"#,
    );
    {
        let mut client = TcpStream::connect(server.addr).expect("connect client");
        client.write_all(request.as_bytes()).expect("send request");
        let mut partial = [0_u8; 512];
        let read = client.read(&mut partial).expect("read partial response");
        assert!(read > 0);
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    let closed = loop {
        let vitals = server.context.metrics().vitals();
        if vitals["requests.closed"] == json!(1) {
            break true;
        }
        if Instant::now() >= deadline {
            break false;
        }
        std::thread::sleep(Duration::from_millis(20));
    };
    assert!(closed, "disconnect should close the request");
    assert_eq!(server.context.registry().count(), 0);
}
