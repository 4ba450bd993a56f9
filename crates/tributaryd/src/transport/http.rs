//! Just enough HTTP/1.1 for one request per connection.
//!
//! Requests are read up to the end of a `Content-Length` body. Responses
//! always carry `Connection: close`; they use `Content-Length` when the
//! whole body is known up front and chunked encoding otherwise.

use std::io::{self, BufRead, Read, Write};

use super::HttpError;
use crate::query::ResponseSink;

const MAX_HEAD_BYTES: usize = 16 * 1024;

/// A parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpRequest {
    method: String,
    path: String,
    query: Option<String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpRequest {
    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub(crate) fn body(&self) -> &[u8] {
        &self.body
    }

    /// First value of `name`, compared case-insensitively.
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Reads one request. Returns `None` when the peer closed the connection
/// before sending anything.
pub(crate) fn read_request<R: BufRead>(
    reader: &mut R,
    max_body: usize,
) -> Result<Option<HttpRequest>, HttpError> {
    let mut budget = MAX_HEAD_BYTES;
    let Some(request_line) = read_line(reader, &mut budget)? else {
        return Ok(None);
    };
    let mut parts = request_line.split_ascii_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::malformed("request line"));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::malformed("unsupported protocol version"));
    }
    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    };

    let mut headers = Vec::new();
    loop {
        let Some(line) = read_line(reader, &mut budget)? else {
            return Err(HttpError::malformed("truncated headers"));
        };
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::malformed("header line"))?;
        headers.push((name.trim().to_owned(), value.trim().to_owned()));
    }

    let mut request = HttpRequest {
        method: method.to_owned(),
        path,
        query,
        headers,
        body: Vec::new(),
    };
    if let Some(encoding) = request.header("transfer-encoding")
        && !encoding.eq_ignore_ascii_case("identity")
    {
        return Err(HttpError::UnsupportedEncoding {
            encoding: encoding.to_owned(),
        });
    }
    let length = match request.header("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| HttpError::malformed("content-length"))?,
        None => 0,
    };
    if length > max_body {
        return Err(HttpError::BodyTooLarge {
            length,
            limit: max_body,
        });
    }
    request.body.resize(length, 0);
    reader.read_exact(&mut request.body)?;
    Ok(Some(request))
}

/// Reads a CRLF- or LF-terminated line within the remaining head budget.
fn read_line<R: BufRead>(reader: &mut R, budget: &mut usize) -> Result<Option<String>, HttpError> {
    let mut line = Vec::new();
    let limit = u64::try_from(*budget).unwrap_or(u64::MAX);
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with(b"\n") {
        return if read >= *budget {
            Err(HttpError::HeadTooLarge {
                limit: MAX_HEAD_BYTES,
            })
        } else {
            Err(HttpError::malformed("truncated line"))
        };
    }
    *budget -= read;
    line.pop();
    if line.ends_with(b"\r") {
        line.pop();
    }
    String::from_utf8(line)
        .map(Some)
        .map_err(|_| HttpError::malformed("non UTF-8 header"))
}

/// Reason phrase for the statuses this service produces.
pub(crate) const fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        409 => "Conflict",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// [`ResponseSink`] over a byte stream.
#[derive(Debug)]
pub(crate) struct HttpSink<W> {
    out: W,
    content_type: String,
    chunked: bool,
}

impl<W: Write + Send> HttpSink<W> {
    pub(crate) fn new(out: W, content_type: impl Into<String>) -> Self {
        Self {
            out,
            content_type: content_type.into(),
            chunked: false,
        }
    }

    /// Sends a complete response in one go.
    pub(crate) fn respond(mut self, status: u16, body: &[u8]) -> io::Result<()> {
        self.send_head(status, Some(body.len()))?;
        self.send_body(body)?;
        self.finish()
    }
}

impl<W: Write + Send> ResponseSink for HttpSink<W> {
    fn send_head(&mut self, status: u16, content_length: Option<usize>) -> io::Result<()> {
        let mut head = format!(
            "HTTP/1.1 {status} {}\r\nContent-Type: {}\r\nConnection: close\r\n",
            reason(status),
            self.content_type
        );
        match content_length {
            Some(length) => head.push_str(&format!("Content-Length: {length}\r\n")),
            None => {
                self.chunked = true;
                head.push_str("Transfer-Encoding: chunked\r\n");
            }
        }
        head.push_str("\r\n");
        self.out.write_all(head.as_bytes())
    }

    fn send_body(&mut self, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.chunked {
            write!(self.out, "{:X}\r\n", bytes.len())?;
            self.out.write_all(bytes)?;
            self.out.write_all(b"\r\n")
        } else {
            self.out.write_all(bytes)
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.chunked {
            self.out.write_all(b"0\r\n\r\n")?;
        }
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    fn parse(raw: &str, max_body: usize) -> Result<Option<HttpRequest>, HttpError> {
        read_request(&mut Cursor::new(raw.as_bytes().to_vec()), max_body)
    }

    #[test]
    fn parses_request_line_headers_and_body() {
        let request = parse(
            "POST /query/service?x=1 HTTP/1.1\r\nHost: q\r\ncontent-TYPE: application/json\r\nContent-Length: 4\r\n\r\n{}{}",
            64,
        )
        .expect("valid request")
        .expect("request present");

        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/query/service");
        assert_eq!(request.query(), Some("x=1"));
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(request.body(), b"{}{}");
    }

    #[test]
    fn empty_connection_yields_nothing() {
        assert!(parse("", 64).expect("clean close").is_none());
    }

    #[rstest]
    #[case("GARBAGE\r\n\r\n", 400)]
    #[case("GET / HTTP/2\r\n\r\n", 400)]
    #[case("POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\n", 413)]
    #[case("POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n", 400)]
    #[case("POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n", 501)]
    #[case("GET / HTTP/1.1\r\nHost: q\r\n", 400)]
    fn rejects_bad_requests(#[case] raw: &str, #[case] status: u16) {
        let error = parse(raw, 16).expect_err("request is rejected");
        assert_eq!(error.status(), status);
    }

    #[test]
    fn oversized_head_is_rejected() {
        let raw = format!("GET / HTTP/1.1\r\nX-Big: {}\r\n\r\n", "a".repeat(MAX_HEAD_BYTES));
        let error = parse(&raw, 16).expect_err("head too large");
        assert!(matches!(error, HttpError::HeadTooLarge { .. }));
    }

    #[test]
    fn known_length_response_is_not_chunked() {
        let mut out = Vec::new();
        HttpSink::new(&mut out, "application/json")
            .respond(404, b"{}")
            .expect("write response");
        let text = String::from_utf8(out).expect("utf-8");
        assert_eq!(
            text,
            "HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nConnection: close\r\nContent-Length: 2\r\n\r\n{}"
        );
    }

    #[test]
    fn streamed_response_uses_chunks() {
        let mut out = Vec::new();
        let mut sink = HttpSink::new(&mut out, "application/json; version=2.0.0");
        sink.send_head(200, None).expect("head");
        sink.send_body(&[b'x'; 20]).expect("chunk");
        sink.send_body(b"").expect("empty chunk is skipped");
        sink.finish().expect("finish");

        let text = String::from_utf8(out).expect("utf-8");
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(text.ends_with(&format!("\r\n14\r\n{}\r\n0\r\n\r\n", "x".repeat(20))));
    }
}
