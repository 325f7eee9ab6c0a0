//! Request and response values exchanged with the supervisor.

use tokio_util::bytes::{BufMut, Bytes, BytesMut};

use crate::bridge::protocol::RequestId;

/// An incoming request.
///
/// The bridge loop treats it as opaque; only the channel uses its id to
/// correlate the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub uri: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: RequestId::new(),
            method: method.into(),
            uri: uri.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Response sent back for a successful request. Status defaults to 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: BytesMut,
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: BytesMut::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Appends raw bytes to the body.
    pub fn write_body(&mut self, data: &[u8]) {
        self.body.put_slice(data);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (u16, Vec<(String, String)>, Bytes) {
        (self.status, self.headers, self.body.freeze())
    }

    pub fn from_parts(status: u16, headers: Vec<(String, String)>, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body: BytesMut::from(&body[..]),
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_defaults_to_ok_with_empty_body() {
        let response = Response::new();
        assert_eq!(response.status(), 200);
        assert!(response.headers().is_empty());
        assert!(response.body().is_empty());
    }

    #[test]
    fn response_body_appends() {
        let mut response = Response::new();
        response.write_body(b"<h1>");
        response.write_body(b"hi</h1>");
        assert_eq!(response.body(), b"<h1>hi</h1>");
    }

    #[test]
    fn response_parts_roundtrip() {
        let response = Response::new()
            .with_status(404)
            .with_header("content-type", "text/plain");
        let (status, headers, body) = response.clone().into_parts();
        assert_eq!(Response::from_parts(status, headers, body), response);
    }

    #[test]
    fn request_builder_sets_fields() {
        let request = Request::new("POST", "/submit")
            .with_header("x-trace", "1")
            .with_body("a=b");
        assert_eq!(request.method, "POST");
        assert_eq!(request.uri, "/submit");
        assert_eq!(request.headers, vec![("x-trace".to_string(), "1".to_string())]);
        assert_eq!(&request.body[..], b"a=b");
    }
}
