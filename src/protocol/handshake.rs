//! HTTP upgrade handshake for the event channel (RFC 6455 section 4).
//!
//! The harness is normally the client: it renders a [`HandshakeRequest`] and
//! checks the server's [`HandshakeResponse`]. The server half (`parse` on the
//! request, `from_request`/`write` on the response) backs in-process test
//! servers.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

/// GUID appended to the client key before hashing.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The only protocol version this crate speaks.
pub const WS_VERSION: u8 = 13;

/// Base64(SHA-1(key + GUID)).
///
/// ```
/// use devsim::protocol::compute_accept_key;
///
/// assert_eq!(
///     compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Lower-cased header map. Repeated critical headers are rejected.
fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> Result<HashMap<String, String>> {
    const SINGLE: [&str; 5] = [
        "host",
        "upgrade",
        "connection",
        "sec-websocket-key",
        "sec-websocket-accept",
    ];

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if SINGLE.contains(&name.as_str()) && headers.contains_key(&name) {
            return Err(Error::InvalidHandshake(format!("Duplicate header: {name}")));
        }
        headers.insert(name, value.trim().to_string());
    }
    Ok(headers)
}

fn require<'h>(headers: &'h HashMap<String, String>, name: &str) -> Result<&'h str> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::InvalidHandshake(format!("Missing {name} header")))
}

fn check_upgrade_headers(headers: &HashMap<String, String>) -> Result<()> {
    let upgrade = require(headers, "upgrade")?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid upgrade header: {upgrade}"
        )));
    }
    let connection = require(headers, "connection")?;
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::InvalidHandshake(format!(
            "Invalid connection header: {connection}"
        )));
    }
    Ok(())
}

/// Client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target, e.g. `/` or `/events`.
    pub path: String,
    /// `host[:port]` as sent in the Host header.
    pub host: String,
    /// Base64 of 16 random bytes.
    pub key: String,
    pub version: u8,
}

impl HandshakeRequest {
    /// Build a client request with a fresh random key.
    ///
    /// # Errors
    ///
    /// `Error::Io` if the OS random source is unavailable.
    pub fn client(host: impl Into<String>, path: impl Into<String>) -> Result<Self> {
        let mut nonce = [0u8; 16];
        getrandom::getrandom(&mut nonce).map_err(|err| Error::Io(err.to_string()))?;
        Ok(Self {
            path: path.into(),
            host: host.into(),
            key: BASE64.encode(nonce),
            version: WS_VERSION,
        })
    }

    /// Render the HTTP request.
    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(
            format!(
                "GET {} HTTP/1.1\r\n\
                 Host: {}\r\n\
                 Upgrade: websocket\r\n\
                 Connection: Upgrade\r\n\
                 Sec-WebSocket-Key: {}\r\n\
                 Sec-WebSocket-Version: {}\r\n\
                 \r\n",
                self.path, self.host, self.key, self.version
            )
            .as_bytes(),
        );
    }

    /// Parse a client request (server side).
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` for a malformed request line, a method other
    /// than GET, a version other than HTTP/1.1, or missing upgrade headers.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, path, http] = parts.as_slice() else {
            return Err(Error::InvalidHandshake("Invalid request line".into()));
        };
        if *method != "GET" {
            return Err(Error::InvalidHandshake(format!(
                "Expected GET method, got {method}"
            )));
        }
        if !http.starts_with("HTTP/1.1") {
            return Err(Error::InvalidHandshake(format!(
                "Expected HTTP/1.1, got {http}"
            )));
        }

        let headers = parse_headers(lines)?;
        check_upgrade_headers(&headers)?;

        let version = require(&headers, "sec-websocket-version")?;
        let version = version
            .parse()
            .map_err(|_| Error::InvalidHandshake(format!("Invalid version: {version}")))?;

        Ok(Self {
            path: (*path).to_string(),
            host: require(&headers, "host")?.to_string(),
            key: require(&headers, "sec-websocket-key")?.to_string(),
            version,
        })
    }

    /// Check version and key shape.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the version is not 13 or the key does not
    /// decode to 16 bytes.
    pub fn validate(&self) -> Result<()> {
        if self.version != WS_VERSION {
            return Err(Error::InvalidHandshake(format!(
                "Unsupported WebSocket version: {} (expected 13)",
                self.version
            )));
        }
        match BASE64.decode(&self.key) {
            Ok(decoded) if decoded.len() == 16 => Ok(()),
            Ok(decoded) => Err(Error::InvalidHandshake(format!(
                "Sec-WebSocket-Key must be 16 bytes, got {}",
                decoded.len()
            ))),
            Err(_) => Err(Error::InvalidHandshake(
                "Invalid Sec-WebSocket-Key: not valid Base64".into(),
            )),
        }
    }
}

/// Server `101 Switching Protocols` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub accept: String,
}

impl HandshakeResponse {
    #[must_use]
    pub fn from_request(req: &HandshakeRequest) -> Self {
        Self {
            accept: compute_accept_key(&req.key),
        }
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Accept: {}\r\n\r\n", self.accept).as_bytes());
    }

    /// Parse the server's response head.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` if the status is not 101 or the upgrade
    /// headers or the accept key are missing.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|_| Error::InvalidHandshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let status = lines
            .next()
            .ok_or_else(|| Error::InvalidHandshake("Empty response".into()))?;
        if !status.starts_with("HTTP/1.1 101") {
            return Err(Error::InvalidHandshake(format!(
                "Expected 101 status, got: {status}"
            )));
        }

        let headers = parse_headers(lines)?;
        check_upgrade_headers(&headers)?;
        Ok(Self {
            accept: require(&headers, "sec-websocket-accept")?.to_string(),
        })
    }

    /// Confirm the server hashed the key we sent.
    ///
    /// # Errors
    ///
    /// `Error::InvalidHandshake` on mismatch.
    pub fn verify(&self, request: &HandshakeRequest) -> Result<()> {
        if self.accept == compute_accept_key(&request.key) {
            Ok(())
        } else {
            Err(Error::InvalidHandshake(
                "Sec-WebSocket-Accept does not match the request key".into(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_accept_key_rfc_example() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_client_request_is_valid() {
        let req = HandshakeRequest::client("localhost:3000", "/").unwrap();
        assert!(req.validate().is_ok());

        let mut buf = Vec::new();
        req.write(&mut buf);
        let parsed = HandshakeRequest::parse(&buf).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_client_keys_differ() {
        let a = HandshakeRequest::client("h", "/").unwrap();
        let b = HandshakeRequest::client("h", "/").unwrap();
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_parse_request_missing_key() {
        let request = b"GET / HTTP/1.1\r\n\
            Host: localhost:3000\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";
        let err = HandshakeRequest::parse(request).unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(msg) if msg.contains("sec-websocket-key")));
    }

    #[test]
    fn test_parse_request_rejects_post() {
        let request = b"POST / HTTP/1.1\r\nHost: h\r\n\r\n";
        assert!(matches!(
            HandshakeRequest::parse(request),
            Err(Error::InvalidHandshake(msg)) if msg.contains("GET")
        ));
    }

    #[test]
    fn test_duplicate_host_header_rejected() {
        let request = b"GET / HTTP/1.1\r\n\
            Host: a\r\n\
            Host: b\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
            Sec-WebSocket-Version: 13\r\n\
            \r\n";
        assert!(HandshakeRequest::parse(request).is_err());
    }

    #[test]
    fn test_validate_wrong_version_and_key() {
        let req = HandshakeRequest {
            path: "/".into(),
            host: "h".into(),
            key: "dGhlIHNhbXBsZSBub25jZQ==".into(),
            version: 8,
        };
        assert!(req.validate().is_err());

        let short_key = HandshakeRequest {
            key: "c2hvcnQ=".into(),
            version: 13,
            ..req
        };
        assert!(short_key.validate().is_err());
    }

    #[test]
    fn test_response_roundtrip_and_verify() {
        let req = HandshakeRequest::client("localhost:3000", "/").unwrap();
        let resp = HandshakeResponse::from_request(&req);

        let mut buf = Vec::new();
        resp.write(&mut buf);
        assert!(buf.starts_with(b"HTTP/1.1 101 Switching Protocols\r\n"));

        let parsed = HandshakeResponse::parse(&buf).unwrap();
        assert_eq!(parsed, resp);
        assert!(parsed.verify(&req).is_ok());

        let other = HandshakeRequest::client("localhost:3000", "/").unwrap();
        assert!(parsed.verify(&other).is_err());
    }

    #[test]
    fn test_parse_response_wrong_status() {
        let resp = b"HTTP/1.1 404 Not Found\r\n\r\n";
        assert!(matches!(
            HandshakeResponse::parse(resp),
            Err(Error::InvalidHandshake(msg)) if msg.contains("101")
        ));
    }

    #[test]
    fn test_parse_response_missing_accept() {
        let resp = b"HTTP/1.1 101 Switching Protocols\r\n\
            Upgrade: websocket\r\n\
            Connection: Upgrade\r\n\
            \r\n";
        assert!(HandshakeResponse::parse(resp).is_err());
    }
}
