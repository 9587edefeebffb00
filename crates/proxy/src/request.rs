//! Request head parsing for proxied HTTP/1.x requests.
//!
//! Only what the cache needs is understood: the request line, headers, a
//! `Content-Length` body, and the three target forms a forward proxy sees
//! (absolute-form, origin-form with `Host`, authority-form for CONNECT).

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::ProxyError;

/// Largest accepted request line plus headers.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// A parsed request line and its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_connect(&self) -> bool {
        self.method.eq_ignore_ascii_case("CONNECT")
    }

    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"))
    }

    /// Declared body length, 0 when absent.
    pub fn content_length(&self) -> Result<usize, ProxyError> {
        match self.header("content-length") {
            None => Ok(0),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ProxyError::MalformedRequest(format!("bad content-length: {v}"))),
        }
    }

    /// The URL the request is for, as the client spelled it.
    ///
    /// CONNECT yields `host:port`. Origin-form targets are resolved against `Host`.
    pub fn full_url(&self) -> Result<String, ProxyError> {
        if self.is_connect() {
            return Ok(self.target.clone());
        }

        let url = if self.target.starts_with('/') {
            let host = self
                .header("host")
                .ok_or_else(|| ProxyError::MalformedRequest("origin-form target without Host".into()))?;
            format!("http://{}{}", host.trim(), self.target)
        } else {
            self.target.clone()
        };

        let parsed = url::Url::parse(&url).map_err(|e| ProxyError::MalformedRequest(format!("{url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(url),
            scheme => Err(ProxyError::MalformedRequest(format!("unsupported scheme: {scheme}"))),
        }
    }
}

/// Largest number of request headers accepted.
const MAX_HEADERS: usize = 100;

/// Read a request head. Returns `None` when the peer closed before sending anything.
///
/// Only the head is consumed from `reader`; body bytes stay buffered for [`read_body`].
pub async fn read_head<R>(reader: &mut R) -> Result<Option<RequestHead>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();

    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            if buf.iter().all(|b| matches!(b, b'\r' | b'\n')) {
                return Ok(None);
            }
            return Err(ProxyError::MalformedRequest("connection closed mid-head".into()));
        }

        let seen = buf.len();
        let take = chunk.len().min(MAX_HEAD_BYTES - seen);
        buf.extend_from_slice(&chunk[..take]);

        if let Some((head, head_len)) = parse_head(&buf)? {
            reader.consume(head_len - seen);
            return Ok(Some(head));
        }

        reader.consume(take);
        if buf.len() >= MAX_HEAD_BYTES {
            return Err(ProxyError::HeadTooLarge(MAX_HEAD_BYTES));
        }
    }
}

/// Parse a complete head from `buf`, returning it with its length in bytes.
/// `Ok(None)` means more bytes are needed.
pub fn parse_head(buf: &[u8]) -> Result<Option<(RequestHead, usize)>, ProxyError> {
    let mut storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut storage);

    let head_len = match request.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ProxyError::MalformedRequest(format!("bad request head: {e}"))),
    };

    let (Some(method), Some(target), Some(minor)) = (request.method, request.path, request.version) else {
        return Err(ProxyError::MalformedRequest("incomplete request line".into()));
    };

    let headers = request
        .headers
        .iter()
        .map(|h| {
            let value = std::str::from_utf8(h.value)
                .map_err(|_| ProxyError::MalformedRequest(format!("header {} is not valid UTF-8", h.name)))?;
            Ok((h.name.to_string(), value.trim().to_string()))
        })
        .collect::<Result<Vec<_>, ProxyError>>()?;

    let head = RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: format!("HTTP/1.{minor}"),
        headers,
    };

    Ok(Some((head, head_len)))
}

/// Read exactly `len` body bytes.
pub async fn read_body<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, ProxyError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = vec![0; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
