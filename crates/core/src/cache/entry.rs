//! Stored responses and their on-disk encoding.
//!
//! An entry is written as a plain HTTP/1.1 response message so it can be replayed to a
//! client verbatim:
//!
//! ```text
//! HTTP/1.1 200 OK\r\n
//! Content-Type: text/html\r\n
//! \r\n
//! <body bytes>
//! ```

const STATUS_PREFIX: &str = "HTTP/1.1 ";

/// Header slots tried first when decoding; grown on demand up to [`MAX_HEADERS`].
const INITIAL_HEADERS: usize = 32;
const MAX_HEADERS: usize = 1024;

/// A complete response: status line, headers and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub status: u16,
    pub reason: String,
    /// Header pairs in wire order. Names keep their original case.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Why a stored entry could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("missing end of headers")]
    UnterminatedHead,

    #[error("head is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed status line: {0}")]
    StatusLine(String),

    #[error("malformed header line: {0}")]
    HeaderLine(String),
}

impl CacheEntry {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self { status, reason: reason.into(), headers: Vec::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// First header value with a case-insensitively matching name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(format!("{STATUS_PREFIX}{} {}\r\n", self.status, self.reason).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut slots = INITIAL_HEADERS;

        loop {
            let mut storage = vec![httparse::EMPTY_HEADER; slots];
            let mut response = httparse::Response::new(&mut storage);

            let head_len = match response.parse(bytes) {
                Ok(httparse::Status::Complete(len)) => len,
                Ok(httparse::Status::Partial) => return Err(DecodeError::UnterminatedHead),
                Err(httparse::Error::TooManyHeaders) if slots < MAX_HEADERS => {
                    slots *= 4;
                    continue;
                }
                Err(e @ (httparse::Error::Version | httparse::Error::Status)) => {
                    return Err(DecodeError::StatusLine(e.to_string()));
                }
                Err(e) => return Err(DecodeError::HeaderLine(e.to_string())),
            };

            let status = response
                .code
                .filter(|s| (100..=999).contains(s))
                .ok_or_else(|| DecodeError::StatusLine(format!("{:?}", response.code)))?;

            let headers = response
                .headers
                .iter()
                .map(|h| {
                    let value = std::str::from_utf8(h.value).map_err(|_| DecodeError::InvalidUtf8)?;
                    Ok((h.name.to_string(), value.to_string()))
                })
                .collect::<Result<Vec<_>, DecodeError>>()?;

            return Ok(Self {
                status,
                reason: response.reason.unwrap_or_default().to_string(),
                headers,
                body: bytes[head_len..].to_vec(),
            });
        }
    }
}
