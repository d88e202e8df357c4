//! Frame Reader: wire parsing of MIME-header(+body) frames (spec.md §4.1).

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::{Error, Result};
use crate::headers::HeaderMap;

/// Closed set of `Content-Type` values the wire protocol produces.
pub mod content_type {
    pub const REPLY: &str = "command/reply";
    pub const API_RESPONSE: &str = "api/response";
    pub const EVENT_PLAIN: &str = "text/event-plain";
    pub const EVENT_JSON: &str = "text/event-json";
    pub const EVENT_XML: &str = "text/event-xml";
    pub const AUTH_REQUEST: &str = "auth/request";
    pub const DISCONNECT: &str = "text/disconnect-notice";
}

/// A single MIME-header(+body) frame as received off the wire, before any
/// event-body decoding (spec.md §3 `RawResponse`).
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    headers: HeaderMap,
    pub body: Bytes,
}

impl RawResponse {
    pub(crate) fn new(headers: HeaderMap, body: Bytes) -> Self {
        Self { headers, body }
    }

    /// Synthesizes the `text/disconnect-notice` frame the Frame Reader
    /// produces on a clean EOF (spec.md §4.1).
    pub(crate) fn synthetic_disconnect() -> Self {
        let mut headers = HeaderMap::new();
        headers.set("Content-Type", content_type::DISCONNECT.to_string());
        Self { headers, body: Bytes::new() }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("Content-Type")
    }

    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers.get_all(name)
    }

    pub fn get_reply(&self) -> Option<&str> {
        self.headers.get("Reply-Text")
    }

    pub fn body_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// `command/reply` success is `Reply-Text` starting with `+OK`;
    /// `api/response` success is the body NOT starting with `-ERR` (the
    /// `api` command reports failure in the body, not in a header — see
    /// DESIGN.md Open Question #2).
    pub fn is_ok(&self) -> bool {
        if self.content_type() == Some(content_type::API_RESPONSE) {
            !self.body_str().trim_start().starts_with("-ERR")
        } else {
            self.get_reply().is_some_and(|r| r.starts_with("+OK"))
        }
    }
}

/// Reads one frame from `reader`. On clean EOF before any header line is
/// read, synthesizes a `text/disconnect-notice` frame instead of erroring.
pub async fn read_frame<R>(reader: &mut R) -> Result<RawResponse>
where
    R: AsyncBufRead + Unpin,
{
    let mut headers = HeaderMap::new();
    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(Error::CouldNotReadMimeHeaders)?;
        if n == 0 {
            if headers.is_empty() {
                return Ok(RawResponse::synthetic_disconnect());
            }
            return Err(Error::CouldNotReadMimeHeaders(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            )));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.append(name.trim(), value.trim().to_string());
        }
    }

    if headers.get("Content-Type").is_none_or(str::is_empty) {
        return Err(Error::UnsupportedMessageType(String::new()));
    }

    let body = if let Some(len) = headers.get("Content-Length") {
        let len: usize = len.parse().map_err(Error::InvalidContentLength)?;
        let mut buf = vec![0u8; len];
        reader
            .read_exact(&mut buf)
            .await
            .map_err(Error::CouldNotReadBody)?;
        Bytes::from(buf)
    } else {
        Bytes::new()
    };

    Ok(RawResponse::new(headers, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_reply_with_no_body() {
        let raw = b"Content-Type: command/reply\r\nReply-Text: +OK\r\n\r\n";
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        let frame = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.content_type(), Some(content_type::REPLY));
        assert!(frame.is_ok());
    }

    #[tokio::test]
    async fn reads_api_response_with_body() {
        let raw = b"Content-Type: api/response\r\nContent-Length: 5\r\n\r\nhello";
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        let frame = read_frame(&mut reader).await.unwrap();
        assert_eq!(&frame.body[..], b"hello");
        assert!(frame.is_ok());
    }

    #[tokio::test]
    async fn api_response_error_body_is_not_ok() {
        let raw = b"Content-Type: api/response\r\nContent-Length: 19\r\n\r\n-ERR NO_SUCH_MODULE\r\n\r\n";
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        let frame = read_frame(&mut reader).await.unwrap();
        assert!(!frame.is_ok());
    }

    #[tokio::test]
    async fn missing_content_length_yields_empty_body() {
        let raw = b"Content-Type: text/disconnect-notice\r\n\r\n";
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        let frame = read_frame(&mut reader).await.unwrap();
        assert!(frame.body.is_empty());
    }

    #[tokio::test]
    async fn missing_content_type_is_an_error() {
        let raw = b"Reply-Text: +OK\r\n\r\n";
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn empty_content_type_is_an_error() {
        let raw = b"Content-Type: \r\nReply-Text: +OK\r\n\r\n";
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn clean_eof_before_any_header_synthesizes_disconnect() {
        let raw = b"";
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        let frame = read_frame(&mut reader).await.unwrap();
        assert_eq!(frame.content_type(), Some(content_type::DISCONNECT));
    }

    #[tokio::test]
    async fn eof_mid_headers_is_an_error() {
        let raw = b"Content-Type: command/reply\r\n";
        let mut reader = BufReader::new(Cursor::new(&raw[..]));
        assert!(read_frame(&mut reader).await.is_err());
    }
}
