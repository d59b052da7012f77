//! Request head parsing.

use bytes::BytesMut;
use sliceway_http::{Headers, RequestLine};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::READ_CHUNK;
use crate::error::{TransportError, TransportResult};

const MAX_HEADERS: usize = 64;

/// A parsed request line and header block.
#[derive(Debug, Clone)]
pub(crate) struct RequestHead {
    pub method: String,
    pub uri: String,
    /// Minor HTTP/1.x version.
    pub version: u8,
    pub headers: Headers,
}

/// How the request body following a head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyKind {
    Empty,
    Length(u64),
    Chunked,
}

impl RequestHead {
    pub fn line(&self) -> RequestLine {
        RequestLine::new(
            self.method.clone(),
            self.uri.clone(),
            format!("HTTP/1.{}", self.version),
        )
    }

    /// HTTP/1.1 connections persist unless the client says `close`;
    /// HTTP/1.0 ones only when it asks for `keep-alive`.
    pub fn keep_alive(&self) -> bool {
        let connection = self
            .headers
            .get("connection")
            .unwrap_or_default()
            .to_ascii_lowercase();
        if self.version == 1 {
            !connection.contains("close")
        } else {
            connection.contains("keep-alive")
        }
    }

    pub fn body_kind(&self) -> TransportResult<BodyKind> {
        let chunked = self
            .headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case("transfer-encoding"))
            .any(|h| h.value.to_ascii_lowercase().contains("chunked"));
        if chunked {
            return Ok(BodyKind::Chunked);
        }
        match self.headers.get("content-length") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(|len| if len == 0 { BodyKind::Empty } else { BodyKind::Length(len) })
                .map_err(|_| TransportError::Malformed(format!("invalid content-length {value:?}"))),
            None => Ok(BodyKind::Empty),
        }
    }
}

/// Try to parse a complete head from the front of `buf`.
///
/// On success the head bytes are removed from `buf`, leaving any body
/// bytes that arrived with it.
pub(crate) fn parse_head(buf: &mut BytesMut) -> TransportResult<Option<RequestHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    let len = match request.parse(&buf[..]) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => return Err(TransportError::Malformed(err.to_string())),
    };

    let head = RequestHead {
        method: request.method.unwrap_or("GET").to_string(),
        uri: request.path.unwrap_or("/").to_string(),
        version: request.version.unwrap_or(1),
        headers: request
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).into_owned(),
                )
            })
            .collect(),
    };
    let _ = buf.split_to(len);
    Ok(Some(head))
}

/// Read from `reader` until a full head is buffered.
///
/// Returns `Ok(None)` when the peer closes cleanly between requests.
pub(crate) async fn read_head<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_head_bytes: usize,
) -> TransportResult<Option<RequestHead>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if !buf.is_empty() {
            if let Some(head) = parse_head(buf)? {
                return Ok(Some(head));
            }
            if buf.len() >= max_head_bytes {
                return Err(TransportError::HeadTooLarge(max_head_bytes));
            }
        }

        buf.reserve(READ_CHUNK);
        if reader.read_buf(buf).await? == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(TransportError::Malformed(
                    "connection closed inside request head".to_string(),
                ))
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> RequestHead {
        let mut buf = BytesMut::from(raw);
        parse_head(&mut buf).unwrap().expect("complete head")
    }

    #[test]
    fn parses_line_and_headers() {
        let head = parse("POST /hello HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\n");
        assert_eq!(head.line().to_string(), "POST /hello HTTP/1.1");
        assert_eq!(head.headers.get("host"), Some("localhost"));
        assert_eq!(head.body_kind().unwrap(), BodyKind::Length(5));
    }

    #[test]
    fn leaves_body_bytes_in_buffer() {
        let mut buf = BytesMut::from("PUT / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc");
        parse_head(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..], b"abc");
    }

    #[test]
    fn partial_head_needs_more() {
        let mut buf = BytesMut::from("GET / HTTP/1.1\r\nHost: x\r\n");
        assert!(parse_head(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 25);
    }

    #[test]
    fn garbage_is_malformed() {
        let mut buf = BytesMut::from("\x01\x02 nonsense\r\n\r\n");
        assert!(matches!(
            parse_head(&mut buf),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn chunked_wins_over_length() {
        let head = parse(
            "POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 10\r\n\r\n",
        );
        assert_eq!(head.body_kind().unwrap(), BodyKind::Chunked);
    }

    #[test]
    fn no_framing_headers_means_empty_body() {
        let head = parse("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(head.body_kind().unwrap(), BodyKind::Empty);
    }

    #[test]
    fn bad_content_length_is_malformed() {
        let head = parse("POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n");
        assert!(head.body_kind().is_err());
    }

    #[test]
    fn keep_alive_defaults_by_version() {
        assert!(parse("GET / HTTP/1.1\r\n\r\n").keep_alive());
        assert!(!parse("GET / HTTP/1.1\r\nConnection: close\r\n\r\n").keep_alive());
        assert!(!parse("GET / HTTP/1.0\r\n\r\n").keep_alive());
        assert!(parse("GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").keep_alive());
    }

    #[tokio::test]
    async fn read_head_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"GET /a HTTP/1.1\r\n").await.unwrap();
            client.write_all(b"Host: x\r\n\r\n").await.unwrap();
        });

        let mut buf = BytesMut::new();
        let head = read_head(&mut server, &mut buf, 1024).await.unwrap().unwrap();
        assert_eq!(head.uri, "/a");
    }

    #[tokio::test]
    async fn read_head_clean_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        let mut buf = BytesMut::new();
        assert!(read_head(&mut server, &mut buf, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_head_enforces_limit() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = client.write_all(b"GET /").await;
            let _ = client.write_all(&[b'a'; 2048]).await;
        });

        let mut buf = BytesMut::new();
        let err = read_head(&mut server, &mut buf, 256).await.unwrap_err();
        assert!(matches!(err, TransportError::HeadTooLarge(256)));
    }
}
