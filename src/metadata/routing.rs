//! Routing metadata (`message/x.rsocket.routing.v0`): a list of tags, each
//! prefixed by a one-byte length.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{RSocketError, Result};

/// Longest tag a routing entry can carry.
pub const MAX_ROUTE_LENGTH: usize = u8::MAX as usize;

fn check_route(route: &str) -> Result<()> {
    if route.is_empty() || route.len() > MAX_ROUTE_LENGTH {
        return Err(RSocketError::MalformedMetadata(format!(
            "route length {} must be within 1-{}",
            route.len(),
            MAX_ROUTE_LENGTH
        )));
    }
    Ok(())
}

/// Encode a single route tag.
pub fn encode_route(route: &str) -> Result<Bytes> {
    encode_routes([route])
}

/// Encode a list of route tags.
///
/// # Example
///
/// ```
/// use rsocket_wire::metadata::{decode_routes, encode_routes};
///
/// let encoded = encode_routes(["EchoService", "echo"]).unwrap();
/// let tags: Vec<String> = decode_routes(encoded).collect::<Result<_, _>>().unwrap();
/// assert_eq!(tags, ["EchoService", "echo"]);
/// ```
pub fn encode_routes<'a, I>(routes: I) -> Result<Bytes>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut buf = BytesMut::new();
    for route in routes {
        check_route(route)?;
        buf.put_u8(route.len() as u8);
        buf.put_slice(route.as_bytes());
    }
    Ok(buf.freeze())
}

/// Lazily decode route tags.
pub fn decode_routes(metadata: Bytes) -> RouteIter {
    RouteIter {
        buffer: metadata,
        failed: false,
    }
}

/// Iterator over route tags.
#[derive(Debug)]
pub struct RouteIter {
    buffer: Bytes,
    failed: bool,
}

impl Iterator for RouteIter {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buffer.is_empty() {
            return None;
        }
        let len = usize::from(self.buffer[0]);
        if self.buffer.len() < 1 + len {
            self.failed = true;
            return Some(Err(RSocketError::MalformedMetadata(format!(
                "route length {} exceeds remaining {} bytes",
                len,
                self.buffer.len() - 1
            ))));
        }
        let tag = self.buffer.slice(1..1 + len);
        self.buffer = self.buffer.slice(1 + len..);
        match String::from_utf8(tag.to_vec()) {
            Ok(route) => Some(Ok(route)),
            Err(_) => {
                self.failed = true;
                Some(Err(RSocketError::MalformedMetadata(
                    "route is not valid UTF-8".to_string(),
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_route() {
        let encoded = encode_route("echo").unwrap();
        assert_eq!(&encoded[..], b"\x04echo");
    }

    #[test]
    fn test_multiple_routes() {
        let encoded = encode_routes(["a", "bc"]).unwrap();
        let routes: Vec<String> = decode_routes(encoded).map(|r| r.unwrap()).collect();
        assert_eq!(routes, vec!["a".to_string(), "bc".to_string()]);
    }

    #[test]
    fn test_route_bounds() {
        assert!(encode_route("").is_err());
        assert!(encode_route(&"x".repeat(256)).is_err());
        assert!(encode_route(&"x".repeat(255)).is_ok());
    }

    #[test]
    fn test_truncated_route() {
        let mut iter = decode_routes(Bytes::from_static(b"\x02ok\x05ab"));
        assert_eq!(iter.next().unwrap().unwrap(), "ok");
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }
}
