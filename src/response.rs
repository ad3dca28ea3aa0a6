//! The canned HTTP response.
//!
//! Every successful read on a connection is answered with exactly these
//! bytes, whatever the peer sent. The payload is a `'static` constant so
//! handler tasks share it without any synchronization.

/// Full pre-serialized response, headers and body.
pub const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/plain\r\n\
Content-Length: 12\r\n\
Connection: keep-alive\r\n\
\r\n\
Hello World!";
