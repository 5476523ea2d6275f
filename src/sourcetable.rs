//! Sourcetable response rendering (`GET /`)
//!
//! The body itself comes verbatim from configuration (spec: sourcetable
//! text is configuration data, not something this caster computes from the
//! rover/stream state). This module only wraps it in the bit-exact HTTP
//! envelope spec §6 specifies.

/// Render the full bit-exact `GET /` response for a station's sourcetable
/// body
pub fn render(body: &str) -> Vec<u8> {
    let content_length = body.len();
    let head = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {content_length}\r\n\
         Connection: close\r\n\
         \r\n"
    );

    let mut out = Vec::with_capacity(head.len() + body.len() + "\r\nENDSOURCETABLE\r\n".len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(body.as_bytes());
    out.extend_from_slice(b"\r\nENDSOURCETABLE\r\n");
    out
}
