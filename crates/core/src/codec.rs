//! Conversion between data URLs and raw attachment bytes.
//!
//! Only the base64 form `data:<mime>;base64,<payload>` is accepted.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::error::Error;

const SCHEME: &str = "data:";
const SEPARATOR: &str = ";base64,";

/// Decodes a data URL into its MIME type and bytes.
pub fn decode(payload: &str) -> Result<(String, Bytes), Error> {
    decode_with_fallback(payload, None)
}

/// Like [`decode`], but uses `fallback_mime` when the URL names no MIME type.
pub fn decode_with_fallback(
    payload: &str,
    fallback_mime: Option<&str>,
) -> Result<(String, Bytes), Error> {
    let segments: Vec<&str> = payload.split(SEPARATOR).collect();
    let [head, body] = segments.as_slice() else {
        return Err(Error::MalformedPayload(format!(
            "expected exactly one `{SEPARATOR}` separator"
        )));
    };
    let Some(rest) = head.strip_prefix(SCHEME) else {
        return Err(Error::MalformedPayload(format!(
            "missing `{SCHEME}` prefix"
        )));
    };
    let mime_type = rest.split(';').next().unwrap_or_default();
    let mime_type = match (mime_type, fallback_mime) {
        ("", Some(fallback)) => fallback,
        (mime_type, _) => mime_type,
    };
    if mime_type.is_empty() {
        return Err(Error::MalformedPayload("empty MIME type".to_owned()));
    }
    if body.is_empty() {
        return Err(Error::MalformedPayload("empty payload".to_owned()));
    }
    let data = STANDARD
        .decode(body)
        .map_err(|err| Error::MalformedPayload(err.to_string()))?;
    Ok((mime_type.to_owned(), Bytes::from(data)))
}

/// Encodes bytes as a base64 data URL.
#[inline]
pub fn encode(mime_type: &str, data: &[u8]) -> String {
    format!("{SCHEME}{mime_type}{SEPARATOR}{}", STANDARD.encode(data))
}
