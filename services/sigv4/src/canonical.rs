//! Canonical request construction.
//!
//! The canonical form is the exact byte string the server rebuilds and
//! hashes on its side; every rule here is load bearing for wire
//! compatibility.

use std::fmt::Write;

use awsign_core::hash::hex_sha256;
use awsign_core::{Result, SigningRequest};
use percent_encoding::utf8_percent_encode;

use crate::constants::{
    AWS_QUERY_ENCODE_SET, AWS_URI_ENCODE_SET, STREAMING_HMAC_SHA256_PAYLOAD,
    STREAMING_HMAC_SHA256_PAYLOAD_TRAILER, STREAMING_UNSIGNED_PAYLOAD_TRAILER, UNSIGNED_PAYLOAD,
    X_AMZ_CONTENT_SHA_256,
};

/// The request body as presented to the signer.
///
/// Streaming bodies are represented by sentinels; their bytes are signed
/// chunk by chunk afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignableBody<'a> {
    /// In-memory bytes, hashed with SHA-256.
    Bytes(&'a [u8]),
    /// The caller already computed the hex SHA-256 of the body.
    Precomputed(&'a str),
    /// The body is excluded from the signature.
    UnsignedPayload,
    /// aws-chunked body with per-chunk signatures, optionally followed
    /// by signed trailers.
    StreamingSigned {
        /// Whether trailer headers follow the final chunk.
        trailer: bool,
    },
    /// aws-chunked body with unsigned chunks and trailer headers.
    StreamingUnsignedTrailer,
}

impl SignableBody<'_> {
    /// The value that goes into the content-hash slot of the canonical
    /// request (and the `x-amz-content-sha256` header).
    pub(crate) fn content_hash(&self) -> String {
        match self {
            SignableBody::Bytes(b) => hex_sha256(b),
            SignableBody::Precomputed(hash) => hash.to_string(),
            SignableBody::UnsignedPayload => UNSIGNED_PAYLOAD.to_string(),
            SignableBody::StreamingSigned { trailer: false } => {
                STREAMING_HMAC_SHA256_PAYLOAD.to_string()
            }
            SignableBody::StreamingSigned { trailer: true } => {
                STREAMING_HMAC_SHA256_PAYLOAD_TRAILER.to_string()
            }
            SignableBody::StreamingUnsignedTrailer => STREAMING_UNSIGNED_PAYLOAD_TRAILER.to_string(),
        }
    }

    pub(crate) fn is_streaming(&self) -> bool {
        matches!(
            self,
            SignableBody::StreamingSigned { .. } | SignableBody::StreamingUnsignedTrailer
        )
    }
}

/// Canonicalize the URI path.
///
/// The incoming path is already URL encoded (it came off an `http::Uri`).
/// Double encoding re-encodes it wholesale, percent signs included; single
/// encoding passes it through, which is what S3 expects.
pub(crate) fn canonical_uri(path: &str, normalize: bool, double_encode: bool) -> String {
    let path = if path.is_empty() { "/" } else { path };
    let path = if normalize {
        normalize_uri_path(path)
    } else {
        path.to_string()
    };

    if double_encode {
        utf8_percent_encode(&path, &AWS_URI_ENCODE_SET).to_string()
    } else {
        path
    }
}

/// Remove `.`/`..` segments and redundant slashes per RFC 3986.
pub(crate) fn normalize_uri_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut out = String::with_capacity(path.len());
    out.push('/');
    out.push_str(&segments.join("/"));
    if path.ends_with('/') && out.len() > 1 {
        out.push('/');
    }
    out
}

/// Percent-encode and sort the query pairs in place.
///
/// Encoded names sort before encoded values, so duplicates of one name
/// order by value.
pub(crate) fn encode_query_pairs(query: &mut Vec<(String, String)>) {
    *query = query
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, &AWS_QUERY_ENCODE_SET).to_string(),
                utf8_percent_encode(v, &AWS_QUERY_ENCODE_SET).to_string(),
            )
        })
        .collect();
    query.sort();
}

/// Assemble the canonical request string.
///
/// Expects query pairs already encoded and sorted, and header values
/// already normalized.
pub(crate) fn canonical_request_string(
    ctx: &SigningRequest,
    path: &str,
    content_hash: &str,
) -> Result<String> {
    // 256 is specially chosen to avoid reallocation for most requests.
    let mut f = String::with_capacity(256);

    // Insert method
    writeln!(f, "{}", ctx.method)?;
    // Insert encoded path
    writeln!(f, "{path}")?;
    // Insert query
    writeln!(
        f,
        "{}",
        ctx.query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    )?;
    // Insert canonical headers, duplicates joined with a comma in the
    // order given.
    let signed_headers = ctx.header_name_to_vec_sorted();
    for name in signed_headers.iter() {
        let value = ctx
            .headers
            .get_all(*name)
            .iter()
            .map(|v| v.to_str())
            .collect::<std::result::Result<Vec<_>, _>>()?
            .join(",");
        writeln!(f, "{name}:{value}")?;
    }
    writeln!(f)?;
    writeln!(f, "{}", signed_headers.join(";"))?;

    write!(f, "{content_hash}")?;

    Ok(f)
}

/// Content hash of the request as it will be signed: an explicit
/// `x-amz-content-sha256` header wins over the body description.
pub(crate) fn resolved_content_hash(ctx: &SigningRequest, body: &SignableBody<'_>) -> Result<String> {
    match ctx.headers.get(X_AMZ_CONTENT_SHA_256) {
        Some(v) => Ok(v.to_str()?.to_string()),
        None => Ok(body.content_hash()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("/", "/"; "root")]
    #[test_case("", "/"; "empty")]
    #[test_case("/a/b/../c", "/a/c"; "parent segment")]
    #[test_case("/a/./b/", "/a/b/"; "current segment keeps trailing slash")]
    #[test_case("/a//b", "/a/b"; "redundant slash")]
    #[test_case("/a/b/..", "/a"; "trailing parent")]
    fn test_normalize_uri_path(input: &str, expected: &str) {
        assert_eq!(normalize_uri_path(input), expected);
    }

    #[test]
    fn test_canonical_uri_single_encoding_passes_through() {
        assert_eq!(
            canonical_uri("/test%24file.text", false, false),
            "/test%24file.text"
        );
    }

    #[test]
    fn test_canonical_uri_double_encoding_reencodes_percent() {
        assert_eq!(
            canonical_uri("/test%24file.text", true, true),
            "/test%2524file.text"
        );
    }

    #[test]
    fn test_canonical_uri_normalizes_when_asked() {
        assert_eq!(canonical_uri("/a/b/../c", true, true), "/a/c");
        assert_eq!(canonical_uri("/a/b/../c", false, true), "/a/b/../c");
    }

    #[test]
    fn test_encode_query_pairs_sorts_by_encoded_name_then_value() {
        let mut query = vec![
            ("prefix".to_string(), "CI/".to_string()),
            ("list-type".to_string(), "2".to_string()),
            ("prefix".to_string(), "AB".to_string()),
        ];
        encode_query_pairs(&mut query);
        assert_eq!(
            query,
            vec![
                ("list-type".to_string(), "2".to_string()),
                ("prefix".to_string(), "AB".to_string()),
                ("prefix".to_string(), "CI%2F".to_string()),
            ]
        );
    }

    #[test]
    fn test_content_hash_sentinels() {
        assert_eq!(SignableBody::UnsignedPayload.content_hash(), "UNSIGNED-PAYLOAD");
        assert_eq!(
            SignableBody::StreamingSigned { trailer: false }.content_hash(),
            "STREAMING-AWS4-HMAC-SHA256-PAYLOAD"
        );
        assert_eq!(
            SignableBody::StreamingSigned { trailer: true }.content_hash(),
            "STREAMING-AWS4-HMAC-SHA256-PAYLOAD-TRAILER"
        );
        assert_eq!(
            SignableBody::StreamingUnsignedTrailer.content_hash(),
            "STREAMING-UNSIGNED-PAYLOAD-TRAILER"
        );
        assert_eq!(
            SignableBody::Bytes(b"").content_hash(),
            crate::constants::EMPTY_STRING_SHA256
        );
    }
}
