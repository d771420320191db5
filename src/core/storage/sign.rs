// src/core/storage/sign.rs

//! AWS-signature-v4 request signing for the S3-compatible object store.
//!
//! Only the subset the accessor needs: path-style requests, a fixed set of
//! signed headers (`host`, `x-amz-date`, `x-amz-content-sha256`, and
//! `x-amz-copy-source` when present), unsigned query strings limited to the
//! list API's keys.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Debug, Clone)]
pub struct SigningKey {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// One request's signing inputs. Header values must already be in their final
/// on-the-wire form.
pub struct SignableRequest<'a> {
    pub method: &'a str,
    /// Absolute path, e.g. `/bucket/key`.
    pub path: &'a str,
    /// Canonical (sorted, encoded) query string, possibly empty.
    pub query: &'a str,
    pub host: &'a str,
    pub payload_sha256: &'a str,
    /// Extra `x-amz-*` headers to sign, lowercase names, pre-sorted.
    pub amz_headers: &'a [(&'a str, &'a str)],
}

pub fn payload_sha256(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 3986 unreserved-set encoding, applied per path segment.
pub fn uri_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Strict RFC 3986 encoding for query values; unlike the path form, `/` is
/// escaped too.
pub fn uri_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

/// Computes the `Authorization` header value and the `x-amz-date` timestamp
/// for a request.
pub fn sign(
    key: &SigningKey,
    req: &SignableRequest<'_>,
    now: DateTime<Utc>,
) -> (String, String) {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let mut headers: Vec<(String, String)> = vec![
        ("host".to_string(), req.host.to_string()),
        (
            "x-amz-content-sha256".to_string(),
            req.payload_sha256.to_string(),
        ),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    for (name, value) in req.amz_headers {
        headers.push((name.to_string(), value.to_string()));
    }
    headers.sort();

    let canonical_headers: String = headers
        .iter()
        .map(|(n, v)| format!("{n}:{}\n", v.trim()))
        .collect();
    let signed_headers: String = headers
        .iter()
        .map(|(n, _)| n.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method,
        uri_encode_path(req.path),
        req.query,
        canonical_headers,
        signed_headers,
        req.payload_sha256
    );

    let scope = format!("{date_stamp}/{}/s3/aws4_request", key.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(
        format!("AWS4{}", key.secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac(&k_date, key.region.as_bytes());
    let k_service = hmac(&k_region, b"s3");
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        key.access_key
    );
    (authorization, amz_date)
}
