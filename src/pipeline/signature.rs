//! Ghost webhook signature verification.
//!
//! Header format: `x-ghost-signature: sha256=<hex>, t=<timestamp>`, where
//! `<hex>` is HMAC-SHA256 over the raw body with the timestamp string
//! appended directly after it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-ghost-signature";

/// The two parts of a signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader<'a> {
    pub signature: &'a str,
    pub timestamp: &'a str,
}

impl<'a> SignatureHeader<'a> {
    /// Split `sha256=<hex>, t=<timestamp>`. Any other shape yields `None`.
    pub fn parse(header: &'a str) -> Option<Self> {
        let mut parts = header.split(", ");
        let (Some(sig), Some(ts), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        Some(Self {
            signature: sig.strip_prefix("sha256=")?,
            timestamp: ts.strip_prefix("t=")?,
        })
    }
}

/// Hex HMAC-SHA256 of `body ‖ timestamp` under `secret`.
pub fn sign(body: &[u8], timestamp: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.update(timestamp.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Check a signature header against the raw body.
///
/// Comparison is constant-time over the hex text. Freshness of the
/// timestamp is not checked here; see [`is_timestamp_fresh`].
pub fn verify(header: &str, body: &[u8], secret: &str) -> bool {
    let Some(parsed) = SignatureHeader::parse(header) else {
        return false;
    };
    let expected = sign(body, parsed.timestamp, secret);
    expected.as_bytes().ct_eq(parsed.signature.as_bytes()).into()
}

/// Whether a header timestamp lies within `max_age` of `now`.
///
/// Ghost sends milliseconds; plain seconds are accepted too. Timestamps
/// more than `max_age` in the future are rejected as well.
pub fn is_timestamp_fresh(timestamp: &str, max_age: Duration, now: DateTime<Utc>) -> bool {
    let Ok(raw) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    // Anything past year 33658 in seconds is really milliseconds.
    let millis = if raw > 1_000_000_000_000 { raw } else { raw.saturating_mul(1000) };
    let Some(sent) = DateTime::<Utc>::from_timestamp_millis(millis) else {
        return false;
    };
    let skew = (now - sent).num_milliseconds().unsigned_abs();
    skew <= max_age.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "s3cr3t";
    const BODY: &[u8] = br#"{"member":{"current":{"email":"a@example.com"}}}"#;
    const TS: &str = "1718000000";

    fn header(sig: &str, ts: &str) -> String {
        format!("sha256={sig}, t={ts}")
    }

    #[test]
    fn valid_signature_verifies() {
        let sig = sign(BODY, TS, SECRET);
        assert!(verify(&header(&sig, TS), BODY, SECRET));
    }

    #[test]
    fn timestamp_is_appended_to_body() {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(&[BODY, TS.as_bytes()].concat());
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(sign(BODY, TS, SECRET), expected);
    }

    #[test]
    fn any_single_byte_mutation_fails() {
        let sig = sign(BODY, TS, SECRET);

        for i in 0..sig.len() {
            let mut bytes = sig.clone().into_bytes();
            bytes[i] = if bytes[i] == b'0' { b'1' } else { b'0' };
            let mutated = String::from_utf8(bytes).unwrap();
            assert!(!verify(&header(&mutated, TS), BODY, SECRET), "sig byte {i}");
        }

        for i in 0..BODY.len() {
            let mut body = BODY.to_vec();
            body[i] ^= 0x01;
            assert!(!verify(&header(&sig, TS), &body, SECRET), "body byte {i}");
        }

        for i in 0..TS.len() {
            let mut ts = TS.to_string().into_bytes();
            ts[i] = if ts[i] == b'9' { b'8' } else { ts[i] + 1 };
            let ts = String::from_utf8(ts).unwrap();
            assert!(!verify(&header(&sig, &ts), BODY, SECRET), "ts byte {i}");
        }
    }

    #[test]
    fn wrong_secret_fails() {
        let sig = sign(BODY, TS, SECRET);
        assert!(!verify(&header(&sig, TS), BODY, "other"));
    }

    #[test]
    fn malformed_headers_rejected() {
        let sig = sign(BODY, TS, SECRET);
        assert!(!verify("", BODY, SECRET));
        assert!(!verify(&sig, BODY, SECRET));
        assert!(!verify(&format!("sha256={sig},t={TS}"), BODY, SECRET));
        assert!(!verify(&format!("t={TS}, sha256={sig}"), BODY, SECRET));
        assert!(!verify(&format!("sha256={sig}, t={TS}, x=1"), BODY, SECRET));
        assert!(!verify(&format!("md5={sig}, t={TS}"), BODY, SECRET));
    }

    #[test]
    fn freshness_window() {
        let now = DateTime::<Utc>::from_timestamp(1_718_000_000, 0).unwrap();
        let window = Duration::from_secs(300);
        assert!(is_timestamp_fresh("1718000000", window, now));
        assert!(is_timestamp_fresh("1717999800000", window, now));
        assert!(!is_timestamp_fresh("1717990000", window, now));
        assert!(!is_timestamp_fresh("1718090000", window, now));
        assert!(!is_timestamp_fresh("yesterday", window, now));
    }
}
