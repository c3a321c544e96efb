use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    MalformedHeader,
    NoMatchingSignature,
    TimestampOutsideTolerance,
}

/// Checks a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// HMAC-SHA256 of `"{t}.{payload}"`.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        let (Some(key), Some(value)) = (kv.next(), kv.next()) else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    candidates.push(bytes);
                }
            }
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return Err(SignatureError::MalformedHeader);
    };
    if candidates.is_empty() {
        return Err(SignatureError::NoMatchingSignature);
    }

    let expected = compute_signature(payload, timestamp, secret)
        .ok_or(SignatureError::MalformedHeader)?;
    let matched = candidates
        .iter()
        .any(|candidate| bool::from(candidate.as_slice().ct_eq(expected.as_slice())));
    if !matched {
        return Err(SignatureError::NoMatchingSignature);
    }

    if (now_unix - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::TimestampOutsideTolerance);
    }
    Ok(())
}

fn compute_signature(payload: &[u8], timestamp: i64, secret: &str) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Builds a header value the way the provider does. Used by tests and local
/// tooling that replays events.
pub fn sign_payload(payload: &[u8], timestamp: i64, secret: &str) -> Option<String> {
    let sig = compute_signature(payload, timestamp, secret)?;
    Some(format!("t={},v1={}", timestamp, hex::encode(sig)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"type":"checkout.session.completed"}"#;

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let header = sign_payload(BODY, 1_700_000_000, SECRET).unwrap();
        assert_eq!(
            verify_signature(BODY, &header, SECRET, 1_700_000_010, DEFAULT_TOLERANCE_SECS),
            Ok(())
        );
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_payload(BODY, 1_700_000_000, SECRET).unwrap();
        assert_eq!(
            verify_signature(b"{}", &header, SECRET, 1_700_000_000, DEFAULT_TOLERANCE_SECS),
            Err(SignatureError::NoMatchingSignature)
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign_payload(BODY, 1_700_000_000, "other").unwrap();
        assert!(verify_signature(BODY, &header, SECRET, 1_700_000_000, 300).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign_payload(BODY, 1_700_000_000, SECRET).unwrap();
        assert_eq!(
            verify_signature(BODY, &header, SECRET, 1_700_000_301, 300),
            Err(SignatureError::TimestampOutsideTolerance)
        );
    }

    #[test]
    fn accepts_any_of_several_v1_entries() {
        let good = sign_payload(BODY, 42, SECRET).unwrap();
        let v1 = good.split("v1=").nth(1).unwrap();
        let header = format!("t=42,v1=deadbeef,v0=abc,v1={}", v1);
        assert!(verify_signature(BODY, &header, SECRET, 42, 300).is_ok());
    }

    #[test]
    fn rejects_header_without_timestamp() {
        assert_eq!(
            verify_signature(BODY, "v1=abcd", SECRET, 0, 300),
            Err(SignatureError::MalformedHeader)
        );
    }
}
