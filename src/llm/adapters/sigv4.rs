//! Minimal AWS Signature Version 4 signing for bedrock requests.
//!
//! Implements the canonical-request / string-to-sign / derived-key chain for
//! a JSON POST with `host` and `x-amz-date` as the signed headers, which is
//! all the bedrock invoke path needs.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::llm::error::ProviderError;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SIGNED_HEADERS: &str = "host;x-amz-date";

/// Everything the signer needs for one request.
pub struct SigningParams<'a> {
    pub access_key: &'a str,
    pub secret_key: &'a str,
    pub session_token: Option<&'a str>,
    pub region: &'a str,
    pub service: &'a str,
    pub method: &'a str,
    pub url: &'a str,
    pub body: &'a [u8],
    pub now: DateTime<Utc>,
}

/// Produce the signed headers for the request.
pub fn sign(params: &SigningParams<'_>) -> Result<Vec<(String, String)>, ProviderError> {
    let url = reqwest::Url::parse(params.url)
        .map_err(|e| ProviderError::InvalidRequest(format!("bad URL for signing: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| ProviderError::InvalidRequest("URL has no host".to_string()))?
        .to_string();
    let path = url.path().to_string();
    let query = url.query().unwrap_or_default().to_string();

    let amz_date = params.now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = params.now.format("%Y%m%d").to_string();

    let payload_hash = hex::encode(Sha256::digest(params.body));
    let canonical_headers = format!("host:{host}\nx-amz-date:{amz_date}\n");
    let canonical_request = format!(
        "{}\n{path}\n{query}\n{canonical_headers}\n{SIGNED_HEADERS}\n{payload_hash}",
        params.method
    );

    let scope = format!("{date}/{}/{}/aws4_request", params.region, params.service);
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let secret = format!("AWS4{}", params.secret_key);
    let k_date = hmac_sha256(secret.as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, params.region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, params.service.as_bytes())?;
    let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{ALGORITHM} Credential={}/{scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}",
        params.access_key
    );

    let mut headers = vec![
        ("host".to_string(), host),
        ("x-amz-date".to_string(), amz_date),
        ("authorization".to_string(), authorization),
        ("content-type".to_string(), "application/json".to_string()),
    ];
    if let Some(token) = params.session_token {
        headers.push(("x-amz-security-token".to_string(), token.to_string()));
    }
    Ok(headers)
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ProviderError::InvalidRequest(format!("HMAC key error: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signature_is_deterministic() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let params = SigningParams {
            access_key: "AKIDEXAMPLE",
            secret_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            session_token: None,
            region: "us-east-1",
            service: "bedrock",
            method: "POST",
            url: "https://bedrock-runtime.us-east-1.amazonaws.com/model/test/invoke",
            body: b"{}",
            now,
        };
        let a = sign(&params).unwrap();
        let b = sign(&params).unwrap();
        assert_eq!(a, b);

        let auth = &a.iter().find(|(k, _)| k == "authorization").unwrap().1;
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240115/us-east-1/bedrock/aws4_request"));
        assert!(auth.contains("SignedHeaders=host;x-amz-date"));
    }

    #[test]
    fn test_session_token_header_added() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();
        let params = SigningParams {
            access_key: "AK",
            secret_key: "SK",
            session_token: Some("token"),
            region: "us-west-2",
            service: "bedrock",
            method: "POST",
            url: "https://bedrock-runtime.us-west-2.amazonaws.com/model/m/invoke",
            body: b"{}",
            now,
        };
        let headers = sign(&params).unwrap();
        assert!(headers
            .iter()
            .any(|(k, v)| k == "x-amz-security-token" && v == "token"));
    }
}
