//! AWS Signature Version 4 query-string presigning for S3-compatible stores.

use crate::config::SecondaryConfig;
use crate::error::SigningError;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use http::{Method, Uri};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha2::{Digest, Sha256};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
const MAX_EXPIRY_SECS: u64 = 7 * 24 * 3600;

/// Everything except the RFC 3986 unreserved characters.
const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');
const PATH_ENCODE: &AsciiSet = &QUERY_ENCODE.remove(b'/');

#[derive(Debug, Clone)]
pub struct Presigner {
    scheme: String,
    host: String,
    path_prefix: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
}

impl Presigner {
    pub fn new(config: &SecondaryConfig) -> Result<Self, SigningError> {
        let endpoint: Uri = config
            .endpoint
            .parse()
            .map_err(|_| SigningError::InvalidEndpoint(config.endpoint.clone()))?;
        let scheme = endpoint
            .scheme_str()
            .ok_or_else(|| SigningError::InvalidEndpoint(config.endpoint.clone()))?
            .to_string();
        let authority = endpoint
            .authority()
            .ok_or_else(|| SigningError::InvalidEndpoint(config.endpoint.clone()))?
            .as_str()
            .to_string();

        let (host, path_prefix) = if config.path_style {
            (authority, format!("/{}", config.bucket))
        } else {
            (format!("{}.{}", config.bucket, authority), String::new())
        };

        Ok(Self {
            scheme,
            host,
            path_prefix,
            region: config.region.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
        })
    }

    pub fn presign(
        &self,
        method: &Method,
        key: &str,
        expires_in: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, SigningError> {
        if self.access_key_id.is_empty() || self.secret_access_key.is_empty() {
            return Err(SigningError::MissingCredentials);
        }
        if key.is_empty() || key.split('/').any(|segment| segment == "..") {
            return Err(SigningError::InvalidKey(key.to_string()));
        }

        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/{}/{SERVICE}/aws4_request", self.region);
        let expires = expires_in.as_secs().clamp(1, MAX_EXPIRY_SECS);

        let canonical_uri = format!(
            "{}/{}",
            self.path_prefix,
            utf8_percent_encode(key, PATH_ENCODE)
        );
        // already in lexicographic order
        let query = [
            ("X-Amz-Algorithm", ALGORITHM.to_string()),
            (
                "X-Amz-Credential",
                format!("{}/{}", self.access_key_id, scope),
            ),
            ("X-Amz-Date", amz_date.clone()),
            ("X-Amz-Expires", expires.to_string()),
            ("X-Amz-SignedHeaders", "host".to_string()),
        ]
        .iter()
        .map(|(k, v)| format!("{}={}", k, utf8_percent_encode(v, QUERY_ENCODE)))
        .collect::<Vec<_>>()
        .join("&");

        let canonical_request = format!(
            "{}\n{}\n{}\nhost:{}\n\nhost\n{}",
            method.as_str(),
            canonical_uri,
            query,
            self.host,
            UNSIGNED_PAYLOAD
        );
        let string_to_sign = format!(
            "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let k_date = hmac_sha256(
            format!("AWS4{}", self.secret_access_key).as_bytes(),
            date.as_bytes(),
        )?;
        let k_region = hmac_sha256(&k_date, self.region.as_bytes())?;
        let k_service = hmac_sha256(&k_region, SERVICE.as_bytes())?;
        let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
        let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

        Ok(format!(
            "{}://{}{}?{}&X-Amz-Signature={}",
            self.scheme, self.host, canonical_uri, query, signature
        ))
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| SigningError::Crypto(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}
