//! Presigned URLs for an S3-style endpoint.
//!
//! URLs have the shape `<endpoint>/<bucket>/<key>?X-RK-Credential=..&X-RK-Expires=..&X-RK-Method=..&X-RK-Signature=..`
//! where the signature is the hex HMAC-SHA256, keyed with the shared secret,
//! of the method, bucket, key and expiry (unix seconds) joined by newlines.
//! The storage gateway recomputes it with the same secret.

use std::time::Duration;

use async_trait::async_trait;
use record_engine_sdk::PresignedUrl;
use secrecy::{ExposeSecret, SecretString};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::OffsetDateTime;
use url::Url;

use crate::domain::error::{ConfigError, DomainError};
use crate::domain::ports::ObjectStorePort;

const CREDENTIAL: &str = "X-RK-Credential";
const EXPIRES: &str = "X-RK-Expires";
const METHOD: &str = "X-RK-Method";
const SIGNATURE: &str = "X-RK-Signature";

type HmacSha256 = Hmac<Sha256>;

pub struct SignedUrlObjectStore {
    endpoint: Url,
    access_key: String,
    secret: SecretString,
}

impl std::fmt::Debug for SignedUrlObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedUrlObjectStore")
            .field("endpoint", &self.endpoint.as_str())
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl SignedUrlObjectStore {
    /// # Errors
    /// [`ConfigError::ObjectStore`] when `endpoint` is not an absolute http(s) URL.
    pub fn new(
        name: &str,
        endpoint: &str,
        access_key: impl Into<String>,
        secret: SecretString,
    ) -> Result<Self, ConfigError> {
        let err = |message: String| ConfigError::ObjectStore {
            store: name.to_owned(),
            message,
        };
        let mut endpoint = Url::parse(endpoint).map_err(|e| err(format!("invalid endpoint: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") || endpoint.cannot_be_a_base() {
            return Err(err(format!("unsupported endpoint '{endpoint}'")));
        }
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            endpoint,
            access_key: access_key.into(),
            secret,
        })
    }

    fn mac(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        expires: i64,
    ) -> Result<HmacSha256, DomainError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| DomainError::internal(format!("invalid signing key: {e}")))?;
        let expires = expires.to_string();
        for part in [method, bucket, key, expires.as_str()] {
            mac.update(part.as_bytes());
            mac.update(b"\n");
        }
        Ok(mac)
    }

    fn sign(
        &self,
        method: &str,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, DomainError> {
        let ttl = time::Duration::try_from(ttl)
            .map_err(|e| DomainError::internal(format!("invalid ttl: {e}")))?;
        let expires_at = OffsetDateTime::now_utc()
            .replace_nanosecond(0)
            .map_err(|e| DomainError::internal(e.to_string()))?
            + ttl;
        let expires = expires_at.unix_timestamp();
        let signature = hex::encode(
            self.mac(method, bucket, key, expires)?
                .finalize()
                .into_bytes(),
        );

        let mut url = self
            .endpoint
            .join(&format!("{bucket}/{key}"))
            .map_err(|e| DomainError::internal(format!("invalid object url: {e}")))?;
        url.query_pairs_mut()
            .append_pair(CREDENTIAL, &self.access_key)
            .append_pair(EXPIRES, &expires.to_string())
            .append_pair(METHOD, method)
            .append_pair(SIGNATURE, &signature);

        Ok(PresignedUrl {
            url: url.into(),
            method: method.to_owned(),
            key: key.to_owned(),
            expires_at,
        })
    }

    /// Check a URL produced by this store at time `now`.
    #[must_use]
    pub fn verify(&self, url: &str, now: OffsetDateTime) -> bool {
        let Ok(url) = Url::parse(url) else {
            return false;
        };
        let Some(path) = url.path().strip_prefix(self.endpoint.path()) else {
            return false;
        };
        let Some((bucket, key)) = path.split_once('/') else {
            return false;
        };
        let query = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };
        let (Some(method), Some(expires), Some(signature)) =
            (query(METHOD), query(EXPIRES), query(SIGNATURE))
        else {
            return false;
        };
        let (Ok(expires), Ok(signature)) = (expires.parse::<i64>(), hex::decode(signature)) else {
            return false;
        };
        if expires < now.unix_timestamp() {
            return false;
        }
        // constant-time comparison
        self.mac(&method, bucket, key, expires)
            .is_ok_and(|mac| mac.verify_slice(&signature).is_ok())
    }
}

#[async_trait]
impl ObjectStorePort for SignedUrlObjectStore {
    async fn presigned_upload_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, DomainError> {
        self.sign("PUT", bucket, key, ttl)
    }

    async fn presigned_download_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<PresignedUrl, DomainError> {
        self.sign("GET", bucket, key, ttl)
    }
}
