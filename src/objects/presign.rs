use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ObjectStoreError;

/// Query string carried by a pre-signed object URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedQuery {
    pub expires: i64,
    pub filename: String,
    pub signature: String,
}

/// Mints and checks pre-signed object URLs.
#[derive(Clone)]
pub struct UrlSigner {
    secret: String,
    public_url: String,
}

impl UrlSigner {
    pub fn new(secret: impl Into<String>, public_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn signature(&self, bucket: &str, key: &str, expires: i64, filename: &str) -> String {
        let expires = expires.to_string();
        let mut hasher = Sha256::new();
        for part in [
            self.secret.as_bytes(),
            bucket.as_bytes(),
            key.as_bytes(),
            expires.as_bytes(),
            filename.as_bytes(),
        ] {
            hasher.update(part);
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    pub fn url(
        &self,
        bucket: &str,
        key: &str,
        expires: i64,
        filename: &str,
    ) -> Result<String, ObjectStoreError> {
        let query = SignedQuery {
            expires,
            filename: filename.to_string(),
            signature: self.signature(bucket, key, expires, filename),
        };
        let query = serde_qs::to_string(&query).map_err(|e| ObjectStoreError::Sign(e.to_string()))?;
        Ok(format!("{}/objects/{}?{}", self.public_url, key, query))
    }

    pub fn verify(
        &self,
        bucket: &str,
        key: &str,
        query: &SignedQuery,
        now: i64,
    ) -> Result<(), ObjectStoreError> {
        let expected = self.signature(bucket, key, query.expires, &query.filename);
        if expected != query.signature {
            return Err(ObjectStoreError::Forbidden("signature mismatch"));
        }
        if query.expires <= now {
            return Err(ObjectStoreError::Forbidden("url expired"));
        }
        Ok(())
    }
}
