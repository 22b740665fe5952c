//! HMAC-SHA384 request signing for the exchange's private v2 endpoints.
//!
//! Not used on the public historical-trades path, but callers of the same
//! client need it for account endpoints. Builds the header set
//! `bfx-nonce` / `bfx-apikey` / `bfx-signature` / `content-type`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use sha2::Sha384;

use crate::error::Result;

type HmacSha384 = Hmac<Sha384>;

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub key: String,
    pub secret: String,
}

/// Signs private requests for one API key. Nonces are epoch milliseconds and
/// strictly increasing per signer, as the exchange requires per key.
#[derive(Debug)]
pub struct RequestSigner {
    credentials: ApiCredentials,
    last_nonce: AtomicU64,
}

impl RequestSigner {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self {
            credentials,
            last_nonce: AtomicU64::new(0),
        }
    }

    /// Next nonce: current epoch milliseconds, bumped past the previous
    /// nonce if the clock has not advanced since the last call.
    fn nonce(&self) -> String {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut prev = self.last_nonce.load(Ordering::Relaxed);
        loop {
            let next = now_ms.max(prev + 1);
            match self.last_nonce.compare_exchange_weak(
                prev,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next.to_string(),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Header set for a private request to `path` (e.g. `v2/auth/r/orders`)
    /// with the given JSON `body`.
    pub fn headers(&self, path: &str, body: &str) -> Result<HeaderMap> {
        let nonce = self.nonce();
        let signature = sign(&self.credentials.secret, path, &nonce, body);

        let mut headers = HeaderMap::new();
        headers.insert("bfx-nonce", HeaderValue::from_str(&nonce)?);
        headers.insert("bfx-apikey", HeaderValue::from_str(&self.credentials.key)?);
        headers.insert("bfx-signature", HeaderValue::from_str(&signature)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

/// Hex-encoded HMAC-SHA384 over `"/api/" + path + nonce + body`.
fn sign(secret: &str, path: &str, nonce: &str, body: &str) -> String {
    let mut mac =
        HmacSha384::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(b"/api/");
    mac.update(path.as_bytes());
    mac.update(nonce.as_bytes());
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_vector() {
        let signature = sign("test_secret", "v2/auth/r/orders", "1609459200000", "{}");
        assert_eq!(
            signature,
            "592bae89b07c5c2b08f48cd2fa135da5b5478c5ee29ef5532a93e5ba02a3d709568a35eb7e7fdc165e7d47242f19db3c"
        );
    }

    #[test]
    fn headers_contain_full_set() {
        let signer = RequestSigner::new(ApiCredentials {
            key: "test_key".to_string(),
            secret: "test_secret".to_string(),
        });

        let headers = signer.headers("v2/auth/r/orders", "{}").unwrap();
        assert!(headers.contains_key("bfx-nonce"));
        assert_eq!(headers.get("bfx-apikey").unwrap(), "test_key");
        // SHA-384 hex digest is 96 chars
        assert_eq!(headers.get("bfx-signature").unwrap().len(), 96);
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn nonces_strictly_increase() {
        let signer = RequestSigner::new(ApiCredentials {
            key: "k".to_string(),
            secret: "s".to_string(),
        });

        let mut previous = 0u64;
        for _ in 0..100 {
            let nonce: u64 = signer.nonce().parse().unwrap();
            assert!(nonce > previous, "nonce {nonce} must exceed {previous}");
            previous = nonce;
        }
    }
}
