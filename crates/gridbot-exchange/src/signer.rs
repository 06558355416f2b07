//! API credentials and HMAC-SHA256 request signing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Exchange API key pair.
///
/// The secret is never logged; `Debug` redacts it.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn expose_secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"[redacted]")
            .finish()
    }
}

/// Request signer for authenticated REST calls.
pub struct RequestSigner<'a> {
    credentials: &'a ApiCredentials,
}

impl<'a> RequestSigner<'a> {
    pub fn new(credentials: &'a ApiCredentials) -> Self {
        Self { credentials }
    }

    /// HMAC-SHA256 of the message, as a lowercase hex string.
    pub fn sign(&self, message: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.credentials.expose_secret().as_bytes())
            .expect("HMAC accepts keys of any size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Sign a request, returning the canonical query string and the
    /// signature over the whole request.
    ///
    /// The signed message is `METHOD` + `path?sorted-query` + the JSON
    /// body (empty for GET). Query parameters are sorted alphabetically
    /// by key with the timestamp appended before sorting.
    pub fn sign_request(
        &self,
        method: &str,
        path: &str,
        params: &[(&str, &str)],
        timestamp_ms: i64,
        body: &str,
    ) -> SignedRequest {
        let mut all_params: Vec<(&str, String)> =
            params.iter().map(|(k, v)| (*k, v.to_string())).collect();
        all_params.push(("timestamp", timestamp_ms.to_string()));
        all_params.sort_by(|a, b| a.0.cmp(b.0));

        let query = all_params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let message = format!("{}{}?{}{}", method, path, query, body);
        SignedRequest {
            query,
            signature: self.sign(&message),
        }
    }
}

/// Output of [`RequestSigner::sign_request`]: the canonical query string
/// to send, and the signature for the signature header.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub query: String,
    pub signature: String,
}
