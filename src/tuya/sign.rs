//! Tuya OpenAPI request signing (HMAC-SHA256, "simple mode").

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGN_METHOD: &str = "HMAC-SHA256";

/// Path plus the query string with keys sorted, as it enters the signature.
pub fn canonical_url(path: &str, query: &[(&str, &str)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let mut params = query.to_vec();
    params.sort_by(|a, b| a.0.cmp(b.0));
    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    format!("{path}?{joined}")
}

pub fn string_to_sign(method: &str, body: &str, url: &str) -> String {
    let content_hash = hex::encode(Sha256::digest(body.as_bytes()));
    format!("{method}\n{content_hash}\n\n{url}")
}

/// `access_token` is `None` for the token endpoints themselves.
pub fn sign(
    access_id: &str,
    access_secret: &str,
    access_token: Option<&str>,
    t: u128,
    string_to_sign: &str,
) -> Result<String, ApiError> {
    let message = format!(
        "{access_id}{}{t}{string_to_sign}",
        access_token.unwrap_or_default()
    );
    let mut mac = HmacSha256::new_from_slice(access_secret.as_bytes())
        .map_err(|e| ApiError::Signing(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}
