//! COS request signing
//!
//! Produces the `q-sign-algorithm=sha1` authorization string used by the
//! COS XML API. The signature is scoped to a 900 second window starting at
//! the moment of signing, so every HTTP call is signed right before it is sent.
//!
//! Reference: <https://cloud.tencent.com/document/product/436/7778>

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Lifetime of a signature in seconds
pub const SIGNATURE_TTL_SECS: i64 = 900;

/// A request description ready to be signed
///
/// Query parameters and headers are kept in ordered maps so the canonical
/// form is independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub method: String,
    pub canonical_path: String,
    pub query_params: BTreeMap<String, String>,
    pub signed_headers: BTreeMap<String, String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

impl SignedRequest {
    /// Describe a request issued now
    pub fn new(method: &str, canonical_path: impl Into<String>) -> Self {
        Self::issued_at(method, canonical_path, jiff::Timestamp::now().as_second())
    }

    /// Describe a request issued at a fixed unix time
    pub fn issued_at(method: &str, canonical_path: impl Into<String>, issued_at: i64) -> Self {
        Self {
            method: method.to_lowercase(),
            canonical_path: canonical_path.into(),
            query_params: BTreeMap::new(),
            signed_headers: BTreeMap::new(),
            issued_at,
            expires_at: issued_at + SIGNATURE_TTL_SECS,
        }
    }

    /// Add a query parameter covered by the signature
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query_params.insert(key.into(), value.to_string());
        self
    }

    /// Add a header covered by the signature
    pub fn header(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.signed_headers.insert(key.into(), value.to_string());
        self
    }

    /// `"t0;t1"` as it appears in both the key time and the sign time
    pub fn key_time(&self) -> String {
        format!("{};{}", self.issued_at, self.expires_at)
    }

    /// Canonical request string hashed into the string to sign
    pub fn canonical_request(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n",
            self.method,
            self.canonical_path,
            compact_pairs(&self.query_params),
            compact_pairs(&self.signed_headers)
        )
    }

    /// Compute the authorization string for this request
    pub fn authorization(&self, secret_id: &str, secret_key: &str) -> String {
        let key_time = self.key_time();
        let sign_key = hmac_sha1_hex(secret_key.as_bytes(), key_time.as_bytes());

        let string_to_sign = format!(
            "sha1\n{key_time}\n{}\n",
            hex::encode(Sha1::digest(self.canonical_request().as_bytes()))
        );
        let signature = hmac_sha1_hex(sign_key.as_bytes(), string_to_sign.as_bytes());

        tracing::trace!(path = %self.canonical_path, %key_time, "signed request");

        [
            "q-sign-algorithm=sha1".to_string(),
            format!("q-ak={secret_id}"),
            format!("q-sign-time={key_time}"),
            format!("q-key-time={key_time}"),
            format!("q-header-list={}", compact_keys(&self.signed_headers)),
            format!("q-url-param-list={}", compact_keys(&self.query_params)),
            format!("q-signature={signature}"),
        ]
        .join("&")
    }
}

/// Sign a request issued now
///
/// Values of `params` and `headers` are percent-encoded before signing; keys
/// are used as given.
pub fn sign(
    secret_id: &str,
    secret_key: &str,
    method: &str,
    pathname: &str,
    params: &BTreeMap<String, String>,
    headers: &BTreeMap<String, String>,
) -> String {
    sign_at(
        secret_id,
        secret_key,
        method,
        pathname,
        params,
        headers,
        jiff::Timestamp::now().as_second(),
    )
}

/// Sign a request with an explicit issue time
pub fn sign_at(
    secret_id: &str,
    secret_key: &str,
    method: &str,
    pathname: &str,
    params: &BTreeMap<String, String>,
    headers: &BTreeMap<String, String>,
    issued_at: i64,
) -> String {
    let mut request = SignedRequest::issued_at(method, pathname, issued_at);
    request.query_params = params.clone();
    request.signed_headers = headers.clone();
    request.authorization(secret_id, secret_key)
}

/// Percent-encode a value so that only unreserved characters survive
///
/// `/` is encoded as `%2F` as well.
pub fn encode_value(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn compact_pairs(map: &BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(k, v)| format!("{k}={}", encode_value(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn compact_keys(map: &BTreeMap<String, String>) -> String {
    map.keys().map(String::as_str).collect::<Vec<_>>().join(";")
}

fn hmac_sha1_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn field<'a>(auth: &'a str, name: &str) -> &'a str {
        auth.split('&')
            .find_map(|kv| kv.strip_prefix(&format!("{name}=")))
            .unwrap()
    }

    #[test]
    fn test_key_lists_are_sorted() {
        let params = map(&[("uploadid", "abc"), ("partnumber", "1"), ("acl", "")]);
        let headers = map(&[("content-length", "10"), ("content-md5", "x"), ("a-first", "y")]);
        let auth = sign_at("AKID", "secret", "PUT", "/pre/f", &params, &headers, 1_700_000_000);

        assert_eq!(field(&auth, "q-url-param-list"), "acl;partnumber;uploadid");
        assert_eq!(field(&auth, "q-header-list"), "a-first;content-length;content-md5");
    }

    #[test]
    fn test_deterministic_for_fixed_time() {
        let params = map(&[("uploads", "")]);
        let headers = map(&[("x-cos-storage-class", "Standard")]);
        let a = sign_at("AKID", "secret", "post", "/pre/a.bin", &params, &headers, 1_600_000_000);
        let b = sign_at("AKID", "secret", "post", "/pre/a.bin", &params, &headers, 1_600_000_000);
        assert_eq!(a, b);

        let c = sign_at("AKID", "secret", "post", "/pre/a.bin", &params, &headers, 1_600_000_001);
        assert_ne!(field(&a, "q-signature"), field(&c, "q-signature"));
    }

    #[test]
    fn test_signing_window_is_900_seconds() {
        let auth = sign_at("AKID", "secret", "get", "/", &map(&[]), &map(&[]), 100);
        assert_eq!(field(&auth, "q-sign-time"), "100;1000");
        assert_eq!(field(&auth, "q-key-time"), "100;1000");
        assert_eq!(field(&auth, "q-ak"), "AKID");
        assert_eq!(field(&auth, "q-sign-algorithm"), "sha1");
    }

    #[test]
    fn test_output_field_order() {
        let auth = sign_at("id", "key", "get", "/", &map(&[]), &map(&[]), 1);
        let names: Vec<&str> = auth
            .split('&')
            .map(|kv| kv.split('=').next().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "q-sign-algorithm",
                "q-ak",
                "q-sign-time",
                "q-key-time",
                "q-header-list",
                "q-url-param-list",
                "q-signature"
            ]
        );
    }

    #[test]
    fn test_canonical_request_encodes_values() {
        let request = SignedRequest::issued_at("GET", "/", 1)
            .query("prefix", "pre/dir/a b.txt")
            .query("uploads", "");
        assert_eq!(
            request.canonical_request(),
            "get\n/\nprefix=pre%2Fdir%2Fa%20b.txt&uploads=\n\n"
        );
    }

    #[test]
    fn test_signature_matches_manual_chain() {
        let request = SignedRequest::issued_at("put", "/pre/f", 10)
            .query("partnumber", 1)
            .header("content-length", 3);

        let sign_key = hmac_sha1_hex(b"secret", b"10;910");
        let string_to_sign = format!(
            "sha1\n10;910\n{}\n",
            hex::encode(Sha1::digest(b"put\n/pre/f\npartnumber=1\ncontent-length=3\n"))
        );
        let expected = hmac_sha1_hex(sign_key.as_bytes(), string_to_sign.as_bytes());

        let auth = request.authorization("id", "secret");
        assert_eq!(field(&auth, "q-signature"), expected);
        assert_eq!(expected.len(), 40);
    }

    #[test]
    fn test_empty_secret_still_signs() {
        let auth = sign_at("", "", "get", "/", &map(&[]), &map(&[]), 5);
        assert_eq!(field(&auth, "q-signature").len(), 40);
    }

    #[test]
    fn test_known_hmac_vector() {
        // RFC 2202 test case 2
        assert_eq!(
            hmac_sha1_hex(b"Jefe", b"what do ya want for nothing?"),
            "effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
        );
    }
}
