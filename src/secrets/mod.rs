//! Secret bootstrapping from an AWS SSM parameter store.
//!
//! The service keeps its provider credentials in a single SecureString
//! parameter holding a newline-delimited `KEY=VALUE` blob. At startup the
//! blob is fetched with decryption, parsed, and injected into the process
//! environment before any configuration is read. Any failure here is fatal.
//!
//! The SSM call is a plain HTTPS request signed with AWS Signature V4
//! (HMAC-SHA256), so no AWS SDK dependency is needed.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::error::SecretError;

type HmacSha256 = Hmac<Sha256>;

/// A store of named, decrypted secret parameters.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Fetch the decrypted value of a parameter.
    async fn get_parameter(&self, name: &str) -> Result<String, SecretError>;
}

/// Parse a newline-delimited `KEY=VALUE` blob.
///
/// Blank lines are skipped. A non-blank line without `=`, or with an empty
/// key, fails the whole parse: a partially applied secret set is worse than
/// a loud startup failure.
pub fn parse_dotenv(blob: &str) -> Result<Vec<(String, String)>, SecretError> {
    let mut pairs = Vec::new();
    for (idx, line) in blob.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('=').ok_or(SecretError::Malformed {
            line: idx + 1,
            message: "expected KEY=VALUE".to_string(),
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(SecretError::Malformed {
                line: idx + 1,
                message: "empty key".to_string(),
            });
        }
        pairs.push((key.to_string(), value.trim().to_string()));
    }
    Ok(pairs)
}

/// Fetch a parameter, parse it as a dotenv blob, and inject every pair into
/// the process environment.
///
/// Must run exactly once, before [`crate::config::ServiceConfig::from_env`].
/// Returns the injected pairs so callers can log which keys were set.
pub async fn bootstrap(
    store: &dyn ParameterStore,
    name: &str,
) -> Result<Vec<(String, String)>, SecretError> {
    let blob = store.get_parameter(name).await?;
    let pairs = parse_dotenv(&blob)?;
    for (key, value) in &pairs {
        std::env::set_var(key, value);
    }
    tracing::info!(parameter = name, keys = pairs.len(), "secrets injected");
    Ok(pairs)
}

// ---------------------------------------------------------------------------
// SSM client
// ---------------------------------------------------------------------------

/// AWS SSM `GetParameter` client over plain HTTPS with SigV4 signing.
///
/// Credentials come from the standard environment variables
/// (`AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, optional
/// `AWS_SESSION_TOKEN`). The region defaults to `AWS_DEFAULT_REGION` or
/// `ap-northeast-1`.
#[derive(Debug, Clone)]
pub struct SsmParameterStore {
    region: String,
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    /// Override for the service endpoint, used by tests.
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl SsmParameterStore {
    /// Build a client from the standard AWS environment variables.
    pub fn from_env() -> Result<Self, SecretError> {
        let region = std::env::var("AWS_DEFAULT_REGION")
            .or_else(|_| std::env::var("AWS_REGION"))
            .unwrap_or_else(|_| "ap-northeast-1".to_string());
        let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| SecretError::Fetch {
            name: String::new(),
            message: "AWS_ACCESS_KEY_ID not set".to_string(),
        })?;
        let secret_key =
            std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| SecretError::Fetch {
                name: String::new(),
                message: "AWS_SECRET_ACCESS_KEY not set".to_string(),
            })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            region,
            access_key,
            secret_key,
            session_token,
            endpoint: None,
            client: reqwest::Client::new(),
        })
    }

    /// Create a client with explicit credentials.
    pub fn new(
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            region: region.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token,
            endpoint: None,
            client: reqwest::Client::new(),
        }
    }

    /// Point the client at a non-default endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    fn host(&self) -> String {
        format!("ssm.{}.amazonaws.com", self.region)
    }

    fn url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}/", self.host()),
        }
    }

    /// Derive the SigV4 signing key for the given date scope.
    fn signing_key(&self, date: &str) -> Vec<u8> {
        let mut key = hmac_sha256(format!("AWS4{}", self.secret_key).as_bytes(), date.as_bytes());
        key = hmac_sha256(&key, self.region.as_bytes());
        key = hmac_sha256(&key, b"ssm");
        hmac_sha256(&key, b"aws4_request")
    }

    /// Build the SigV4 `Authorization` header plus the amz-date for a
    /// `GetParameter` request body.
    fn sign(&self, payload: &str, amz_date: &str) -> (String, String) {
        let date = &amz_date[..8];
        let payload_hash = hex_sha256(payload.as_bytes());

        // Headers must appear sorted by name in both lists.
        let mut canonical_headers = format!(
            "content-type:application/x-amz-json-1.1\nhost:{}\nx-amz-date:{}\n",
            self.host(),
            amz_date
        );
        let mut signed_headers = "content-type;host;x-amz-date".to_string();
        if let Some(token) = &self.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }
        canonical_headers.push_str("x-amz-target:AmazonSSM.GetParameter\n");
        signed_headers.push_str(";x-amz-target");

        let canonical_request = format!(
            "POST\n/\n\n{}\n{}\n{}",
            canonical_headers, signed_headers, payload_hash
        );

        let scope = format!("{}/{}/ssm/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signature = hex::encode(hmac_sha256(
            &self.signing_key(date),
            string_to_sign.as_bytes(),
        ));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        );
        (authorization, payload_hash)
    }
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get_parameter(&self, name: &str) -> Result<String, SecretError> {
        let payload = serde_json::json!({
            "Name": name,
            "WithDecryption": true,
        })
        .to_string();

        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
        let (authorization, _payload_hash) = self.sign(&payload, &amz_date);

        let mut request = self
            .client
            .post(self.url())
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", "AmazonSSM.GetParameter")
            .header("X-Amz-Date", &amz_date)
            .header("Authorization", authorization);
        if let Some(token) = &self.session_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|e| SecretError::Fetch {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| SecretError::Fetch {
            name: name.to_string(),
            message: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(SecretError::Fetch {
                name: name.to_string(),
                message: format!("SSM returned {}: {}", status, truncate(&body, 200)),
            });
        }

        let parsed: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| SecretError::Fetch {
                name: name.to_string(),
                message: format!("invalid SSM response: {}", e),
            })?;

        parsed
            .get("Parameter")
            .and_then(|p| p.get("Value"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| SecretError::Fetch {
                name: name.to_string(),
                message: "SSM response missing Parameter.Value".to_string(),
            })
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dotenv_splits_pairs() {
        let blob = "OPENAI_API_KEY=sk-abc\nAPI_KEY=secret\n\nPORT=8080";
        let pairs = parse_dotenv(blob).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0], ("OPENAI_API_KEY".to_string(), "sk-abc".to_string()));
        assert_eq!(pairs[2], ("PORT".to_string(), "8080".to_string()));
    }

    #[test]
    fn parse_dotenv_keeps_equals_in_value() {
        let pairs = parse_dotenv("TOKEN=abc=def").unwrap();
        assert_eq!(pairs[0].1, "abc=def");
    }

    #[test]
    fn parse_dotenv_rejects_line_without_separator() {
        let err = parse_dotenv("VALID=1\nnot-a-pair").unwrap_err();
        match err {
            SecretError::Malformed { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_dotenv_rejects_empty_key() {
        assert!(parse_dotenv("=value").is_err());
    }

    #[test]
    fn signing_is_deterministic_for_fixed_inputs() {
        let store = SsmParameterStore::new("ap-northeast-1", "AKIDEXAMPLE", "secret", None);
        let (auth_a, hash_a) = store.sign("{\"Name\":\"p\"}", "20240101T000000Z");
        let (auth_b, hash_b) = store.sign("{\"Name\":\"p\"}", "20240101T000000Z");
        assert_eq!(auth_a, auth_b);
        assert_eq!(hash_a, hash_b);
        assert!(auth_a.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240101/"));
        assert!(auth_a.contains("SignedHeaders=content-type;host;x-amz-date;x-amz-target"));
    }

    #[test]
    fn session_token_joins_signed_headers() {
        let store =
            SsmParameterStore::new("us-east-1", "AK", "sk", Some("session-token".to_string()));
        let (auth, _) = store.sign("{}", "20240101T000000Z");
        assert!(auth.contains("x-amz-security-token"));
    }

    #[tokio::test]
    async fn bootstrap_injects_pairs() {
        struct FixedStore;

        #[async_trait]
        impl ParameterStore for FixedStore {
            async fn get_parameter(&self, _name: &str) -> Result<String, SecretError> {
                Ok("RAGSERVE_TEST_SECRET=injected".to_string())
            }
        }

        let pairs = bootstrap(&FixedStore, "/app/dotenv").await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(std::env::var("RAGSERVE_TEST_SECRET").unwrap(), "injected");
    }
}
