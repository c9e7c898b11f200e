//! RSA signing through the Vault transit engine.
//!
//! The private key never leaves Vault. Signatures come back as
//! `vault:v<N>:<base64>`; the key version is kept so verification can target the
//! exact key that produced a signature after rotation.

use anyhow::{Result, anyhow};
use base64ct::{Base64, Encoding};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{error, instrument};

use crate::vault;

const HASH_ALGORITHM: &str = "sha2-256";
const SIGNATURE_ALGORITHM: &str = "pkcs1v15";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSignature {
    pub key_version: u32,
    pub signature_base64: String,
}

impl VaultSignature {
    /// Raw signature bytes.
    ///
    /// # Errors
    /// Returns an error if the signature is not valid base64.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Base64::decode_vec(&self.signature_base64)
            .map_err(|_| anyhow!("invalid vault signature encoding"))
    }

    /// Wire form accepted by the transit verify endpoint.
    #[must_use]
    pub fn to_vault_string(&self) -> String {
        format!("vault:v{}:{}", self.key_version, self.signature_base64)
    }
}

fn get_required_str<'a>(json_response: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = json_response;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str()
}

pub(crate) fn parse_signature(signature: &str) -> Result<VaultSignature> {
    let mut parts = signature.split(':');
    let prefix = parts
        .next()
        .ok_or_else(|| anyhow!("invalid vault signature"))?;
    let version_part = parts
        .next()
        .ok_or_else(|| anyhow!("invalid vault signature"))?;
    let sig_b64 = parts
        .next()
        .ok_or_else(|| anyhow!("invalid vault signature"))?;
    if parts.next().is_some() {
        return Err(anyhow!("invalid vault signature"));
    }
    if prefix != "vault" {
        return Err(anyhow!("invalid vault signature prefix"));
    }
    let version = version_part
        .strip_prefix('v')
        .ok_or_else(|| anyhow!("invalid vault signature version"))?;
    let key_version = version
        .parse::<u32>()
        .map_err(|_| anyhow!("invalid key version"))?;
    Ok(VaultSignature {
        key_version,
        signature_base64: sig_b64.to_string(),
    })
}

fn transit_path(mount: &str, suffix: &str) -> String {
    let mount = mount.trim_matches('/');
    format!("/v1/{mount}/{suffix}")
}

/// Latest version of `key_name`.
///
/// # Errors
/// Returns an error if the Vault request fails or the version is missing.
#[instrument(skip(client, vault_token))]
pub async fn latest_key_version(
    client: &Client,
    vault_url: &str,
    vault_token: &SecretString,
    transit_mount: &str,
    key_name: &str,
) -> Result<u32> {
    let key_url = vault::endpoint_url(
        vault_url,
        &transit_path(transit_mount, &format!("keys/{key_name}")),
    )?;

    let response = client
        .get(&key_url)
        .header("X-Vault-Token", vault_token.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let json_response: Value = response.json().await?;
        let error_message = vault::vault_error_message(&json_response);
        error!("Failed to read transit key: {error_message}");
        return Err(anyhow!("{key_url} - {status}, {error_message}"));
    }

    let json_response: Value = response.json().await?;
    json_response
        .get("data")
        .and_then(|v| v.get("latest_version"))
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| anyhow!("missing latest_version in transit key response"))
}

/// Sign `input` with `key_name`, pinned to `key_version` when given.
///
/// # Errors
/// Returns an error if the Vault request fails or the signature is missing/invalid.
#[instrument(skip(client, vault_token, input))]
pub async fn sign(
    client: &Client,
    vault_url: &str,
    vault_token: &SecretString,
    transit_mount: &str,
    key_name: &str,
    key_version: Option<u32>,
    input: &[u8],
) -> Result<VaultSignature> {
    let sign_url = vault::endpoint_url(
        vault_url,
        &transit_path(transit_mount, &format!("sign/{key_name}/{HASH_ALGORITHM}")),
    )?;

    let mut payload = json!({
        "input": Base64::encode_string(input),
        "signature_algorithm": SIGNATURE_ALGORITHM,
    });
    if let Some(version) = key_version {
        payload["key_version"] = json!(version);
    }

    let response = client
        .post(&sign_url)
        .header("X-Vault-Token", vault_token.expose_secret())
        .json(&payload)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let json_response: Value = response.json().await?;
        let error_message = vault::vault_error_message(&json_response);
        error!("Failed to sign via transit: {error_message}");
        return Err(anyhow!("{sign_url} - {status}, {error_message}"));
    }

    let json_response: Value = response.json().await?;
    let signature = get_required_str(&json_response, &["data", "signature"]).ok_or_else(|| {
        error!("Missing signature in transit response");
        anyhow!("missing signature in transit response")
    })?;

    parse_signature(signature)
}

/// Ask Vault whether `signature` over `input` was produced by `key_name`.
///
/// # Errors
/// Returns an error if the Vault request fails or the response has no `valid` field.
#[instrument(skip(client, vault_token, input, signature))]
pub async fn verify(
    client: &Client,
    vault_url: &str,
    vault_token: &SecretString,
    transit_mount: &str,
    key_name: &str,
    input: &[u8],
    signature: &VaultSignature,
) -> Result<bool> {
    let verify_url = vault::endpoint_url(
        vault_url,
        &transit_path(transit_mount, &format!("verify/{key_name}/{HASH_ALGORITHM}")),
    )?;

    let payload = json!({
        "input": Base64::encode_string(input),
        "signature": signature.to_vault_string(),
        "signature_algorithm": SIGNATURE_ALGORITHM,
    });

    let response = client
        .post(&verify_url)
        .header("X-Vault-Token", vault_token.expose_secret())
        .json(&payload)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let json_response: Value = response.json().await?;
        let error_message = vault::vault_error_message(&json_response);
        error!("Failed to verify via transit: {error_message}");
        return Err(anyhow!("{verify_url} - {status}, {error_message}"));
    }

    let json_response: Value = response.json().await?;
    json_response
        .get("data")
        .and_then(|v| v.get("valid"))
        .and_then(Value::as_bool)
        .ok_or_else(|| anyhow!("missing valid flag in transit response"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parse_signature_extracts_version() -> Result<()> {
        let parsed = parse_signature("vault:v3:c2ln")?;
        assert_eq!(parsed.key_version, 3);
        assert_eq!(parsed.signature_base64, "c2ln");
        assert_eq!(parsed.to_bytes()?, b"sig");
        assert_eq!(parsed.to_vault_string(), "vault:v3:c2ln");

        assert!(parse_signature("other:v1:c2ln").is_err());
        assert!(parse_signature("vault:1:c2ln").is_err());
        assert!(parse_signature("vault:v1").is_err());
        assert!(parse_signature("vault:v1:a:b").is_err());
        Ok(())
    }

    #[test]
    fn transit_path_trims_slashes() {
        assert_eq!(
            transit_path("/transit/sesame/", "sign/session/sha2-256"),
            "/v1/transit/sesame/sign/session/sha2-256"
        );
    }

    #[tokio::test]
    async fn sign_and_verify_call_transit() -> Result<()> {
        let server = MockServer::start().await;
        let token = SecretString::from("vault-token".to_string());
        let client = Client::new();

        Mock::given(method("POST"))
            .and(path("/v1/transit/sesame/sign/session/sha2-256"))
            .and(header("X-Vault-Token", "vault-token"))
            .and(body_json(json!({
                "input": "aGVsbG8=",
                "signature_algorithm": "pkcs1v15"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "signature": "vault:v2:c2ln" }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/transit/sesame/verify/session/sha2-256"))
            .and(body_json(json!({
                "input": "aGVsbG8=",
                "signature": "vault:v2:c2ln",
                "signature_algorithm": "pkcs1v15"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "valid": true }
            })))
            .mount(&server)
            .await;

        let signature = sign(
            &client,
            &server.uri(),
            &token,
            "transit/sesame",
            "session",
            None,
            b"hello",
        )
        .await?;
        assert_eq!(signature.key_version, 2);

        let valid = verify(
            &client,
            &server.uri(),
            &token,
            "transit/sesame",
            "session",
            b"hello",
            &signature,
        )
        .await?;
        assert!(valid);
        Ok(())
    }

    #[tokio::test]
    async fn latest_key_version_reads_key_metadata() -> Result<()> {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/transit/sesame/keys/session"))
            .and(header("X-Vault-Token", "vault-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "latest_version": 3, "type": "rsa-2048" }
            })))
            .mount(&server)
            .await;

        let version = latest_key_version(
            &Client::new(),
            &server.uri(),
            &SecretString::from("vault-token".to_string()),
            "transit/sesame",
            "session",
        )
        .await?;
        assert_eq!(version, 3);
        Ok(())
    }

    #[tokio::test]
    async fn sign_surfaces_vault_errors() -> Result<()> {
        let server = MockServer::start().await;
        let token = SecretString::from("vault-token".to_string());

        Mock::given(method("POST"))
            .and(path("/v1/transit/sesame/sign/session/sha2-256"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "errors": ["permission denied"]
            })))
            .mount(&server)
            .await;

        let result = sign(
            &Client::new(),
            &server.uri(),
            &token,
            "transit/sesame",
            "session",
            Some(1),
            b"hello",
        )
        .await;
        assert!(result.is_err());
        Ok(())
    }
}
