//! Remote and local signers for session tokens.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use reqwest::Client;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use secrecy::SecretString;
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::vault::transit::{self, VaultSignature};

/// RSA/SHA-256 (PKCS#1 v1.5) signer identified by a key reference.
///
/// The key version is chosen before signing so it can be embedded in the
/// signed header.
#[async_trait]
pub trait TokenSigner: Send + Sync {
    /// Key reference placed in the token `kid` as `<key_name>:v<N>`.
    fn key_name(&self) -> &str;

    async fn current_key_version(&self) -> Result<u32>;

    async fn sign(&self, input: &[u8], key_version: u32) -> Result<Vec<u8>>;

    async fn verify(&self, input: &[u8], key_version: u32, signature: &[u8]) -> Result<bool>;
}

/// Signs through the Vault transit engine; key material stays in Vault.
pub struct VaultTransitSigner {
    client: Client,
    vault_url: String,
    vault_token: SecretString,
    transit_mount: String,
    key_name: String,
}

impl VaultTransitSigner {
    #[must_use]
    pub fn new(
        client: Client,
        vault_url: String,
        vault_token: SecretString,
        transit_mount: String,
        key_name: String,
    ) -> Self {
        Self {
            client,
            vault_url,
            vault_token,
            transit_mount,
            key_name,
        }
    }
}

#[async_trait]
impl TokenSigner for VaultTransitSigner {
    fn key_name(&self) -> &str {
        &self.key_name
    }

    async fn current_key_version(&self) -> Result<u32> {
        transit::latest_key_version(
            &self.client,
            &self.vault_url,
            &self.vault_token,
            &self.transit_mount,
            &self.key_name,
        )
        .await
    }

    #[instrument(skip(self, input), fields(key = %self.key_name))]
    async fn sign(&self, input: &[u8], key_version: u32) -> Result<Vec<u8>> {
        let signature = transit::sign(
            &self.client,
            &self.vault_url,
            &self.vault_token,
            &self.transit_mount,
            &self.key_name,
            Some(key_version),
            input,
        )
        .await?;

        if signature.key_version != key_version {
            return Err(anyhow!(
                "transit signed with v{} instead of v{key_version}",
                signature.key_version
            ));
        }
        signature.to_bytes()
    }

    #[instrument(skip(self, input, signature), fields(key = %self.key_name))]
    async fn verify(&self, input: &[u8], key_version: u32, signature: &[u8]) -> Result<bool> {
        let signature = VaultSignature {
            key_version,
            signature_base64: Base64::encode_string(signature),
        };

        transit::verify(
            &self.client,
            &self.vault_url,
            &self.vault_token,
            &self.transit_mount,
            &self.key_name,
            input,
            &signature,
        )
        .await
    }
}

/// In-process RSA key, for the `local` profile and tests. Always version 1.
pub struct LocalRsaSigner {
    key_name: String,
    signing_key: SigningKey<Sha256>,
    verifying_key: VerifyingKey<Sha256>,
}

const LOCAL_KEY_VERSION: u32 = 1;

impl LocalRsaSigner {
    #[must_use]
    pub fn new(key_name: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        let verifying_key = VerifyingKey::<Sha256>::new(private_key.to_public_key());
        let signing_key = SigningKey::<Sha256>::new(private_key);
        Self {
            key_name: key_name.into(),
            signing_key,
            verifying_key,
        }
    }
}

#[async_trait]
impl TokenSigner for LocalRsaSigner {
    fn key_name(&self) -> &str {
        &self.key_name
    }

    async fn current_key_version(&self) -> Result<u32> {
        Ok(LOCAL_KEY_VERSION)
    }

    async fn sign(&self, input: &[u8], key_version: u32) -> Result<Vec<u8>> {
        if key_version != LOCAL_KEY_VERSION {
            return Err(anyhow!("unknown local key version: {key_version}"));
        }
        let signature: Signature = self.signing_key.sign(input);
        Ok(signature.to_vec())
    }

    async fn verify(&self, input: &[u8], key_version: u32, signature: &[u8]) -> Result<bool> {
        if key_version != LOCAL_KEY_VERSION {
            debug!(key_version, "unknown local key version");
            return Ok(false);
        }
        let signature =
            Signature::try_from(signature).map_err(|_| anyhow!("invalid signature encoding"))?;
        Ok(self.verifying_key.verify(input, &signature).is_ok())
    }
}
