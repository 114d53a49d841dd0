//! Push-message signature verification.
//!
//! The envelope names a certificate URL; the certificate's RSA public key
//! verifies a SHA1- or SHA256-with-RSA signature over the canonical
//! string ([`Envelope::signing_input`]). Certificates are fetched once
//! per URL and cached parsed. The certificate host must satisfy the
//! issuer policy — by default the provider's own notification domains —
//! so a forged envelope cannot point at an attacker-controlled key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rsa::RsaPublicKey;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use tracing::debug;
use url::Url;

use crate::envelope::Envelope;
use crate::error::IngressError;

/// Fetches, caches, and applies signing certificates.
pub struct MessageVerifier {
    http: reqwest::Client,
    /// Extra certificate hosts accepted verbatim (test fixtures, private
    /// deployments).
    extra_hosts: Vec<String>,
    /// Permit plain-HTTP certificate URLs (test fixtures only).
    allow_http: bool,
    cache: Mutex<HashMap<String, Arc<RsaPublicKey>>>,
}

impl MessageVerifier {
    /// A verifier with the default issuer policy.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            extra_hosts: Vec::new(),
            allow_http: false,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Accept certificates from an additional exact host.
    pub fn with_extra_host(mut self, host: impl Into<String>) -> Self {
        self.extra_hosts.push(host.into());
        self
    }

    /// Accept `http://` certificate URLs. Only sensible against local
    /// test fixtures.
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Verify an envelope's signature. Returns an error when the
    /// signature, certificate, or issuer policy fails; the caller must
    /// process nothing from a rejected envelope.
    pub async fn verify(&self, envelope: &Envelope) -> Result<(), IngressError> {
        let signature = envelope
            .signature()
            .ok_or_else(|| IngressError::Signature("missing Signature field".into()))?;
        let cert_url = envelope
            .signing_cert_url()
            .ok_or_else(|| IngressError::Signature("missing SigningCertURL field".into()))?;
        let version = envelope.signature_version();
        if !matches!(version, "1" | "2") {
            return Err(IngressError::Signature(format!(
                "unsupported SignatureVersion {version:?}"
            )));
        }

        let key = self.signing_key(cert_url).await?;
        let signature = BASE64
            .decode(signature)
            .map_err(|e| IngressError::Signature(format!("signature is not base64: {e}")))?;
        let input = envelope.signing_input();

        verify_rsa(&key, envelope.signature_version(), input.as_bytes(), &signature)
    }

    /// Fetch (or recall) the RSA public key behind a certificate URL.
    async fn signing_key(&self, cert_url: &str) -> Result<Arc<RsaPublicKey>, IngressError> {
        self.check_cert_url(cert_url)?;

        if let Some(key) = self
            .cache
            .lock()
            .expect("cert cache lock poisoned")
            .get(cert_url)
        {
            return Ok(Arc::clone(key));
        }

        let pem = self
            .http
            .get(cert_url)
            .send()
            .await
            .map_err(|e| IngressError::Cert(format!("fetch failed: {e}")))?
            .error_for_status()
            .map_err(|e| IngressError::Cert(format!("fetch failed: {e}")))?
            .bytes()
            .await
            .map_err(|e| IngressError::Cert(format!("fetch failed: {e}")))?;

        let key = Arc::new(parse_cert_public_key(&pem)?);
        debug!(url = %cert_url, "cached signing certificate");
        self.cache
            .lock()
            .expect("cert cache lock poisoned")
            .insert(cert_url.to_owned(), Arc::clone(&key));
        Ok(key)
    }

    fn check_cert_url(&self, cert_url: &str) -> Result<(), IngressError> {
        let url = Url::parse(cert_url)
            .map_err(|e| IngressError::CertPolicy(format!("bad URL {cert_url:?}: {e}")))?;
        match url.scheme() {
            "https" => {}
            "http" if self.allow_http => {}
            scheme => {
                return Err(IngressError::CertPolicy(format!(
                    "scheme {scheme:?} not allowed"
                )));
            }
        }
        let host = url
            .host_str()
            .ok_or_else(|| IngressError::CertPolicy("URL has no host".into()))?;
        if default_host_allowed(host) || self.extra_hosts.iter().any(|h| h == host) {
            Ok(())
        } else {
            Err(IngressError::CertPolicy(format!(
                "host {host:?} is not a recognized issuer"
            )))
        }
    }
}

impl Default for MessageVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// The provider's own notification domains: `sns.<region>.amazonaws.com`
/// and the China-partition variant.
fn default_host_allowed(host: &str) -> bool {
    host.starts_with("sns.")
        && (host.ends_with(".amazonaws.com") || host.ends_with(".amazonaws.com.cn"))
}

/// Extract the RSA public key from a PEM-encoded X.509 certificate.
fn parse_cert_public_key(pem: &[u8]) -> Result<RsaPublicKey, IngressError> {
    let (_, parsed) = x509_parser::pem::parse_x509_pem(pem)
        .map_err(|e| IngressError::Cert(format!("not PEM: {e}")))?;
    let cert = parsed
        .parse_x509()
        .map_err(|e| IngressError::Cert(format!("not an X.509 certificate: {e}")))?;
    let spki = cert.tbs_certificate.subject_pki.raw;
    RsaPublicKey::from_public_key_der(spki)
        .map_err(|e| IngressError::Cert(format!("unsupported public key: {e}")))
}

/// Verify a PKCS#1 v1.5 signature under the scheme the envelope declares:
/// version `"1"` is SHA1-with-RSA, `"2"` is SHA256-with-RSA.
fn verify_rsa(
    key: &RsaPublicKey,
    version: &str,
    input: &[u8],
    signature: &[u8],
) -> Result<(), IngressError> {
    let signature = Signature::try_from(signature)
        .map_err(|e| IngressError::Signature(format!("malformed signature: {e}")))?;
    let result = match version {
        "1" => VerifyingKey::<sha1::Sha1>::new(key.clone()).verify(input, &signature),
        "2" => VerifyingKey::<sha2::Sha256>::new(key.clone()).verify(input, &signature),
        other => {
            return Err(IngressError::Signature(format!(
                "unsupported SignatureVersion {other:?}"
            )));
        }
    };
    result.map_err(|_| IngressError::Signature("signature mismatch".into()))
}
