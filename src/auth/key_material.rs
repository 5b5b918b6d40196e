//! SP signing key pair and certificate.
//!
//! Key material is loaded once at provider startup. When `create_certs` is set
//! and no certificate exists yet, a self-signed RSA certificate is generated and
//! written next to its key before loading.

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::Path,
};

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::Utc;
use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    pkey::{Id, PKey, Private},
    rsa::Rsa,
    x509::{X509, X509Builder, X509NameBuilder},
};

use super::SsoError;
use crate::config::SamlProviderConfig;

const RSA_KEY_BITS: u32 = 2048;
const VALIDITY_BACKDATE_SECS: i64 = 60 * 60;
const VALIDITY_DAYS: i64 = 365;

/// RSA private key and the X.509 certificate wrapping its public half.
#[derive(Clone)]
pub struct KeyMaterial {
    certificate: X509,
    private_key: PKey<Private>,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial").finish_non_exhaustive()
    }
}

impl KeyMaterial {
    /// Parse PEM-encoded certificate and private key (PKCS#8 or PKCS#1).
    ///
    /// Rejects non-RSA keys and keys that do not match the certificate.
    pub fn from_pem(certificate_pem: &[u8], private_key_pem: &[u8]) -> Result<Self, SsoError> {
        let certificate = X509::from_pem(certificate_pem)
            .map_err(|e| SsoError::KeyMaterial(format!("Failed to parse certificate: {}", e)))?;
        let private_key = PKey::private_key_from_pem(private_key_pem)
            .map_err(|e| SsoError::KeyMaterial(format!("Failed to parse private key: {}", e)))?;

        if private_key.id() != Id::RSA {
            return Err(SsoError::KeyMaterial(format!(
                "Unsupported private key type {:?}, expected RSA",
                private_key.id()
            )));
        }

        let public_key = certificate.public_key().map_err(|e| {
            SsoError::KeyMaterial(format!("Failed to read certificate public key: {}", e))
        })?;
        if !public_key.public_eq(&private_key) {
            return Err(SsoError::KeyMaterial(
                "Private key does not match certificate".to_string(),
            ));
        }

        Ok(Self {
            certificate,
            private_key,
        })
    }

    /// Generate a fresh RSA-2048 key pair and a self-signed certificate valid
    /// from one hour ago until 365 days from now.
    pub fn generate(common_name: &str) -> Result<Self, SsoError> {
        let err = |e: openssl::error::ErrorStack| {
            SsoError::KeyMaterial(format!("Failed to generate certificate: {}", e))
        };

        let rsa = Rsa::generate(RSA_KEY_BITS).map_err(err)?;
        let private_key = PKey::from_rsa(rsa).map_err(err)?;

        let mut name = X509NameBuilder::new().map_err(err)?;
        name.append_entry_by_text("CN", common_name).map_err(err)?;
        let name = name.build();

        let mut serial = BigNum::new().map_err(err)?;
        serial.rand(127, MsbOption::MAYBE_ZERO, false).map_err(err)?;

        let now = Utc::now().timestamp();
        let not_before = Asn1Time::from_unix(now - VALIDITY_BACKDATE_SECS).map_err(err)?;
        let not_after = Asn1Time::from_unix(now + VALIDITY_DAYS * 24 * 60 * 60).map_err(err)?;

        let mut builder = X509Builder::new().map_err(err)?;
        builder.set_version(2).map_err(err)?;
        builder
            .set_serial_number(&serial.to_asn1_integer().map_err(err)?)
            .map_err(err)?;
        builder.set_subject_name(&name).map_err(err)?;
        builder.set_issuer_name(&name).map_err(err)?;
        builder.set_pubkey(&private_key).map_err(err)?;
        builder.set_not_before(&not_before).map_err(err)?;
        builder.set_not_after(&not_after).map_err(err)?;
        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(err)?;

        Ok(Self {
            certificate: builder.build(),
            private_key,
        })
    }

    pub fn certificate(&self) -> &X509 {
        &self.certificate
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.private_key
    }

    pub fn certificate_pem(&self) -> Result<String, SsoError> {
        let pem = self
            .certificate
            .to_pem()
            .map_err(|e| SsoError::KeyMaterial(format!("Failed to encode certificate: {}", e)))?;
        String::from_utf8(pem).map_err(|e| SsoError::KeyMaterial(e.to_string()))
    }

    /// Base64 DER of the certificate, as carried in `ds:X509Certificate`.
    pub fn certificate_base64(&self) -> Result<String, SsoError> {
        let der = self
            .certificate
            .to_der()
            .map_err(|e| SsoError::KeyMaterial(format!("Failed to encode certificate: {}", e)))?;
        Ok(STANDARD.encode(der))
    }

    fn private_key_pem(&self) -> Result<Vec<u8>, SsoError> {
        self.private_key
            .private_key_to_pem_pkcs8()
            .map_err(|e| SsoError::KeyMaterial(format!("Failed to encode private key: {}", e)))
    }
}

/// Load the SP key material named by the config, generating it first if
/// `create_certs` is set and no certificate exists yet.
pub fn ensure_key_material(config: &SamlProviderConfig) -> Result<KeyMaterial, SsoError> {
    let (Some(cert_path), Some(key_path)) = (&config.certificate_path, &config.private_key_path)
    else {
        return Err(SsoError::KeyMaterial(
            "certificate_path and private_key_path must both be configured".to_string(),
        ));
    };

    if config.create_certs && !cert_path.exists() {
        let common_name = url::Url::parse(&config.root_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "portcullis".to_string());

        let generated = KeyMaterial::generate(&common_name)?;
        let cert_pem = generated.certificate_pem()?;
        // Key first: a leftover key without a certificate blocks generation
        // instead of being silently replaced.
        write_new_file(key_path, &generated.private_key_pem()?, true).inspect_err(|_| {
            if key_path.exists() {
                tracing::error!(
                    private_key = %key_path.display(),
                    certificate = %cert_path.display(),
                    "Private key exists without a certificate; remove it or provide the \
                     matching certificate"
                );
            }
        })?;
        if let Err(e) = write_new_file(cert_path, cert_pem.as_bytes(), false) {
            // Leave nothing behind that would block the next attempt.
            if let Err(remove_err) = fs::remove_file(key_path) {
                tracing::error!(
                    private_key = %key_path.display(),
                    error = %remove_err,
                    "Failed to remove generated private key after certificate write failed"
                );
            }
            return Err(e);
        }

        tracing::info!(
            certificate = %cert_path.display(),
            private_key = %key_path.display(),
            common_name,
            "Generated self-signed SAML certificate"
        );
    }

    let certificate_pem = read_file(cert_path)?;
    let private_key_pem = read_file(key_path)?;
    KeyMaterial::from_pem(&certificate_pem, &private_key_pem)
}

fn read_file(path: &Path) -> Result<Vec<u8>, SsoError> {
    fs::read(path)
        .map_err(|e| SsoError::KeyMaterial(format!("Failed to read {}: {}", path.display(), e)))
}

fn write_new_file(path: &Path, contents: &[u8], secret: bool) -> Result<(), SsoError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    if secret {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = secret;

    let mut file = options.open(path).map_err(|e| {
        SsoError::KeyMaterial(format!("Failed to create {}: {}", path.display(), e))
    })?;
    file.write_all(contents)
        .map_err(|e| SsoError::KeyMaterial(format!("Failed to write {}: {}", path.display(), e)))
}
