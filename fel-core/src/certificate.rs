//! PKCS#12 signing certificates.
//!
//! A [`Certificate`] keeps the encrypted bundle and its passphrase. The RSA
//! private key is only decrypted inside [`Certificate::unlock`], and the
//! returned guard wipes it when dropped.
use chrono::{DateTime, Utc};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write};
use std::marker::PhantomData;
use std::path::Path;
use thiserror::Error;
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::{Decode, Encode};
use x509_cert::name::Name;
use zeroize::Zeroizing;

const SERIAL_NUMBER_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.5");
const COMMON_NAME_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.4.3");
const SECONDS_PER_DAY: i64 = 86_400;

/// Days before `notAfter` at which a certificate counts as expiring soon.
pub const DEFAULT_EXPIRY_WARNING_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("invalid passphrase for certificate bundle")]
    InvalidPassphrase,
    #[error("corrupt certificate bundle: {0}")]
    CorruptBundle(String),
    #[error("certificate expired on {}", .not_after.format("%Y-%m-%d"))]
    Expired { not_after: DateTime<Utc> },
    #[error("certificate not yet valid until {}", .not_before.format("%Y-%m-%d"))]
    NotYetValid { not_before: DateTime<Utc> },
    #[error("RUC mismatch: certificate belongs to {found:?}, expected {expected}")]
    TaxIdMismatch {
        expected: String,
        found: Option<String>,
    },
    #[error("failed to read certificate bundle: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of [`Certificate::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Expiration summary for operational alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryStatus {
    pub days_remaining: i64,
    pub expired: bool,
    pub expiring_soon: bool,
}

/// A parsed PKCS#12 bundle: one RSA key and the certificate chain that
/// belongs to it.
///
/// # Examples
/// ```rust,no_run
/// use fel_core::certificate::Certificate;
///
/// let bytes = std::fs::read("firma.p12").unwrap();
/// let cert = Certificate::parse_bundle(&bytes, "secret".into()).unwrap();
/// println!("{} expires {}", cert.subject(), cert.not_after());
/// ```
pub struct Certificate {
    bundle: Vec<u8>,
    passphrase: SecretString,
    leaf_der: Vec<u8>,
    chain_len: usize,
    public_key: RsaPublicKey,
    subject: String,
    common_name: Option<String>,
    issuer: String,
    serial_number: String,
    tax_id: Option<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    fingerprint: String,
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial_number", &self.serial_number)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

impl Certificate {
    /// Parse a PKCS#12 bundle.
    ///
    /// # Errors
    /// [`CertificateError::InvalidPassphrase`] when the MAC does not verify,
    /// [`CertificateError::CorruptBundle`] when the DER is malformed, a bag is
    /// missing, the key is not RSA or no certificate matches the key.
    pub fn parse_bundle(bytes: &[u8], passphrase: SecretString) -> Result<Self, CertificateError> {
        let pfx = p12::PFX::parse(bytes)
            .map_err(|e| CertificateError::CorruptBundle(format!("PKCS#12 parse error: {e:?}")))?;
        if !pfx.verify_mac(passphrase.expose_secret()) {
            return Err(CertificateError::InvalidPassphrase);
        }

        let private_key = decrypt_private_key(&pfx, &passphrase)?;
        let public_key = RsaPublicKey::from(&private_key);
        drop(private_key);

        let cert_bags = pfx
            .cert_x509_bags(passphrase.expose_secret())
            .map_err(|e| CertificateError::CorruptBundle(format!("certificate bags: {e:?}")))?;
        if cert_bags.is_empty() {
            return Err(CertificateError::CorruptBundle(
                "bundle has no certificates".into(),
            ));
        }

        let mut leaf = None;
        for der in &cert_bags {
            let cert = x509_cert::Certificate::from_der(der).map_err(|e| {
                CertificateError::CorruptBundle(format!("certificate DER error: {e:?}"))
            })?;
            if leaf.is_none() && certificate_public_key(&cert).as_ref() == Some(&public_key) {
                leaf = Some((cert, der.clone()));
            }
        }
        let Some((leaf, leaf_der)) = leaf else {
            return Err(CertificateError::CorruptBundle(
                "no certificate matches the private key".into(),
            ));
        };

        let tbs = &leaf.tbs_certificate;
        let not_before = to_datetime(tbs.validity.not_before.to_unix_duration())?;
        let not_after = to_datetime(tbs.validity.not_after.to_unix_duration())?;
        let serial_raw = name_attribute(&tbs.subject, SERIAL_NUMBER_OID);

        let certificate = Self {
            subject: tbs.subject.to_string(),
            common_name: name_attribute(&tbs.subject, COMMON_NAME_OID),
            issuer: tbs.issuer.to_string(),
            serial_number: hex(tbs.serial_number.as_bytes()),
            tax_id: serial_raw.as_deref().map(tax_id_from_serial),
            not_before,
            not_after,
            fingerprint: hex(&Sha256::digest(&leaf_der)),
            leaf_der,
            chain_len: cert_bags.len(),
            public_key,
            bundle: bytes.to_vec(),
            passphrase,
        };
        tracing::debug!(
            subject = %certificate.subject,
            fingerprint = %certificate.fingerprint,
            not_after = %certificate.not_after,
            "certificate bundle parsed"
        );
        Ok(certificate)
    }

    /// Read and parse a bundle from disk.
    pub fn load(path: impl AsRef<Path>, passphrase: SecretString) -> Result<Self, CertificateError> {
        let bytes = std::fs::read(path)?;
        Self::parse_bundle(&bytes, passphrase)
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Certificate serial number as lowercase hex.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Owner RUC taken from the subject `serialNumber` attribute.
    pub fn tax_id(&self) -> Option<&str> {
        self.tax_id.as_deref()
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// SHA-256 of the leaf certificate DER, lowercase hex.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Number of certificates carried in the bundle.
    pub fn chain_len(&self) -> usize {
        self.chain_len
    }

    pub(crate) fn leaf_der(&self) -> &[u8] {
        &self.leaf_der
    }

    /// Decrypt the private key for one scoped operation.
    pub(crate) fn unlock(&self) -> Result<UnlockedKey<'_>, CertificateError> {
        let pfx = p12::PFX::parse(&self.bundle)
            .map_err(|e| CertificateError::CorruptBundle(format!("PKCS#12 parse error: {e:?}")))?;
        let key = decrypt_private_key(&pfx, &self.passphrase)?;
        if RsaPublicKey::from(&key) != self.public_key {
            return Err(CertificateError::CorruptBundle(
                "private key no longer matches the certificate".into(),
            ));
        }
        Ok(UnlockedKey {
            key: SigningKey::new(key),
            _certificate: PhantomData,
        })
    }

    pub fn validate(&self, expected_tax_id: Option<&str>) -> CertificateValidation {
        self.validate_at(expected_tax_id, Utc::now())
    }

    /// Check key and time window at `now`, and the owner when
    /// `expected_tax_id` is given.
    pub fn validate_at(
        &self,
        expected_tax_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> CertificateValidation {
        let mut errors = Vec::new();

        if let Err(e) = self.unlock() {
            errors.push(format!("private key unavailable: {e}"));
        }
        if let Err(e) = self.check_validity_at(now) {
            errors.push(e.to_string());
        }
        if let Some(expected) = expected_tax_id {
            if let Err(e) = self.check_tax_id(expected) {
                errors.push(e.to_string());
            }
        }

        CertificateValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Fails unless `not_before <= now <= not_after`.
    pub fn check_validity_at(&self, now: DateTime<Utc>) -> Result<(), CertificateError> {
        if now > self.not_after {
            Err(CertificateError::Expired {
                not_after: self.not_after,
            })
        } else if now < self.not_before {
            Err(CertificateError::NotYetValid {
                not_before: self.not_before,
            })
        } else {
            Ok(())
        }
    }

    /// Exact comparison of the subject RUC with `expected`.
    pub fn check_tax_id(&self, expected: &str) -> Result<(), CertificateError> {
        let expected = expected.trim();
        match self.tax_id() {
            Some(tax_id) if tax_id == expected => Ok(()),
            found => Err(CertificateError::TaxIdMismatch {
                expected: expected.to_string(),
                found: found.map(str::to_string),
            }),
        }
    }

    pub fn days_until_expiration(&self) -> i64 {
        self.days_until_expiration_at(Utc::now())
    }

    /// Whole days until `notAfter`, floored; negative once expired.
    pub fn days_until_expiration_at(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_seconds().div_euclid(SECONDS_PER_DAY)
    }

    pub fn will_expire_soon(&self, threshold_days: i64) -> bool {
        self.will_expire_soon_at(threshold_days, Utc::now())
    }

    pub fn will_expire_soon_at(&self, threshold_days: i64, now: DateTime<Utc>) -> bool {
        self.days_until_expiration_at(now) <= threshold_days
    }

    pub fn expiry_status(&self, threshold_days: i64) -> ExpiryStatus {
        self.expiry_status_at(threshold_days, Utc::now())
    }

    pub fn expiry_status_at(&self, threshold_days: i64, now: DateTime<Utc>) -> ExpiryStatus {
        let status = ExpiryStatus {
            days_remaining: self.days_until_expiration_at(now),
            expired: now > self.not_after,
            expiring_soon: self.will_expire_soon_at(threshold_days, now),
        };
        if status.expiring_soon && !status.expired {
            tracing::warn!(
                days_remaining = status.days_remaining,
                subject = %self.subject,
                "signing certificate expires soon"
            );
        }
        status
    }

    /// RSA PKCS#1 v1.5 SHA-256 check of `signature` over `message`.
    pub(crate) fn verify_signature(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::try_from(signature) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(self.public_key.clone())
            .verify(message, &signature)
            .is_ok()
    }
}

/// Decrypted private key borrowed from its [`Certificate`]. The key material
/// is zeroized when the guard drops.
pub(crate) struct UnlockedKey<'a> {
    key: SigningKey<Sha256>,
    _certificate: PhantomData<&'a Certificate>,
}

impl UnlockedKey<'_> {
    /// RSA PKCS#1 v1.5 signature over SHA-256 of `message`.
    pub(crate) fn sign(&self, message: &[u8]) -> Result<Vec<u8>, rsa::signature::Error> {
        Ok(self.key.try_sign(message)?.to_vec())
    }
}

fn decrypt_private_key(
    pfx: &p12::PFX,
    passphrase: &SecretString,
) -> Result<RsaPrivateKey, CertificateError> {
    let key_bags = pfx
        .key_bags(passphrase.expose_secret())
        .map_err(|e| CertificateError::CorruptBundle(format!("key bags: {e:?}")))?;
    let mut key_bags = key_bags.into_iter().map(Zeroizing::new);
    let Some(der) = key_bags.next() else {
        return Err(CertificateError::CorruptBundle(
            "bundle has no private key".into(),
        ));
    };
    RsaPrivateKey::from_pkcs8_der(&der)
        .map_err(|e| CertificateError::CorruptBundle(format!("private key is not RSA: {e:?}")))
}

fn certificate_public_key(cert: &x509_cert::Certificate) -> Option<RsaPublicKey> {
    let spki = cert.tbs_certificate.subject_public_key_info.to_der().ok()?;
    RsaPublicKey::from_public_key_der(&spki).ok()
}

fn name_attribute(name: &Name, oid: ObjectIdentifier) -> Option<String> {
    name.0
        .iter()
        .flat_map(|rdn| rdn.0.iter())
        .find(|atv| atv.oid == oid)
        .and_then(|atv| std::str::from_utf8(atv.value.value()).ok())
        .map(|value| value.trim().to_string())
}

// "RUC-8-442-445" -> "8-442-445"
fn tax_id_from_serial(serial: &str) -> String {
    let trimmed = serial.trim();
    match trimmed.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("RUC") => trimmed[3..]
            .trim_start_matches(['-', ':', ' '])
            .to_string(),
        _ => trimmed.to_string(),
    }
}

fn to_datetime(duration: std::time::Duration) -> Result<DateTime<Utc>, CertificateError> {
    i64::try_from(duration.as_secs())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| CertificateError::CorruptBundle("validity out of range".into()))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
