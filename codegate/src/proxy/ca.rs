//! The root CA: generated on first run, persisted under the certs dir, and
//! used to sign every leaf. The user installs the root into their trust
//! store, which is the whole point of the explicit-trust model.

use std::path::Path;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use time::{Duration, OffsetDateTime};
use tracing::info;

use super::ProxyError;

/// Leaf validity is short; the in-memory cache TTL is shorter still.
const LEAF_VALIDITY_DAYS: i64 = 7;
const CA_VALIDITY_DAYS: i64 = 3650;

pub struct IssuedLeaf {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

pub struct CertificateAuthority {
    certificate: Certificate,
    cert_pem: String,
}

impl CertificateAuthority {
    /// Loads the CA from disk, generating and persisting a fresh one when
    /// either file is missing.
    pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> Result<Self, ProxyError> {
        if cert_path.exists() && key_path.exists() {
            let cert_pem = std::fs::read_to_string(cert_path)?;
            let key_pem = std::fs::read_to_string(key_path)?;
            let key_pair = KeyPair::from_pem(&key_pem)?;
            let params = CertificateParams::from_ca_cert_pem(&cert_pem, key_pair)?;
            let certificate = Certificate::from_params(params)?;
            info!(path = %cert_path.display(), "loaded existing CA");
            return Ok(Self {
                certificate,
                cert_pem,
            });
        }

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, "CodeGate CA");
        params
            .distinguished_name
            .push(DnType::OrganizationName, "CodeGate");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.not_before = OffsetDateTime::now_utc() - Duration::days(1);
        params.not_after = OffsetDateTime::now_utc() + Duration::days(CA_VALIDITY_DAYS);
        let certificate = Certificate::from_params(params)?;
        let cert_pem = certificate.serialize_pem()?;
        let key_pem = certificate.serialize_private_key_pem();

        if let Some(parent) = cert_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(cert_path, &cert_pem)?;
        std::fs::write(key_path, key_pem)?;
        info!(path = %cert_path.display(), "generated new CA, install it into the client trust store");
        Ok(Self {
            certificate,
            cert_pem,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_der(&self) -> Result<Vec<u8>, ProxyError> {
        Ok(self.certificate.serialize_der()?)
    }

    /// Signs a fresh leaf for one SNI host.
    pub fn issue_leaf(&self, host: &str) -> Result<IssuedLeaf, ProxyError> {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, host);
        params.subject_alt_names = vec![SanType::DnsName(host.to_owned())];
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.not_before = OffsetDateTime::now_utc() - Duration::hours(1);
        params.not_after = OffsetDateTime::now_utc() + Duration::days(LEAF_VALIDITY_DAYS);
        let leaf = Certificate::from_params(params)?;
        Ok(IssuedLeaf {
            cert_der: leaf.serialize_der_with_signer(&self.certificate)?,
            key_der: leaf.serialize_private_key_der(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_persist_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cert_path = dir.path().join("ca.crt");
        let key_path = dir.path().join("ca.key");

        let first = CertificateAuthority::load_or_generate(&cert_path, &key_path).expect("gen");
        assert!(cert_path.exists() && key_path.exists());

        let second = CertificateAuthority::load_or_generate(&cert_path, &key_path).expect("load");
        assert_eq!(first.cert_pem(), second.cert_pem());
    }

    #[test]
    fn issued_leaf_parses_as_der() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ca = CertificateAuthority::load_or_generate(
            &dir.path().join("ca.crt"),
            &dir.path().join("ca.key"),
        )
        .expect("gen");
        let leaf = ca.issue_leaf("api.githubcopilot.com").expect("issue");
        assert!(!leaf.cert_der.is_empty());
        assert!(!leaf.key_der.is_empty());
        // rustls must accept the key material
        let key = rustls::sign::any_supported_type(&rustls::PrivateKey(leaf.key_der))
            .expect("key supported");
        let _ = key;
    }
}
