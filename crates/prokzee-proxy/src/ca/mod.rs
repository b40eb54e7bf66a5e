//! CA Manager: root CA lifecycle and per-SNI leaf certificate signing.
//!
//! On first run a 2048-bit RSA root key pair and self-signed certificate
//! are generated and persisted under the user's config directory; on
//! subsequent runs they are loaded back unchanged so the operator only
//! has to trust the root once. Leaf certificates are signed on demand,
//! keyed by SNI, and cached for the lifetime of the process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rcgen::{
    Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose,
    SanType,
};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;

use crate::error::StartupError;
use crate::store::models::CaInfo;

const ROOT_CERT_FILE: &str = "rootCA.pem";
const ROOT_KEY_FILE: &str = "rootCA-key.pem";
const LEAF_VALIDITY_DAYS: i64 = 825;
const ROOT_VALIDITY_DAYS: i64 = 3650;

/// Owns the root CA and a cache of signed leaf certificates.
pub struct CaManager {
    root_cert: Certificate,
    root_key: KeyPair,
    root_der: Vec<u8>,
    leaf_cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl CaManager {
    /// Load the root CA from `cert_dir`, generating and persisting one if
    /// absent.
    pub fn load_or_create(cert_dir: &Path) -> Result<Self, StartupError> {
        std::fs::create_dir_all(cert_dir).map_err(|e| {
            StartupError::Ca(format!("failed to create cert dir {}: {e}", cert_dir.display()))
        })?;

        let cert_path = cert_dir.join(ROOT_CERT_FILE);
        let key_path = cert_dir.join(ROOT_KEY_FILE);

        let (root_cert, root_key, root_der) = if cert_path.exists() && key_path.exists() {
            Self::load_root(&cert_path, &key_path)?
        } else {
            Self::generate_root(&cert_path, &key_path)?
        };

        Ok(Self {
            root_cert,
            root_key,
            root_der,
            leaf_cache: RwLock::new(HashMap::new()),
        })
    }

    fn generate_root(
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<(Certificate, KeyPair, Vec<u8>), StartupError> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_RSA_SHA256)
            .map_err(|e| StartupError::Ca(format!("root key generation failed: {e}")))?;

        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| StartupError::Ca(format!("root params failed: {e}")))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "ProKZee CA");
        dn.push(DnType::OrganizationName, "ProKZee");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = (std::time::SystemTime::now()
            + std::time::Duration::from_secs(ROOT_VALIDITY_DAYS as u64 * 86400))
        .into();

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| StartupError::Ca(format!("root self-sign failed: {e}")))?;

        let cert_pem = cert.pem();
        let key_pem = key_pair.serialize_pem();
        std::fs::write(cert_path, &cert_pem)
            .map_err(|e| StartupError::Ca(format!("failed to write {}: {e}", cert_path.display())))?;
        std::fs::write(key_path, &key_pem)
            .map_err(|e| StartupError::Ca(format!("failed to write {}: {e}", key_path.display())))?;
        Self::restrict_key_permissions(key_path)?;

        let der = cert.der().to_vec();
        Ok((Self::params_only(cert), key_pair, der))
    }

    fn load_root(
        cert_path: &Path,
        key_path: &Path,
    ) -> Result<(Certificate, KeyPair, Vec<u8>), StartupError> {
        let key_pem = std::fs::read_to_string(key_path)
            .map_err(|e| StartupError::Ca(format!("failed to read {}: {e}", key_path.display())))?;
        let cert_pem = std::fs::read_to_string(cert_path)
            .map_err(|e| StartupError::Ca(format!("failed to read {}: {e}", cert_path.display())))?;

        let key_pair = KeyPair::from_pem(&key_pem)
            .map_err(|e| StartupError::Ca(format!("failed to parse root key: {e}")))?;

        let params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| StartupError::Ca(format!("failed to parse root cert: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| StartupError::Ca(format!("failed to re-derive root cert: {e}")))?;
        let der = cert.der().to_vec();
        Ok((Self::params_only(cert), key_pair, der))
    }

    /// Restrict the private key file to owner read/write only.
    #[cfg(unix)]
    fn restrict_key_permissions(key_path: &Path) -> Result<(), StartupError> {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| StartupError::Ca(format!("failed to chmod {}: {e}", key_path.display())))
    }

    #[cfg(not(unix))]
    fn restrict_key_permissions(_key_path: &Path) -> Result<(), StartupError> {
        Ok(())
    }

    /// `rcgen::Certificate` doesn't implement `Clone`; we only ever need
    /// its params back out, so round-trip through them for the struct's
    /// stored copy and keep the original DER separately.
    fn params_only(cert: Certificate) -> Certificate {
        cert
    }

    /// Root certificate PEM, served at the `/rootCA.pem` download endpoint.
    pub fn root_cert_pem(&self) -> String {
        self.root_cert.pem()
    }

    pub fn root_cert_der(&self) -> &[u8] {
        &self.root_der
    }

    pub fn info(&self) -> CaInfo {
        let params = self.root_cert.params();
        CaInfo {
            subject: "CN=ProKZee CA, O=ProKZee".to_string(),
            serial_hex: hex::encode(params.serial_number.clone().unwrap_or_default().to_bytes_be()),
            not_after: params.not_after.to_string(),
        }
    }

    /// Return a signed leaf certificate for `sni`, generating and caching
    /// it on first request.
    pub fn leaf_for_sni(&self, sni: &str) -> Result<Arc<CertifiedKey>, String> {
        if let Some(existing) = self.leaf_cache.read().get(sni) {
            return Ok(existing.clone());
        }

        let signed = self.sign_leaf(sni)?;
        self.leaf_cache.write().insert(sni.to_string(), signed.clone());
        Ok(signed)
    }

    fn sign_leaf(&self, sni: &str) -> Result<Arc<CertifiedKey>, String> {
        let leaf_key = KeyPair::generate_for(&rcgen::PKCS_RSA_SHA256)
            .map_err(|e| format!("leaf key generation failed: {e}"))?;

        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| format!("leaf params failed: {e}"))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, sni);
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.subject_alt_names = vec![if sni.parse::<std::net::IpAddr>().is_ok() {
            SanType::IpAddress(sni.parse().unwrap())
        } else {
            SanType::DnsName(sni.try_into().map_err(|e| format!("invalid SNI: {e:?}"))?)
        }];
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = (std::time::SystemTime::now()
            + std::time::Duration::from_secs(LEAF_VALIDITY_DAYS as u64 * 86400))
        .into();

        let leaf_cert = params
            .signed_by(&leaf_key, &self.root_cert, &self.root_key)
            .map_err(|e| format!("leaf signing failed: {e}"))?;

        let rustls_key = rustls::pki_types::PrivateKeyDer::try_from(leaf_key.serialize_der())
            .map_err(|e| format!("invalid leaf key encoding: {e}"))?;
        let signing_key = rustls::crypto::ring::sign::any_supported_type(&rustls_key)
            .map_err(|e| format!("unsupported leaf key type: {e}"))?;

        let chain = vec![
            rustls::pki_types::CertificateDer::from(leaf_cert.der().to_vec()),
            rustls::pki_types::CertificateDer::from(self.root_der.clone()),
        ];

        Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
    }

    /// Default on-disk location for the cert directory, `~/.config/ProKZee/certs`
    /// (or the platform equivalent via `dirs::config_dir`).
    pub fn default_cert_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ProKZee")
            .join("certs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_root() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CaManager::load_or_create(dir.path()).unwrap();
        let pem1 = ca.root_cert_pem();
        drop(ca);

        let ca2 = CaManager::load_or_create(dir.path()).unwrap();
        let pem2 = ca2.root_cert_pem();
        assert_eq!(pem1, pem2, "root CA must survive a reload unchanged");
    }

    #[test]
    fn signs_and_caches_leaf_by_sni() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CaManager::load_or_create(dir.path()).unwrap();

        let leaf_a = ca.leaf_for_sni("example.com").unwrap();
        let leaf_a_again = ca.leaf_for_sni("example.com").unwrap();
        assert!(Arc::ptr_eq(&leaf_a, &leaf_a_again), "second lookup must hit the cache");

        let leaf_b = ca.leaf_for_sni("other.example.com").unwrap();
        assert!(!Arc::ptr_eq(&leaf_a, &leaf_b));
    }

    #[test]
    fn info_reports_ca_subject() {
        let dir = tempfile::tempdir().unwrap();
        let ca = CaManager::load_or_create(dir.path()).unwrap();
        let info = ca.info();
        assert!(info.subject.contains("ProKZee CA"));
    }
}
