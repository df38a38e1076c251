//! Throwaway PKI for one control plane run.
//!
//! Every start generates a fresh CA, a serving certificate for the API
//! server, an admin client certificate in `system:masters`, and the
//! service-account signing key. Nothing outlives the run.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use tracing::debug;

use crate::error::SubsystemError;

/// A PEM certificate and its private key.
#[derive(Debug, Clone)]
pub struct CertKeyPair {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
}

/// Certificates and keys for one control plane.
#[derive(Debug, Clone)]
pub struct ClusterCertificates {
    /// Cluster CA; signs both the serving and the client certificate.
    pub ca: CertKeyPair,
    /// API server serving certificate.
    pub serving: CertKeyPair,
    /// Admin client certificate.
    pub admin: CertKeyPair,
    /// Service-account token signing key.
    pub service_account_key_pem: String,
}

/// Where [`ClusterCertificates::write_to`] put each file.
#[derive(Debug, Clone)]
pub struct CertificatePaths {
    /// CA certificate.
    pub ca_cert: PathBuf,
    /// Serving certificate.
    pub serving_cert: PathBuf,
    /// Serving key.
    pub serving_key: PathBuf,
    /// Service-account signing key.
    pub service_account_key: PathBuf,
}

/// Service IP the API server assigns to the `kubernetes` service.
const KUBERNETES_SERVICE_IP: [u8; 4] = [10, 0, 0, 1];

impl ClusterCertificates {
    /// Generate a fresh set of certificates for an API server on `127.0.0.1`.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or signing fails.
    pub fn generate() -> Result<Self, SubsystemError> {
        let ca_key = KeyPair::generate()?;
        let mut ca_params = CertificateParams::default();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params.distinguished_name = name("schedsim-ca", None);
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let serving_key = KeyPair::generate()?;
        let mut serving_params = CertificateParams::default();
        serving_params.distinguished_name = name("kube-apiserver", None);
        serving_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        serving_params.subject_alt_names = vec![
            SanType::DnsName("localhost".try_into()?),
            SanType::DnsName("kubernetes.default.svc".try_into()?),
            SanType::IpAddress(IpAddr::from([127, 0, 0, 1])),
            SanType::IpAddress(IpAddr::from(KUBERNETES_SERVICE_IP)),
        ];
        let serving_cert = serving_params.signed_by(&serving_key, &ca_cert, &ca_key)?;

        let admin_key = KeyPair::generate()?;
        let mut admin_params = CertificateParams::default();
        admin_params.distinguished_name = name("admin", Some("system:masters"));
        admin_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        let admin_cert = admin_params.signed_by(&admin_key, &ca_cert, &ca_key)?;

        let service_account_key = KeyPair::generate()?;

        debug!("Generated control plane certificates");

        Ok(Self {
            ca: CertKeyPair {
                cert_pem: ca_cert.pem(),
                key_pem: ca_key.serialize_pem(),
            },
            serving: CertKeyPair {
                cert_pem: serving_cert.pem(),
                key_pem: serving_key.serialize_pem(),
            },
            admin: CertKeyPair {
                cert_pem: admin_cert.pem(),
                key_pem: admin_key.serialize_pem(),
            },
            service_account_key_pem: service_account_key.serialize_pem(),
        })
    }

    /// Write the files the API server reads into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if any file cannot be written.
    pub async fn write_to(&self, dir: &Path) -> Result<CertificatePaths, SubsystemError> {
        let paths = CertificatePaths {
            ca_cert: dir.join("ca.crt"),
            serving_cert: dir.join("apiserver.crt"),
            serving_key: dir.join("apiserver.key"),
            service_account_key: dir.join("sa.key"),
        };
        tokio::fs::write(&paths.ca_cert, &self.ca.cert_pem).await?;
        tokio::fs::write(&paths.serving_cert, &self.serving.cert_pem).await?;
        tokio::fs::write(&paths.serving_key, &self.serving.key_pem).await?;
        tokio::fs::write(&paths.service_account_key, &self.service_account_key_pem).await?;
        Ok(paths)
    }
}

fn name(common_name: &str, organization: Option<&str>) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    if let Some(org) = organization {
        dn.push(DnType::OrganizationName, org);
    }
    dn.push(DnType::CommonName, common_name);
    dn
}
