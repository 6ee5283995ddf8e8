//! TLS configuration for PostgreSQL connections.
//!
//! Managed cloud hosts refuse plain TCP, so a server role with no explicit
//! `ssl_mode` switches to `require` when its host matches one of them.

use std::sync::Arc;

use rustls::ClientConfig;
use serde::{Deserialize, Serialize};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{info, warn};

use crate::error::{Result, SyncError};

/// Host suffixes of managed PostgreSQL providers that require TLS.
pub const MANAGED_HOST_SUFFIXES: &[&str] = &[
    "supabase.co",
    "supabase.com",
    "pooler.supabase.com",
    "neon.tech",
    "rds.amazonaws.com",
    "render.com",
    "azure.com",
    "aivencloud.com",
    "railway.app",
];

/// Whether `host` belongs to a managed provider from [`MANAGED_HOST_SUFFIXES`].
pub fn is_managed_host(host: &str) -> bool {
    let host = host.trim().trim_end_matches('.').to_lowercase();
    MANAGED_HOST_SUFFIXES
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
}

/// SSL verification modes, matching PostgreSQL's `sslmode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// No SSL/TLS (plain TCP connection).
    #[default]
    Disable,
    /// Use SSL but don't verify server certificate.
    Require,
    /// Verify server certificate against CA.
    VerifyCa,
    /// Full certificate and hostname verification.
    VerifyFull,
}

impl SslMode {
    /// Effective mode for a host: the explicit setting if any, otherwise
    /// `require` for managed hosts and `disable` for everything else.
    pub fn resolve(explicit: Option<SslMode>, host: &str) -> Self {
        match explicit {
            Some(mode) => mode,
            None if is_managed_host(host) => {
                info!("{} is a managed host, enabling TLS (ssl_mode=require)", host);
                SslMode::Require
            }
            None => SslMode::Disable,
        }
    }

    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

/// Builder for PostgreSQL TLS connectors.
pub struct TlsBuilder {
    ssl_mode: SslMode,
}

impl TlsBuilder {
    pub fn new(ssl_mode: SslMode) -> Self {
        Self { ssl_mode }
    }

    /// Build a connector for deadpool-postgres. `None` when TLS is disabled.
    pub fn build(&self) -> Result<Option<MakeRustlsConnect>> {
        if !self.ssl_mode.requires_tls() {
            return Ok(None);
        }

        let config = self.client_config()?;
        Ok(Some(MakeRustlsConnect::new(config)))
    }

    fn client_config(&self) -> Result<ClientConfig> {
        let builder =
            ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
                .with_safe_default_protocol_versions()
                .map_err(|e| SyncError::Config(format!("TLS setup failed: {}", e)))?;

        let config = match self.ssl_mode {
            SslMode::Disable => {
                return Err(SyncError::Config(
                    "Cannot build TLS config for ssl_mode=disable".into(),
                ));
            }
            SslMode::Require => {
                warn!(
                    "ssl_mode=require enables TLS but does NOT verify the server certificate; \
                     use ssl_mode=verify-full where the CA chain is available"
                );
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyCert))
                    .with_no_client_auth()
            }
            SslMode::VerifyCa | SslMode::VerifyFull => {
                let mut root_store = rustls::RootCertStore::empty();
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                builder
                    .with_root_certificates(root_store)
                    .with_no_client_auth()
            }
        };

        Ok(config)
    }
}

/// Accepts any server certificate; only used for `ssl_mode=require`.
#[derive(Debug)]
struct AcceptAnyCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_from_config_names() {
        let modes: Vec<SslMode> =
            serde_yaml::from_str("[disable, require, verify-ca, verify-full]").unwrap();
        assert_eq!(
            modes,
            vec![
                SslMode::Disable,
                SslMode::Require,
                SslMode::VerifyCa,
                SslMode::VerifyFull
            ]
        );
        assert!(serde_yaml::from_str::<SslMode>("prefer").is_err());
    }

    #[test]
    fn test_managed_host_detection() {
        assert!(is_managed_host("db.abcdefgh.supabase.co"));
        assert!(is_managed_host("aws-0-eu-central-1.pooler.supabase.com"));
        assert!(is_managed_host("ep-cool-name-123.us-east-2.aws.neon.tech"));
        assert!(is_managed_host("mydb.c9akciq32.eu-west-1.rds.amazonaws.com"));
        assert!(is_managed_host("Example.Postgres.Database.Azure.com"));
        assert!(!is_managed_host("localhost"));
        assert!(!is_managed_host("127.0.0.1"));
        assert!(!is_managed_host("notsupabase.co"));
    }

    #[test]
    fn test_resolve_prefers_explicit_mode() {
        assert_eq!(SslMode::resolve(None, "db.x.supabase.co"), SslMode::Require);
        assert_eq!(SslMode::resolve(None, "localhost"), SslMode::Disable);
        assert_eq!(
            SslMode::resolve(Some(SslMode::Disable), "db.x.supabase.co"),
            SslMode::Disable
        );
        assert_eq!(
            SslMode::resolve(Some(SslMode::VerifyFull), "localhost"),
            SslMode::VerifyFull
        );
    }

    #[test]
    fn test_connector_only_when_tls_required() {
        assert!(TlsBuilder::new(SslMode::Disable).build().unwrap().is_none());
        for mode in [SslMode::Require, SslMode::VerifyCa, SslMode::VerifyFull] {
            assert!(TlsBuilder::new(mode).build().unwrap().is_some(), "{:?}", mode);
        }
    }
}
