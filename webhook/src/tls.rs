//! Serving certificate for the webhook when none is supplied.

use anyhow::Context as _;
use std::path::PathBuf;

/// A self-signed certificate written to a temporary directory.
///
/// The files are removed when this value is dropped, so it must outlive the
/// server.
pub struct SelfSigned {
    _dir: tempfile::TempDir,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub cert_pem: String,
}

impl SelfSigned {
    pub fn generate(extra_sans: &[String]) -> anyhow::Result<SelfSigned> {
        let mut sans = vec!["localhost".to_string(), "127.0.0.1".to_string()];
        sans.extend(extra_sans.iter().cloned());
        let key_pair = rcgen::KeyPair::generate().context("failed to generate key pair")?;
        let mut params =
            rcgen::CertificateParams::new(sans).context("invalid subject alt names")?;
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "capacity-webhook");
        let cert = params
            .self_signed(&key_pair)
            .context("failed to self-sign certificate")?;

        let dir = tempfile::tempdir().context("failed to create temp dir")?;
        let cert_path = dir.path().join("tls.crt");
        let key_path = dir.path().join("tls.key");
        let cert_pem = cert.pem();
        std::fs::write(&cert_path, &cert_pem).context("failed to write certificate")?;
        std::fs::write(&key_path, key_pair.serialize_pem()).context("failed to write key")?;
        Ok(SelfSigned {
            _dir: dir,
            cert_path,
            key_path,
            cert_pem,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_pem_files() {
        let tls = SelfSigned::generate(&["capacity-webhook.kube-system.svc".to_string()]).unwrap();
        let cert = std::fs::read_to_string(&tls.cert_path).unwrap();
        let key = std::fs::read_to_string(&tls.key_path).unwrap();
        assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(key.contains("PRIVATE KEY"));
        assert_eq!(cert, tls.cert_pem);
    }

    #[test]
    fn files_removed_on_drop() {
        let tls = SelfSigned::generate(&[]).unwrap();
        let path = tls.cert_path.clone();
        drop(tls);
        assert!(!path.exists());
    }
}
