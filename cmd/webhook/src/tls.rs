use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use rustls::ServerConfig;
use rustls::pki_types::CertificateDer;
use tokio::sync::mpsc;

// Give the kubelet time to finish swapping the secret volume symlinks.
const RELOAD_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

pub fn load_tls_config(paths: &TlsPaths) -> anyhow::Result<ServerConfig> {
    let cert_file = File::open(&paths.cert)
        .with_context(|| format!("failed to open certificate {}", paths.cert.display()))?;
    let key_file = File::open(&paths.key)
        .with_context(|| format!("failed to open private key {}", paths.key.display()))?;

    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        anyhow::bail!("no certificate found in {}", paths.cert.display());
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", paths.key.display()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

/// Directories to watch. Parents rather than files, so symlink swaps are noticed.
fn watch_dirs(paths: &TlsPaths) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = [paths.cert.parent(), paths.key.parent()]
        .into_iter()
        .flatten()
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                Path::new(".").to_path_buf()
            } else {
                dir.to_path_buf()
            }
        })
        .collect();
    dirs.dedup();
    dirs
}

/// Reload `rustls_config` whenever the certificate or key changes on disk.
pub async fn watch_tls_files(paths: TlsPaths, rustls_config: RustlsConfig) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel(1);

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                // a pending reload already covers this change
                let _ = tx.try_send(());
            }
        }
    })?;
    for dir in watch_dirs(&paths) {
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    }

    while rx.recv().await.is_some() {
        tokio::time::sleep(RELOAD_DELAY).await;

        match load_tls_config(&paths) {
            Ok(new_config) => {
                rustls_config.reload_from_config(Arc::new(new_config));
                tracing::info!("Successfully reloaded TLS certificates");
            }
            Err(e) => {
                tracing::error!("Failed to load new TLS config: {:#}", e);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn test_watch_dirs_dedup() {
        let paths = TlsPaths {
            cert: PathBuf::from("/etc/webhook/certs/tls.crt"),
            key: PathBuf::from("/etc/webhook/certs/tls.key"),
        };
        assert_eq!(watch_dirs(&paths), vec![PathBuf::from("/etc/webhook/certs")]);
    }

    #[test]
    fn test_watch_dirs_distinct() {
        let paths = TlsPaths {
            cert: PathBuf::from("/etc/webhook/cert/tls.crt"),
            key: PathBuf::from("tls.key"),
        };
        assert_eq!(
            watch_dirs(&paths),
            vec![PathBuf::from("/etc/webhook/cert"), PathBuf::from(".")]
        );
    }

    #[test]
    fn test_load_missing_files() {
        let paths = TlsPaths {
            cert: PathBuf::from("/nonexistent/tls.crt"),
            key: PathBuf::from("/nonexistent/tls.key"),
        };
        let error = load_tls_config(&paths).unwrap_err();
        assert!(error.to_string().contains("/nonexistent/tls.crt"));
    }

    #[test]
    fn test_load_without_certificate() {
        let mut cert = tempfile::NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();

        let paths = TlsPaths {
            cert: cert.path().to_path_buf(),
            key: key.path().to_path_buf(),
        };
        let error = load_tls_config(&paths).unwrap_err();
        assert!(error.to_string().contains("no certificate found"));
    }
}
