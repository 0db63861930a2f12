//! Configuration propagation.
//!
//! Every new credential produces a [`ConfigUpdate`] that is handed to a
//! [`ConfigSink`]. Delivery is at-least-once: a sink may see the same
//! update again after a restart.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;

use crate::errors::{Error, Result};
use crate::secrets::SecretString;

/// Configuration change derived from a freshly created credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdate {
    JwsSigningKey {
        private_key: SecretString,
    },
    ServerTls {
        certificate: String,
        private_key: SecretString,
        intermediate_chain: Vec<String>,
        root_certificate: String,
    },
}

impl ConfigUpdate {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JwsSigningKey { .. } => "jws-signing-key",
            Self::ServerTls { .. } => "server-tls",
        }
    }

    pub fn private_key(&self) -> &SecretString {
        match self {
            Self::JwsSigningKey { private_key } => private_key,
            Self::ServerTls { private_key, .. } => private_key,
        }
    }
}

#[async_trait]
pub trait ConfigSink: Send + Sync {
    async fn apply(&self, update: ConfigUpdate) -> Result<()>;
}

/// Writes PEM files into a directory.
///
/// - `jws/signing-key.pem`
/// - `tls/server.crt`, `tls/server.key`, `tls/ca-chain.pem`, `tls/root-ca.pem`
///
/// Files are staged beside their target and renamed into place. Private
/// keys are created with mode 0600 on unix.
#[derive(Debug, Clone)]
pub struct FileConfigSink {
    dir: PathBuf,
}

impl FileConfigSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `contents` to a hidden sibling of `path` and return the staged path.
    async fn stage(&self, path: &Path, contents: &[u8], private: bool) -> Result<PathBuf> {
        use tokio::io::AsyncWriteExt;

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("update");
        let staged = path.with_file_name(format!(".{}.tmp", name));

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(if private { 0o600 } else { 0o644 });
        #[cfg(not(unix))]
        let _ = private;

        let mut file = options.open(&staged).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;

        // mode only applies on creation; a leftover staged file keeps its old bits
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if private {
                tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o600))
                    .await?;
            }
        }
        Ok(staged)
    }

    /// Stage every file, then rename them into place. Nothing is replaced
    /// unless all files were staged.
    async fn replace_files(&self, files: &[(PathBuf, &[u8], bool)]) -> Result<()> {
        let mut staged = Vec::with_capacity(files.len());
        for (path, contents, private) in files {
            match self.stage(path, contents, *private).await {
                Ok(tmp) => staged.push((tmp, path)),
                Err(e) => {
                    for (tmp, _) in &staged {
                        let _ = tokio::fs::remove_file(tmp).await;
                    }
                    return Err(e);
                }
            }
        }
        for (tmp, path) in staged {
            tokio::fs::rename(&tmp, path).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigSink for FileConfigSink {
    async fn apply(&self, update: ConfigUpdate) -> Result<()> {
        match &update {
            ConfigUpdate::JwsSigningKey { private_key } => {
                let dir = self.dir.join("jws");
                tokio::fs::create_dir_all(&dir).await?;
                self.replace_files(&[(
                    dir.join("signing-key.pem"),
                    private_key.expose_secret().as_bytes(),
                    true,
                )])
                .await?;
            }
            ConfigUpdate::ServerTls {
                certificate,
                private_key,
                intermediate_chain,
                root_certificate,
            } => {
                let dir = self.dir.join("tls");
                tokio::fs::create_dir_all(&dir).await?;
                let chain = intermediate_chain.concat();
                self.replace_files(&[
                    (dir.join("server.crt"), certificate.as_bytes(), false),
                    (dir.join("server.key"), private_key.expose_secret().as_bytes(), true),
                    (dir.join("ca-chain.pem"), chain.as_bytes(), false),
                    (dir.join("root-ca.pem"), root_certificate.as_bytes(), false),
                ])
                .await?;
            }
        }
        info!(kind = update.kind(), dir = %self.dir.display(), "Wrote configuration update");
        Ok(())
    }
}

/// Forwards updates into an mpsc channel, for embedding and tests.
#[derive(Debug, Clone)]
pub struct ChannelConfigSink {
    tx: mpsc::UnboundedSender<ConfigUpdate>,
}

impl ChannelConfigSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConfigUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ConfigSink for ChannelConfigSink {
    async fn apply(&self, update: ConfigUpdate) -> Result<()> {
        self.tx
            .send(update)
            .map_err(|_| Error::internal("configuration receiver dropped"))
    }
}
