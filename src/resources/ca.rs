use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{path_exists, run_command, unsupported};
use crate::config::AgentConfig;
use crate::core::facts::FactsProvider;
use crate::core::jobs::{JobAction, JobContext, ResourceKind, ResourceManager};
use crate::error::JobError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SigningRequestInfo {
    pub name: String,
    pub signed: bool,
}

#[derive(Debug, Clone)]
pub struct SigningRequestHandle {
    pub hostname: String,
    pub csr_path: PathBuf,
    pub cert_path: PathBuf,
}

/// The agent's certificate authority. Signing requests live in `ca/out` as
/// `<hostname>.csr`, issued certificates next to them as `<hostname>.crt`.
pub struct SigningRequestManager {
    root: PathBuf,
    out_dir: PathBuf,
    openssl: String,
    certgen_days: u32,
    certgen_size: u32,
    facts: FactsProvider,
}

impl SigningRequestManager {
    pub fn new(config: &AgentConfig, facts: FactsProvider) -> Self {
        Self {
            root: config.ca_dir.clone(),
            out_dir: config.ca_out_dir(),
            openssl: config.openssl_binary.clone(),
            certgen_days: config.certgen_days,
            certgen_size: config.certgen_size,
            facts,
        }
    }

    fn ca_cert(&self) -> PathBuf {
        self.root.join("ca.crt")
    }

    fn ca_key(&self) -> PathBuf {
        self.root.join("ca.key")
    }

    fn ca_serial(&self) -> PathBuf {
        self.root.join("ca.srl")
    }

    fn handle(&self, hostname: &str) -> SigningRequestHandle {
        SigningRequestHandle {
            hostname: hostname.to_string(),
            csr_path: self.out_dir.join(format!("{}.csr", hostname)),
            cert_path: self.out_dir.join(format!("{}.crt", hostname)),
        }
    }

    /// Prepare the CA directory and generate the CA certificate and serial
    /// file if they are missing.
    pub async fn init(&self) -> Result<(), JobError> {
        if !path_exists(&self.root).await {
            tokio::fs::create_dir_all(&self.root).await?;
            tokio::fs::set_permissions(&self.root, std::fs::Permissions::from_mode(0o700)).await?;
        }
        tokio::fs::create_dir_all(&self.out_dir).await?;

        if !path_exists(&self.ca_cert()).await {
            let hostname = self
                .facts
                .hostname()
                .await
                .unwrap_or_else(|| "cast-agent".to_string());
            info!(hostname = %hostname, "Generating CA certificate");

            let days = self.certgen_days.to_string();
            let subject = format!("/CN={}", hostname);
            let newkey = format!("rsa:{}", self.certgen_size);
            let key = self.ca_key();
            let cert = self.ca_cert();
            run_command(
                &self.openssl,
                [
                    OsStr::new("req"),
                    OsStr::new("-batch"),
                    OsStr::new("-x509"),
                    OsStr::new("-nodes"),
                    OsStr::new("-days"),
                    OsStr::new(&days),
                    OsStr::new("-subj"),
                    OsStr::new(&subject),
                    OsStr::new("-sha256"),
                    OsStr::new("-newkey"),
                    OsStr::new(&newkey),
                    OsStr::new("-keyout"),
                    key.as_os_str(),
                    OsStr::new("-out"),
                    cert.as_os_str(),
                ],
            )
            .await?;
        }

        if !path_exists(&self.ca_serial()).await {
            tokio::fs::write(self.ca_serial(), "01\n").await?;
        }
        Ok(())
    }

    pub async fn get(&self, hostname: &str) -> Result<SigningRequestInfo, JobError> {
        let handle = self.handle(hostname);
        if !path_exists(&handle.csr_path).await {
            return Err(JobError::not_found(ResourceKind::SigningRequest, hostname));
        }
        Ok(SigningRequestInfo {
            name: hostname.to_string(),
            signed: path_exists(&handle.cert_path).await,
        })
    }

    pub async fn list(&self) -> Result<Vec<SigningRequestInfo>, JobError> {
        let mut entries = match tokio::fs::read_dir(&self.out_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut requests = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file = entry.file_name().to_string_lossy().into_owned();
            if let Some(hostname) = file.strip_suffix(".csr") {
                requests.push(SigningRequestInfo {
                    name: hostname.to_string(),
                    signed: path_exists(&self.handle(hostname).cert_path).await,
                });
            }
        }
        requests.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(requests)
    }

    async fn create(&self, handle: &SigningRequestHandle, csr: &str, ctx: &JobContext) -> Result<Value, JobError> {
        tokio::fs::create_dir_all(&self.out_dir).await?;
        tokio::fs::write(&handle.csr_path, csr).await?;

        ctx.message("verifying signing request");
        let verified = run_command(
            &self.openssl,
            [
                OsStr::new("req"),
                OsStr::new("-verify"),
                OsStr::new("-noout"),
                OsStr::new("-in"),
                handle.csr_path.as_os_str(),
            ],
        )
        .await;

        if let Err(e) = verified {
            if let Err(remove_err) = tokio::fs::remove_file(&handle.csr_path).await {
                warn!(path = %handle.csr_path.display(), error = %remove_err, "Unable to remove invalid CSR");
            }
            return Err(e);
        }

        info!(hostname = %handle.hostname, "Signing request stored");
        Ok(json!({ "name": handle.hostname, "signed": false }))
    }

    async fn sign(&self, handle: &SigningRequestHandle, overwrite: bool, ctx: &JobContext) -> Result<Value, JobError> {
        if !overwrite && path_exists(&handle.cert_path).await {
            return Err(JobError::failed(format!(
                "Certificate for '{}' already exists",
                handle.hostname
            )));
        }

        let days = self.certgen_days.to_string();
        let cert = self.ca_cert();
        let key = self.ca_key();
        let serial = self.ca_serial();
        ctx.message("signing request");
        run_command(
            &self.openssl,
            [
                OsStr::new("x509"),
                OsStr::new("-req"),
                OsStr::new("-days"),
                OsStr::new(&days),
                OsStr::new("-in"),
                handle.csr_path.as_os_str(),
                OsStr::new("-CA"),
                cert.as_os_str(),
                OsStr::new("-CAkey"),
                key.as_os_str(),
                OsStr::new("-CAserial"),
                serial.as_os_str(),
                OsStr::new("-out"),
                handle.cert_path.as_os_str(),
            ],
        )
        .await?;

        info!(hostname = %handle.hostname, "Signing request signed");
        Ok(json!({
            "name": handle.hostname,
            "signed": path_exists(&handle.cert_path).await,
        }))
    }

    async fn delete(&self, handle: &SigningRequestHandle) -> Result<Value, JobError> {
        tokio::fs::remove_file(&handle.csr_path).await?;
        if path_exists(&handle.cert_path).await {
            tokio::fs::remove_file(&handle.cert_path).await?;
        }

        info!(hostname = %handle.hostname, "Signing request deleted");
        Ok(json!({ "name": handle.hostname }))
    }
}

#[async_trait]
impl ResourceManager for SigningRequestManager {
    type Handle = SigningRequestHandle;

    fn kind(&self) -> ResourceKind {
        ResourceKind::SigningRequest
    }

    async fn resolve(&self, name: &str) -> Result<SigningRequestHandle, JobError> {
        Ok(self.handle(name))
    }

    async fn exists(&self, handle: &SigningRequestHandle) -> bool {
        path_exists(&handle.csr_path).await
    }

    async fn execute(
        &self,
        handle: &SigningRequestHandle,
        action: &JobAction,
        ctx: &JobContext,
    ) -> Result<Value, JobError> {
        match action {
            JobAction::CreateSigningRequest { csr } => self.create(handle, csr, ctx).await,
            JobAction::SignRequest { overwrite } => self.sign(handle, *overwrite, ctx).await,
            JobAction::DeleteSigningRequest => self.delete(handle).await,
            other => Err(unsupported(self.kind(), other)),
        }
    }
}
