//! [`VersionControl`] backend that drives the `svn` command-line client.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::parser::{parse_svn_info, parse_svn_log, parse_svn_status, SvnInfo, SvnLogEntry};
use crate::config::SvnConfig;
use crate::errors::VcsError;
use crate::models::{VersionId, VersionInfo};
use crate::vcs::VersionControl;

/// Backend for files inside an SVN working copy.
///
/// Version ids are last-changed revision numbers, so an unrelated commit to
/// another file does not count as a new version of this one.
#[derive(Debug, Clone)]
pub struct SvnBackend {
    binary: String,
    username: Option<String>,
    password: Option<String>,
    email_domain: Option<String>,
}

impl SvnBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            username: None,
            password: None,
            email_domain: None,
        }
    }

    pub fn from_config(config: &SvnConfig) -> Self {
        let backend = Self {
            binary: config.binary.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            email_domain: config.email_domain.clone(),
        };
        info!(binary = %backend.binary, username = ?backend.username, "created SvnBackend");
        backend
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn info(&self, path: &Path) -> Result<SvnInfo, VcsError> {
        let target = peg_safe(path);
        let output = self.run_svn(&["info", "--xml", &target]).await?;
        parse_svn_info(&output)
    }

    async fn run_svn(&self, args: &[&str]) -> Result<String, VcsError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).arg("--non-interactive");
        if let Some(ref username) = self.username {
            cmd.arg("--username").arg(username);
        }
        if let Some(ref password) = self.password {
            cmd.arg("--password").arg(password).arg("--no-auth-cache");
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        debug!(cmd = ?format!("{} {}", self.binary, args.join(" ")), "running svn command");
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VcsError::BinaryNotFound(self.binary.clone())
            } else {
                VcsError::Io(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            debug!(exit_code, %stderr, "svn command failed");
            return Err(VcsError::CommandFailed { exit_code, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl VersionControl for SvnBackend {
    async fn is_under_version_control(&self, path: &Path) -> bool {
        match self.info(path).await {
            Ok(info) => info.kind == "file",
            Err(e) => {
                debug!(path = %path.display(), error = %e, "not an svn-tracked file");
                false
            }
        }
    }

    async fn local_version(&self, path: &Path) -> Result<Option<VersionId>, VcsError> {
        let info = self.info(path).await?;
        Ok(info.commit_revision.map(|rev| VersionId::new(rev.to_string())))
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn latest_version(&self, path: &Path) -> Result<Option<VersionInfo>, VcsError> {
        // Log against the repository URL so the answer reflects HEAD rather
        // than the working copy's revision.
        let info = self.info(path).await?;
        let output = self
            .run_svn(&["log", "--xml", "-l", "1", &info.url])
            .await?;
        let Some(entry) = parse_svn_log(&output)?.into_iter().next() else {
            return Ok(None);
        };
        if entry.revision <= 0 {
            return Ok(None);
        }
        debug!(revision = entry.revision, author = %entry.author, "latest svn revision");
        log_entry_info(entry).map(Some)
    }

    async fn version_info(
        &self,
        path: &Path,
        version: &VersionId,
    ) -> Result<Option<VersionInfo>, VcsError> {
        if version.as_str().parse::<u64>().is_err() {
            return Ok(None);
        }
        let info = self.info(path).await?;
        let target = format!("{}@{}", info.url, version);
        let output = match self
            .run_svn(&["log", "--xml", "-r", version.as_str(), &target])
            .await
        {
            Ok(output) => output,
            Err(VcsError::CommandFailed { ref stderr, .. }) if is_missing_revision(stderr) => {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        parse_svn_log(&output)?
            .into_iter()
            .next()
            .map(log_entry_info)
            .transpose()
    }

    #[instrument(skip(self), fields(path = %path.display(), version = %version))]
    async fn download_at_version(
        &self,
        path: &Path,
        version: &VersionId,
        dest: &Path,
    ) -> Result<(), VcsError> {
        let info = self.info(path).await?;
        let target = format!("{}@{}", info.url, version);
        let output = self.run_svn(&["cat", &target]).await.map_err(|e| match e {
            VcsError::CommandFailed { ref stderr, .. } if is_missing_revision(stderr) => {
                VcsError::VersionNotFound {
                    path: path.to_path_buf(),
                    version: version.to_string(),
                }
            }
            other => other,
        })?;
        tokio::fs::write(dest, output).await?;
        Ok(())
    }

    async fn has_pending_changes(&self, path: &Path) -> Result<bool, VcsError> {
        let target = peg_safe(path);
        let output = self.run_svn(&["status", "--xml", &target]).await?;
        match parse_svn_status(&output)? {
            Some(status) if !status.is_versioned() => {
                Err(VcsError::NotUnderVersionControl(path.to_path_buf()))
            }
            Some(status) => Ok(status.has_local_changes()),
            None => Ok(false),
        }
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn get_latest(&self, path: &Path) -> Result<(), VcsError> {
        let target = peg_safe(path);
        self.run_svn(&["update", &target]).await?;
        info!("svn update completed");
        Ok(())
    }

    async fn owner_email(&self, account: &str) -> Result<Option<String>, VcsError> {
        if account.is_empty() {
            return Ok(None);
        }
        match self.email_domain {
            Some(ref domain) => Ok(Some(format!("{}@{}", account, domain))),
            None => {
                warn!(account, "no email_domain configured, cannot derive owner email");
                Ok(None)
            }
        }
    }
}

fn log_entry_info(entry: SvnLogEntry) -> Result<VersionInfo, VcsError> {
    let created_at = DateTime::parse_from_rfc3339(&entry.date)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| {
            VcsError::XmlParseError(format!("bad date '{}' in svn log: {}", entry.date, e))
        })?;
    Ok(VersionInfo {
        id: VersionId::new(entry.revision.to_string()),
        owner_display_name: entry.author.clone(),
        owner_account: entry.author,
        created_at,
        comment: entry.message,
    })
}

/// E160013: path not found at that revision. E195012: the path at the peg
/// revision is unrelated to the operative one. E160006: no such revision.
fn is_missing_revision(stderr: &str) -> bool {
    ["E160013", "E195012", "E160006"]
        .iter()
        .any(|code| stderr.contains(code))
}

/// svn reads a trailing `@...` as a peg revision; an extra `@` keeps paths
/// that contain one literal.
fn peg_safe(path: &Path) -> String {
    let s = path.to_string_lossy().to_string();
    if s.contains('@') {
        format!("{}@", s)
    } else {
        s
    }
}
