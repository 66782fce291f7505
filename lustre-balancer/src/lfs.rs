//! `lfs` command-line client
//!
//! Implements [`FilesystemClient`] by running the Lustre `lfs` tool:
//! - `lfs df -l <mount>` for per-OST free space
//! - `lfs find <mount> --type f --size <spec> --ost <list>` for candidates
//! - `lfs migrate -c <count> -o <list> <file>` to restripe a file

use futures::StreamExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::wrappers::LinesStream;
use tracing::{debug, info, instrument};

use crate::client::{CandidateStream, ClientError, FilesystemClient, Result, TargetSet};
use crate::config::RebalancerConfig;
use crate::size::SizeFilter;

/// Client that shells out to `lfs`
#[derive(Debug, Clone)]
pub struct LfsClient {
    lfs: PathBuf,
    mount_point: PathBuf,
    dry_run: bool,
}

impl LfsClient {
    /// Create a client for `mount_point` using the `lfs` binary at `lfs`
    pub fn new(lfs: impl Into<PathBuf>, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            lfs: lfs.into(),
            mount_point: mount_point.into(),
            dry_run: false,
        }
    }

    /// Create a client from the balancer configuration
    pub fn from_config(config: &RebalancerConfig) -> Self {
        Self::new(&config.lfs_path, &config.mount_point).with_dry_run(config.dry_run)
    }

    /// In dry-run mode migrations are logged, not executed
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn command(&self, args: &[OsString]) -> Command {
        let mut cmd = Command::new(&self.lfs);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[OsString]) -> String {
        let mut text = self.lfs.display().to_string();
        for arg in args {
            text.push(' ');
            text.push_str(&arg.to_string_lossy());
        }
        text
    }

    fn df_args(&self) -> Vec<OsString> {
        vec!["df".into(), "-l".into(), self.mount_point.clone().into()]
    }

    fn find_args(&self, sources: &TargetSet, size: &SizeFilter) -> Vec<OsString> {
        vec![
            "find".into(),
            self.mount_point.clone().into(),
            "--type".into(),
            "f".into(),
            "--size".into(),
            size.as_spec().into(),
            "--ost".into(),
            sources.to_lfs_arg().into(),
        ]
    }

    fn migrate_args(&self, path: &Path, destinations: &TargetSet) -> Vec<OsString> {
        vec![
            "migrate".into(),
            "-c".into(),
            destinations.len().to_string().into(),
            "-o".into(),
            destinations.to_lfs_arg().into(),
            path.as_os_str().to_owned(),
        ]
    }

    /// Run to completion, returning stdout on a zero exit
    async fn output(&self, args: &[OsString]) -> Result<String> {
        let command = self.describe(args);
        let output = self
            .command(args)
            .output()
            .await
            .map_err(|source| ClientError::Launch {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ClientError::ExitStatus {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Exit check for a streaming child, run after its stdout is exhausted
async fn finish(mut child: Child, command: String) -> Option<Result<PathBuf>> {
    match child.wait().await {
        Ok(status) if status.success() => {
            debug!(command = %command, "Listing finished");
            None
        }
        Ok(status) => Some(Err(ClientError::ExitStatus {
            command,
            status,
            stderr: String::new(),
        })),
        Err(e) => Some(Err(ClientError::Io(e))),
    }
}

#[async_trait::async_trait]
impl FilesystemClient for LfsClient {
    #[instrument(skip(self))]
    async fn query_utilization(&self) -> Result<String> {
        self.output(&self.df_args()).await
    }

    #[instrument(skip(self))]
    async fn enumerate_candidates(
        &self,
        sources: &TargetSet,
        size: &SizeFilter,
    ) -> Result<CandidateStream> {
        let args = self.find_args(sources, size);
        let command = self.describe(&args);

        let mut child = self
            .command(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| ClientError::Launch {
                command: command.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| ClientError::Failed {
            command: command.clone(),
            message: "stdout was not captured".to_string(),
        })?;

        info!(command = %command, "Started candidate listing");

        let lines = LinesStream::new(BufReader::new(stdout).lines())
            .map(|line| line.map(PathBuf::from).map_err(ClientError::Io));
        // The child is kept alive by the tail future; dropping the stream
        // early kills it.
        let tail = futures::stream::once(finish(child, command)).filter_map(|r| async move { r });

        Ok(lines.chain(tail).boxed())
    }

    #[instrument(skip(self))]
    async fn relocate(&self, path: &Path, destinations: &TargetSet) -> Result<()> {
        let args = self.migrate_args(path, destinations);
        if self.dry_run {
            info!(command = %self.describe(&args), "Dry run, not migrating");
            return Ok(());
        }
        self.output(&args).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_df_args() {
        let client = LfsClient::new("lfs", "/mnt/lustre");
        assert_eq!(strings(&client.df_args()), ["df", "-l", "/mnt/lustre"]);
    }

    #[test]
    fn test_find_args() {
        let client = LfsClient::new("lfs", "/mnt/lustre");
        let args = client.find_args(
            &TargetSet::new(vec![9, 4]),
            &SizeFilter::parse("+1G").unwrap(),
        );
        assert_eq!(
            strings(&args),
            ["find", "/mnt/lustre", "--type", "f", "--size", "+1G", "--ost", "9,4"]
        );
    }

    #[test]
    fn test_migrate_args() {
        let client = LfsClient::new("/usr/bin/lfs", "/mnt/lustre");
        let args = client.migrate_args(Path::new("/mnt/lustre/x"), &TargetSet::new(vec![1, 2, 3]));
        assert_eq!(
            strings(&args),
            ["migrate", "-c", "3", "-o", "1,2,3", "/mnt/lustre/x"]
        );
        assert_eq!(
            client.describe(&args),
            "/usr/bin/lfs migrate -c 3 -o 1,2,3 /mnt/lustre/x"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let client = LfsClient::new("/nonexistent/lfs-binary", "/mnt/lustre");
        let err = client.query_utilization().await.unwrap_err();
        assert!(matches!(err, ClientError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_never_executes() {
        let client = LfsClient::new("/nonexistent/lfs-binary", "/mnt/lustre").with_dry_run(true);
        client
            .relocate(Path::new("/mnt/lustre/x"), &TargetSet::new(vec![0]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_file_size_from_metadata() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &[0u8; 1234]).unwrap();

        let client = LfsClient::new("lfs", "/");
        assert_eq!(client.file_size(file.path()).await.unwrap(), 1234);
        assert!(client
            .file_size(&file.path().with_extension("missing"))
            .await
            .is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streaming_listing_reports_exit_status() {
        use futures::TryStreamExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-lfs");
        std::fs::write(&script, "#!/bin/sh\necho /mnt/a\necho /mnt/b\nexit 3\n").unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let client = LfsClient::new(&script, "/mnt");
        // A freshly written script can briefly fail with ETXTBSY while other
        // tests fork
        let mut attempts = 0;
        let mut stream = loop {
            match client
                .enumerate_candidates(&TargetSet::new(vec![0]), &SizeFilter::default())
                .await
            {
                Ok(stream) => break stream,
                Err(ClientError::Launch { .. }) if attempts < 5 => {
                    attempts += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                }
                Err(e) => panic!("listing failed to start: {e}"),
            }
        };

        assert_eq!(stream.try_next().await.unwrap(), Some(PathBuf::from("/mnt/a")));
        assert_eq!(stream.try_next().await.unwrap(), Some(PathBuf::from("/mnt/b")));
        assert!(matches!(
            stream.try_next().await,
            Err(ClientError::ExitStatus { .. })
        ));
    }
}
