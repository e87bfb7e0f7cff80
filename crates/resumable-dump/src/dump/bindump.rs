//! Per-table export through an external `mysqldump` binary
//!
//! The binary's stdout is spooled to a temporary file with GTID directives
//! removed. The spool is appended to the dump only after the process exits
//! successfully with some output, so a failed run leaves nothing behind and
//! the caller can fall back to the in-process dumper.

use super::output::DumpOutput;
use crate::database::SourceOrigin;
use crate::errors::DumpResult;
use crate::utils::sql::version_at_least;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Output needed to accept a binary during probing
const PROBE_OUTPUT_LIMIT: usize = 100 * 1024;

/// Drops `SET @@GLOBAL.GTID_PURGED` statements, which may span lines
#[derive(Debug, Default)]
pub struct GtidFilter {
    skipping: bool,
}

impl GtidFilter {
    const DIRECTIVE: &'static [u8] = b"SET @@GLOBAL.GTID_PURGED";

    /// Whether `line` should be kept
    pub fn keep(&mut self, line: &[u8]) -> bool {
        if !self.skipping
            && line.len() >= Self::DIRECTIVE.len()
            && line[..Self::DIRECTIVE.len()].eq_ignore_ascii_case(Self::DIRECTIVE)
        {
            self.skipping = true;
        }
        if self.skipping {
            if line.contains(&b';') {
                self.skipping = false;
            }
            return false;
        }
        true
    }
}

/// Runs one located dump binary against the source database
#[derive(Debug, Clone)]
pub struct BinaryDumper {
    binary: PathBuf,
    origin: SourceOrigin,
    server_version: String,
    max_allowed_packet: String,
    spool_dir: Option<PathBuf>,
}

impl BinaryDumper {
    pub fn new<P: Into<PathBuf>>(binary: P, origin: SourceOrigin, server_version: String, max_allowed_packet: String) -> Self {
        Self {
            binary: binary.into(),
            origin,
            server_version,
            max_allowed_packet,
            spool_dir: None,
        }
    }

    /// Directory for the defaults file and output spool (system temp dir otherwise)
    pub fn with_spool_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Command line for dumping `table`, with the password kept in `defaults_file`
    pub fn build_args(&self, defaults_file: &Path, table: &str) -> Vec<String> {
        let mut args = vec![
            format!("--defaults-file={}", defaults_file.display()),
            format!("--max-allowed-packet={}", self.max_allowed_packet),
            "--quote-names".to_string(),
            "--add-drop-table".to_string(),
        ];
        if version_at_least(&self.server_version, "5.1") {
            args.push("--no-tablespaces".to_string());
        }
        args.extend(
            [
                "--skip-comments",
                "--skip-set-charset",
                "--allow-keywords",
                "--dump-date",
                "--extended-insert",
                "--single-transaction",
            ]
            .map(String::from),
        );
        args.push(format!("--user={}", self.origin.user));
        args.push(format!("--host={}", self.origin.host));
        if let Some(port) = self.origin.port {
            args.push(format!("--port={port}"));
        } else if let Some(socket) = &self.origin.socket {
            args.push(format!("--socket={socket}"));
        }
        args.push(self.origin.database.clone());
        args.push(table.to_string());
        args
    }

    /// Dump one table into `out`
    ///
    /// Returns `Ok(false)` when the binary could not produce the table, in
    /// which case nothing was written. Errors are reserved for failures of
    /// the dump stream itself.
    pub async fn dump_table(&self, out: &mut DumpOutput, table: &str) -> DumpResult<bool> {
        let defaults = match self.write_defaults_file() {
            Ok(file) => file,
            Err(e) => {
                warn!("Could not write defaults file for {}: {}", self.binary.display(), e);
                return Ok(false);
            }
        };
        let mut spool = match self.temp_builder(".mysqldump-spool-").tempfile_in(self.spool_root()) {
            Ok(file) => file,
            Err(e) => {
                warn!("Could not create spool file for {}: {}", table, e);
                return Ok(false);
            }
        };

        let args = self.build_args(defaults.path(), table);
        let spooled = match self.run_into(&args, spool.as_file_mut()).await {
            Ok(bytes) => bytes,
            Err(message) => {
                warn!("{} failed for table {}: {}", self.binary.display(), table, message);
                return Ok(false);
            }
        };
        if spooled == 0 {
            warn!("{} produced no output for table {}", self.binary.display(), table);
            return Ok(false);
        }

        let file = spool.as_file_mut();
        file.seek(SeekFrom::Start(0))?;
        out.write_from(file)?;
        debug!("Appended {} bytes of {} output for {}", spooled, self.binary.display(), table);
        Ok(true)
    }

    /// Try dumping a single row of `table` and check the output looks like SQL
    pub async fn probe(&self, table: &str) -> bool {
        let Ok(defaults) = self.write_defaults_file() else {
            return false;
        };
        let mut args = self.build_args(defaults.path(), table);
        let position = args.len() - 2;
        args.insert(position, "--where=1 LIMIT 1".to_string());

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!("Could not run {}: {}", self.binary.display(), e);
                return false;
            }
        };

        let mut output = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let mut limited = stdout.take(PROBE_OUTPUT_LIMIT as u64);
            if limited.read_to_end(&mut output).await.is_err() {
                return false;
            }
        }
        let status = match child.wait().await {
            Ok(status) => status,
            Err(_) => return false,
        };

        let text = String::from_utf8_lossy(&output).to_ascii_lowercase();
        let accepted = status.success() && (text.contains("insert into") || text.contains("create table"));
        debug!(
            "Probe of {} on {}: exit={:?} accepted={}",
            self.binary.display(),
            table,
            status.code(),
            accepted
        );
        accepted
    }

    async fn run_into(&self, args: &[String], spool: &mut std::fs::File) -> Result<u64, String> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|e| format!("could not start: {e}"))?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "stdout was not captured".to_string())?;
        let spool_async = spool.try_clone().map_err(|e| e.to_string())?;
        let mut writer = tokio::fs::File::from_std(spool_async);
        let mut reader = BufReader::new(stdout);
        let mut filter = GtidFilter::default();
        let mut line = Vec::new();
        let mut written = 0u64;

        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .await
                .map_err(|e| format!("reading output: {e}"))?;
            if n == 0 {
                break;
            }
            if filter.keep(&line) {
                writer
                    .write_all(&line)
                    .await
                    .map_err(|e| format!("spooling output: {e}"))?;
                written += n as u64;
            }
        }
        writer.flush().await.map_err(|e| e.to_string())?;

        let status = child.wait().await.map_err(|e| e.to_string())?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        if !status.success() {
            let detail = String::from_utf8_lossy(&stderr);
            return Err(format!("exit status {:?}: {}", status.code(), detail.trim()));
        }
        Ok(written)
    }

    fn write_defaults_file(&self) -> std::io::Result<tempfile::NamedTempFile> {
        let mut file = self.temp_builder(".mysqldump-defaults-").tempfile_in(self.spool_root())?;
        let password = self.origin.password.as_deref().unwrap_or_default();
        let escaped = password.replace('\\', "\\\\").replace('"', "\\\"");
        write!(file, "[mysqldump]\npassword=\"{escaped}\"\n")?;
        file.flush()?;
        Ok(file)
    }

    fn temp_builder(&self, prefix: &'static str) -> tempfile::Builder<'static, 'static> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix).suffix(".tmp");
        builder
    }

    fn spool_root(&self) -> PathBuf {
        self.spool_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
