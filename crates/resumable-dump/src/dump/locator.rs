//! Finds a working `mysqldump` among configured candidate paths

use super::bindump::BinaryDumper;
use crate::config::DumpBinaryConfig;
use crate::database::SourceOrigin;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DumpBinaryLocator {
    candidates: Vec<PathBuf>,
    max_allowed_packet: String,
    spool_dir: Option<PathBuf>,
}

impl DumpBinaryLocator {
    pub fn new(candidates: Vec<PathBuf>, max_allowed_packet: String) -> Self {
        Self {
            candidates,
            max_allowed_packet,
            spool_dir: None,
        }
    }

    /// Locator for the configured candidates, `None` when disabled
    pub fn from_config(config: &DumpBinaryConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.candidates.clone(), config.max_allowed_packet.clone()))
    }

    pub fn with_spool_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    /// First executable candidate that can dump `probe_table`
    pub async fn locate(&self, origin: &SourceOrigin, server_version: &str, probe_table: &str) -> Option<PathBuf> {
        for candidate in &self.candidates {
            if !is_executable(candidate) {
                debug!("Dump binary candidate {} is not executable", candidate.display());
                continue;
            }
            let mut dumper = BinaryDumper::new(
                candidate.clone(),
                origin.clone(),
                server_version.to_string(),
                self.max_allowed_packet.clone(),
            );
            if let Some(dir) = &self.spool_dir {
                dumper = dumper.with_spool_dir(dir.clone());
            }
            if dumper.probe(probe_table).await {
                info!("Using dump binary {}", candidate.display());
                return Some(candidate.clone());
            }
        }
        debug!("No usable dump binary found, dumping in-process");
        None
    }
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}
