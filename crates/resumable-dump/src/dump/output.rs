//! Sequential dump output stream
//!
//! Each resumption opens the artifact once: truncating on the first run,
//! appending afterwards. Gzip output appends one gzip member per open, so
//! readers must use a multi-member decoder (see [`read_to_string`]).

use crate::errors::{DumpError, DumpResult};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

#[cfg(feature = "compression-gzip")]
use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};

enum Sink {
    Plain(BufWriter<File>),
    #[cfg(feature = "compression-gzip")]
    Gzip(GzEncoder<BufWriter<File>>),
}

/// Append-or-create writer for one dump artifact
pub struct DumpOutput {
    path: PathBuf,
    sink: Sink,
    raw_bytes: u64,
}

impl std::fmt::Debug for DumpOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumpOutput")
            .field("path", &self.path)
            .field("raw_bytes", &self.raw_bytes)
            .finish()
    }
}

impl DumpOutput {
    /// Open `path`, appending when `append` is set and truncating otherwise
    pub fn open(path: &Path, compress: bool, append: bool) -> DumpResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| open_failed(path, e))?;
        }
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(path).map_err(|e| open_failed(path, e))?;
        let writer = BufWriter::new(file);

        let sink = if compress {
            #[cfg(feature = "compression-gzip")]
            {
                Sink::Gzip(GzEncoder::new(writer, Compression::default()))
            }
            #[cfg(not(feature = "compression-gzip"))]
            {
                return Err(DumpError::CompressionUnavailable);
            }
        } else {
            Sink::Plain(writer)
        };

        debug!(
            "Opened dump output {} (compress={}, append={})",
            path.display(),
            compress,
            append
        );
        Ok(Self {
            path: path.to_path_buf(),
            sink,
            raw_bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Uncompressed bytes written through this handle
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes
    }

    pub fn write_str(&mut self, text: &str) -> DumpResult<()> {
        self.write_bytes(text.as_bytes())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> DumpResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        match &mut self.sink {
            Sink::Plain(w) => w.write_all(bytes)?,
            #[cfg(feature = "compression-gzip")]
            Sink::Gzip(w) => w.write_all(bytes)?,
        }
        self.raw_bytes += bytes.len() as u64;
        Ok(())
    }

    /// Copy a whole reader into the stream
    pub fn write_from<R: Read>(&mut self, reader: &mut R) -> DumpResult<u64> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.write_bytes(&buf[..n])?;
            total += n as u64;
        }
        Ok(total)
    }

    /// Flush, close the gzip member and sync to disk
    pub fn finish(self) -> DumpResult<u64> {
        let file = match self.sink {
            Sink::Plain(w) => w.into_inner().map_err(|e| e.into_error())?,
            #[cfg(feature = "compression-gzip")]
            Sink::Gzip(w) => w.finish()?.into_inner().map_err(|e| e.into_error())?,
        };
        file.sync_all()?;
        debug!(
            "Closed dump output {} after {} raw bytes",
            self.path.display(),
            self.raw_bytes
        );
        Ok(self.raw_bytes)
    }
}

fn open_failed(path: &Path, e: std::io::Error) -> DumpError {
    DumpError::OpenFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

/// Read a whole artifact back as text, decompressing every gzip member
pub fn read_to_string(path: &Path, compressed: bool) -> DumpResult<String> {
    let mut buf = Vec::new();
    copy_decoded(path, compressed, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Stream an artifact's plain SQL into `writer`
pub fn copy_decoded<W: Write>(path: &Path, compressed: bool, writer: &mut W) -> DumpResult<u64> {
    let file = File::open(path)?;
    if compressed {
        #[cfg(feature = "compression-gzip")]
        {
            let mut decoder = MultiGzDecoder::new(std::io::BufReader::new(file));
            Ok(std::io::copy(&mut decoder, writer)?)
        }
        #[cfg(not(feature = "compression-gzip"))]
        {
            let _ = (file, writer);
            Err(DumpError::CompressionUnavailable)
        }
    } else {
        let mut reader = std::io::BufReader::new(file);
        Ok(std::io::copy(&mut reader, writer)?)
    }
}
