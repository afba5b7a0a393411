//! Chunked upload of the deploy archive over the protocol connection.
//!
//! The archive is read as a finite sequence of fixed-size buffers. Each
//! buffer becomes one `deploy` message with the next sequence number and
//! `last: false`; a single terminal message follows with `last: true`, an
//! empty payload and the project config. Ordering rides on the connection,
//! so there is no acknowledgement or reordering.

use std::io::{self, SeekFrom};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::error::CliError;
use crate::project::ConfigFile;
use crate::protocol::message::DeployChunk;
use crate::protocol::{Outbound, Outbox, Status};

pub const CHUNK_SIZE: usize = 64 * 1024;

/// Lazy, restartable sequence of archive buffers.
pub struct ChunkReader {
    file: tokio::fs::File,
    total: u64,
    buf: Vec<u8>,
}

impl ChunkReader {
    pub async fn open(path: &Path, chunk_size: usize) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let total = file.metadata().await?.len();
        Ok(Self {
            file,
            total,
            buf: vec![0u8; chunk_size.max(1)],
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Next full buffer (shorter only at the end); `None` once exhausted.
    pub async fn next_chunk(&mut self) -> io::Result<Option<&[u8]>> {
        let mut filled = 0;
        while filled < self.buf.len() {
            let n = self.file.read(&mut self.buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok((filled > 0).then(|| &self.buf[..filled]))
    }

    /// Rewind to the first buffer.
    pub async fn restart(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub sent: u64,
    pub total: u64,
}

impl Progress {
    /// `floor(sent / total * 100)`; an empty archive counts as complete.
    pub fn percent(&self) -> u64 {
        if self.total == 0 {
            return 100;
        }
        self.sent.min(self.total) * 100 / self.total
    }
}

/// Send the whole archive from the start. Returns the number of data chunks.
pub async fn stream_archive<F>(
    outbox: &Outbox,
    reader: &mut ChunkReader,
    project: &str,
    config: ConfigFile,
    mut on_progress: F,
) -> Result<u64, CliError>
where
    F: FnMut(Progress),
{
    reader.restart().await?;
    let total = reader.total();
    let mut num = 0u64;
    let mut sent = 0u64;

    while let Some(chunk) = reader.next_chunk().await? {
        sent += chunk.len() as u64;
        let data = DeployChunk {
            num,
            project: project.to_string(),
            last: false,
            chunk: BASE64.encode(chunk),
            config: None,
        };
        outbox.send(Status::Info, Outbound::Deploy(data)).await?;
        num += 1;
        on_progress(Progress { sent, total });
    }

    let terminal = DeployChunk {
        num,
        project: project.to_string(),
        last: true,
        chunk: String::new(),
        config: Some(config),
    };
    outbox.send(Status::Info, Outbound::Deploy(terminal)).await?;
    if total == 0 {
        on_progress(Progress { sent, total });
    }
    debug!(chunks = num, bytes = sent, "Upload stream finished");
    Ok(num)
}
