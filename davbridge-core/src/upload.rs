use std::io;
use std::path::Path;

use log::{debug, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use crate::client::{DavClient, DavError};

/// Files at or below this size go up as a single PUT.
pub const DEFAULT_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Read buffer for the streaming variant; peak memory is bounded by one
/// chunk plus this buffer.
const STREAM_READ_BUF: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("dav error: {0}")]
    Dav(#[from] DavError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One in-flight chunked upload. Chunks are named `{start}-{end}` with both
/// offsets zero-padded so the server's name-ordered assembly matches byte
/// order.
struct UploadSession {
    id: String,
    bytes_sent: u64,
    chunk_count: u32,
}

/// Accumulates source bytes for the streaming variant. The session is
/// created lazily on the first flush; sources smaller than one chunk never
/// pay the session cost.
struct StreamState {
    buffer: Vec<u8>,
    session: Option<UploadSession>,
}

pub struct Uploader {
    client: DavClient,
    chunk_size: u64,
}

impl Uploader {
    pub fn new(client: DavClient) -> Self {
        Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Upload a local file, choosing simple or chunked strategy by size.
    /// A file of exactly `chunk_size` bytes still takes the simple path.
    pub async fn upload_file(&self, local: &Path, remote: &str) -> Result<(), UploadError> {
        let size = tokio::fs::metadata(local).await?.len();
        if size <= self.chunk_size {
            let data = tokio::fs::read(local).await?;
            self.client.put(remote, data).await?;
            return Ok(());
        }

        let mut file = tokio::fs::File::open(local).await?;
        let mut session = self.start_session().await?;
        match self.send_file_chunks(&mut file, &mut session, remote).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.teardown(&session).await;
                Err(err)
            }
        }
    }

    /// Upload from an arbitrary byte stream with bounded memory. Full chunks
    /// are flushed as soon as the buffer holds them; a flush failure is a
    /// terminal state that stops all further reads.
    pub async fn upload_stream<R>(&self, mut reader: R, remote: &str) -> Result<(), UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut state = StreamState {
            buffer: Vec::new(),
            session: None,
        };
        match self.drive_stream(&mut reader, &mut state, remote).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some(session) = state.session.as_ref() {
                    self.teardown(session).await;
                }
                Err(err)
            }
        }
    }

    async fn send_file_chunks(
        &self,
        file: &mut tokio::fs::File,
        session: &mut UploadSession,
        remote: &str,
    ) -> Result<(), UploadError> {
        let mut buf = vec![0u8; self.chunk_size as usize];
        loop {
            let filled = read_full(file, &mut buf).await?;
            if filled == 0 {
                break;
            }
            self.flush_chunk(session, buf[..filled].to_vec()).await?;
            if (filled as u64) < self.chunk_size {
                break;
            }
        }
        self.assemble(session, remote).await?;
        Ok(())
    }

    async fn drive_stream<R>(
        &self,
        reader: &mut R,
        state: &mut StreamState,
        remote: &str,
    ) -> Result<(), UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let mut read_buf = vec![0u8; STREAM_READ_BUF];
        loop {
            let n = reader.read(&mut read_buf).await?;
            if n == 0 {
                break;
            }
            state.buffer.extend_from_slice(&read_buf[..n]);

            // Flush every full chunk before accepting more source bytes.
            while state.buffer.len() as u64 >= self.chunk_size {
                let rest = state.buffer.split_off(self.chunk_size as usize);
                let chunk = std::mem::replace(&mut state.buffer, rest);
                if state.session.is_none() {
                    state.session = Some(self.start_session().await?);
                }
                if let Some(session) = state.session.as_mut() {
                    self.flush_chunk(session, chunk).await?;
                }
            }
        }

        let remainder = std::mem::take(&mut state.buffer);
        match state.session.as_mut() {
            Some(session) => {
                if !remainder.is_empty() {
                    self.flush_chunk(session, remainder).await?;
                }
                self.assemble(session, remote).await?;
            }
            // No full chunk was ever buffered: one simple upload.
            None => self.client.put(remote, remainder).await?,
        }
        Ok(())
    }

    async fn start_session(&self) -> Result<UploadSession, DavError> {
        let id = Uuid::new_v4().to_string();
        let url = self.client.uploads_url(&id, None)?;
        self.client.mkcol_absolute(url, &id).await?;
        debug!("upload session {id} created");
        Ok(UploadSession {
            id,
            bytes_sent: 0,
            chunk_count: 0,
        })
    }

    async fn flush_chunk(
        &self,
        session: &mut UploadSession,
        data: Vec<u8>,
    ) -> Result<(), DavError> {
        let start = session.bytes_sent;
        let end = start + data.len() as u64;
        let name = format!("{start:015}-{end:015}");
        let url = self.client.uploads_url(&session.id, Some(&name))?;
        self.client.put_absolute(url, data, &name).await?;
        session.bytes_sent = end;
        session.chunk_count += 1;
        debug!(
            "upload session {}: chunk {} sent ({start}-{end})",
            session.id, session.chunk_count
        );
        Ok(())
    }

    /// Server-side assembly: MOVE the session's virtual `.file` resource to
    /// the final destination.
    async fn assemble(&self, session: &UploadSession, remote: &str) -> Result<(), DavError> {
        let src = self.client.uploads_url(&session.id, Some(".file"))?;
        let dest = self.client.files_url(remote, false)?;
        self.client.move_absolute(src, dest, remote).await
    }

    /// Best-effort removal of the session collection. Its own failure is not
    /// surfaced; the original upload error is what the caller sees.
    async fn teardown(&self, session: &UploadSession) {
        let Ok(url) = self.client.uploads_url(&session.id, None) else {
            return;
        };
        if let Err(err) = self.client.delete_absolute(url, &session.id).await {
            warn!("upload session {} cleanup failed: {err}", session.id);
        }
    }
}

/// Fill `buf` as far as the reader allows; short only at end of stream.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
