//! Streaming read handles backed by a per-file worker task.
//!
//! Every [`ReadHandle`] is paired with one background task that owns the open descriptor and
//! the shared path lock. The handle talks to it over a capacity-one request channel and a
//! fresh oneshot reply per request. Handle methods take `&mut self` and wait for their reply,
//! so at most one request is in flight and every response belongs to the request that
//! produced it.
//!
//! # Lifecycle
//!
//! ```text
//! Opening ──(lock held, file opened)──▶ Serving ──(request channel closed)──▶ Closed
//!    └──────────(open failed, error reported once)──────────────────────────────┘
//! ```
//!
//! [`ReadHandle::close`] is idempotent and waits for the worker to exit, so the path lock is
//! free by the time it returns. Any call after `close` fails with [`FilesError::Closed`].
//! Dropping a handle without closing it also stops the worker, just not synchronously.

use crate::constants::READ_CHUNK_SIZE;
use crate::lock::{LockMode, PathLockTable};
use crate::sandbox::SandboxRoot;
use crate::{FilesError, FilesResult};
use std::io::SeekFrom;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Result of a read: bytes copied into the caller's buffer and whether the file end was reached.
///
/// `eof` may accompany a non-empty read. It is a marker, not an error; reading again after
/// `eof` keeps returning `n == 0` with `eof` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub n: usize,
    pub eof: bool,
}

#[derive(Debug)]
enum Request {
    /// Next chunk from the sequential cursor.
    Next { len: usize },
    /// Chunk at an absolute offset; the sequential cursor is restored afterwards.
    At { offset: u64, len: usize },
    /// Reposition the sequential cursor.
    Seek { offset: u64 },
}

#[derive(Debug)]
struct Response {
    data: Vec<u8>,
    eof: bool,
}

struct Envelope {
    request: Request,
    reply: oneshot::Sender<FilesResult<Response>>,
}

/// An open file, read through its worker task.
#[derive(Debug)]
pub struct ReadHandle {
    path: String,
    requests: Option<mpsc::Sender<Envelope>>,
    worker: Option<JoinHandle<()>>,
}

impl ReadHandle {
    /// Spawns the worker for `path` and waits until it has either opened the file or failed.
    pub(crate) async fn open(
        locks: PathLockTable,
        sandbox: SandboxRoot,
        path: String,
    ) -> FilesResult<Self> {
        let (requests_tx, requests_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = oneshot::channel();

        let worker = tokio::spawn(run_worker(
            locks,
            sandbox,
            path.clone(),
            requests_rx,
            ready_tx,
        ));

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                path,
                requests: Some(requests_tx),
                worker: Some(worker),
            }),
            Ok(Err(e)) => {
                let _ = worker.await;
                Err(e)
            }
            Err(_) => {
                tracing::warn!(path = %path, "read worker exited before reporting readiness");
                Err(FilesError::Closed)
            }
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reads the next chunk from the sequential cursor into `buf`.
    ///
    /// Fills `buf` unless the file ends first.
    pub async fn read(&mut self, buf: &mut [u8]) -> FilesResult<ReadOutcome> {
        let response = self.call(Request::Next { len: buf.len() }).await?;
        Ok(copy_into(buf, response))
    }

    /// Reads into `buf` starting at `offset` without moving the sequential cursor.
    pub async fn read_at(&mut self, buf: &mut [u8], offset: u64) -> FilesResult<ReadOutcome> {
        let response = self
            .call(Request::At {
                offset,
                len: buf.len(),
            })
            .await?;
        Ok(copy_into(buf, response))
    }

    /// Moves the sequential cursor to the absolute position `offset`.
    ///
    /// Relative positioning is left to the caller.
    pub async fn seek(&mut self, offset: u64) -> FilesResult<u64> {
        self.call(Request::Seek { offset }).await?;
        Ok(offset)
    }

    /// Reads from the sequential cursor to the end of the file.
    pub async fn read_to_end(&mut self) -> FilesResult<Vec<u8>> {
        let mut contents = Vec::new();
        loop {
            let response = self
                .call(Request::Next {
                    len: READ_CHUNK_SIZE,
                })
                .await?;
            contents.extend_from_slice(&response.data);
            if response.eof {
                return Ok(contents);
            }
        }
    }

    /// Shuts the worker down and waits for it to release its lock.
    ///
    /// Calling `close` more than once is harmless.
    pub async fn close(&mut self) -> FilesResult<()> {
        // Dropping the only sender is the shutdown signal.
        self.requests.take();

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::warn!(path = %self.path, error = %e, "read worker terminated abnormally");
            }
        }

        Ok(())
    }

    async fn call(&mut self, request: Request) -> FilesResult<Response> {
        let requests = self.requests.as_ref().ok_or(FilesError::Closed)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        requests
            .send(Envelope {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| FilesError::Closed)?;

        reply_rx.await.map_err(|_| FilesError::Closed)?
    }
}

fn copy_into(buf: &mut [u8], response: Response) -> ReadOutcome {
    let n = response.data.len().min(buf.len());
    buf[..n].copy_from_slice(&response.data[..n]);
    ReadOutcome {
        n,
        eof: response.eof,
    }
}

async fn run_worker(
    locks: PathLockTable,
    sandbox: SandboxRoot,
    path: String,
    mut requests: mpsc::Receiver<Envelope>,
    ready: oneshot::Sender<FilesResult<()>>,
) {
    let lease = locks.acquire(&path, LockMode::Shared).await;

    let mut file = match open_regular(&sandbox, &path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "read worker failed to open file");
            let _ = ready.send(Err(e));
            return;
        }
    };

    if ready.send(Ok(())).is_err() {
        return;
    }
    tracing::debug!(path = %path, "read worker serving");

    while let Some(Envelope { request, reply }) = requests.recv().await {
        let response = serve(&mut file, &path, request).await;
        // The caller may have given up waiting; the next recv notices if it is gone for good.
        let _ = reply.send(response);
    }

    drop(lease);
    drop(file);
    tracing::debug!(path = %path, "read worker closed");
}

async fn open_regular(sandbox: &SandboxRoot, path: &str) -> FilesResult<File> {
    let file = sandbox.open(path).await?;
    let metadata = file
        .metadata()
        .await
        .map_err(|e| FilesError::io("stat", path, e))?;

    if metadata.is_dir() {
        return Err(FilesError::IsDirectory(path.to_owned()));
    }
    Ok(file)
}

async fn serve(file: &mut File, path: &str, request: Request) -> FilesResult<Response> {
    match request {
        Request::Next { len } => read_chunk(file, len)
            .await
            .map_err(|e| FilesError::io("read", path, e)),
        Request::At { offset, len } => read_chunk_at(file, offset, len)
            .await
            .map_err(|e| FilesError::io("read", path, e)),
        Request::Seek { offset } => {
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| FilesError::io("seek", path, e))?;
            Ok(Response {
                data: Vec::new(),
                eof: false,
            })
        }
    }
}

/// Reads up to `len` bytes from the cursor. `eof` is set once the cursor reaches the file end.
async fn read_chunk(file: &mut File, len: usize) -> std::io::Result<Response> {
    let mut data = vec![0u8; len];
    let n = read_full(file, &mut data).await?;
    data.truncate(n);

    let position = file.stream_position().await?;
    let size = file.metadata().await?.len();

    Ok(Response {
        data,
        eof: n < len || position >= size,
    })
}

async fn read_chunk_at(file: &mut File, offset: u64, len: usize) -> std::io::Result<Response> {
    let cursor = file.stream_position().await?;

    let result = match file.seek(SeekFrom::Start(offset)).await {
        Ok(_) => read_chunk(file, len).await,
        Err(e) => Err(e),
    };
    let restored = file.seek(SeekFrom::Start(cursor)).await;

    // A read error takes precedence over a failed restore.
    let response = result?;
    restored?;
    Ok(response)
}

async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
