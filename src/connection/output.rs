// src/connection/output.rs

//! The outbound queue: encoded replies and whole files, transmitted in the
//! order they were queued.

use bytes::Bytes;
use std::collections::VecDeque;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

#[derive(Debug)]
enum Outbound {
    Bytes(Bytes),
    /// Owned by the queue; closed when dropped after transmission or teardown.
    File(File),
}

#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<Outbound>,
    pending_bytes: usize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.pending_bytes += data.len();
        self.items.push_back(Outbound::Bytes(data));
    }

    pub fn push_file(&mut self, file: File) {
        self.items.push_back(Outbound::File(file));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queued entries, counting each file as one.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Reply bytes waiting to be written, not counting files.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn pending_files(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item, Outbound::File(_)))
            .count()
    }

    /// Writes everything queued to `writer` and flushes it.
    ///
    /// Returns the number of bytes written. On error the entry being written
    /// is dropped; the rest stays queued until the queue itself is dropped.
    pub async fn write_to<W>(&mut self, writer: &mut W) -> std::io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut written = 0u64;
        while let Some(item) = self.items.pop_front() {
            match item {
                Outbound::Bytes(data) => {
                    self.pending_bytes -= data.len();
                    writer.write_all(&data).await?;
                    written += data.len() as u64;
                }
                Outbound::File(mut file) => {
                    written += tokio::io::copy(&mut file, writer).await?;
                }
            }
        }
        writer.flush().await?;
        Ok(written)
    }
}
