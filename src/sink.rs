// src/sink.rs
//! Delivery side. The engine hands decisions over and forgets them; whether
//! they reach the chat does not influence any counter.

use std::future::Future;

use anyhow::Result;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::coordinator::Decision;

pub trait DecisionSink: Send + Sync {
    fn deliver(&self, decision: &Decision) -> impl Future<Output = Result<()>> + Send;
}

/// Writes each decision as one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W> DecisionSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&self, decision: &Decision) -> Result<()> {
        let mut line = serde_json::to_vec(decision)?;
        line.push(b'\n');
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Keeps everything in memory; handy in tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    items: Mutex<Vec<Decision>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn take(&self) -> Vec<Decision> {
        std::mem::take(&mut *self.items.lock().await)
    }

    pub async fn count(&self) -> usize {
        self.items.lock().await.len()
    }
}

impl DecisionSink for MemorySink {
    async fn deliver(&self, decision: &Decision) -> Result<()> {
        self.items.lock().await.push(decision.clone());
        Ok(())
    }
}
