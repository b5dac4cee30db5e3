//! 死信存储（DeadLetterSink）
//!
//! 重试耗尽的 (事件, 处理器) 以一条完整记录追加写入，供人工或外部重放。
//! 每次写入都是单条原子追加，并发写入方不会交错出半条记录。
//!
use super::bus::SubscriptionId;
use super::delivery::FailureRecord;
use crate::domain_event::Event;
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// 死信记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub event: Event,
    pub handler: String,
    pub subscription_id: SubscriptionId,
    /// 按发生顺序排列的失败历史
    pub failure_history: Vec<FailureRecord>,
    pub final_timestamp: DateTime<Utc>,
}

/// 死信存储：仅追加
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn append(&self, record: DeadLetterRecord) -> Result<()>;
}

fn sink_err(reason: impl ToString) -> DomainError {
    DomainError::DeadLetter {
        reason: reason.to_string(),
    }
}

/// 内存死信存储，适用于测试与本地开发
#[derive(Clone, Default)]
pub struct InMemoryDeadLetterSink {
    records: Arc<Mutex<Vec<DeadLetterRecord>>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|g| g.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出全部记录（用于重放）
    pub fn drain(&self) -> Vec<DeadLetterRecord> {
        self.records
            .lock()
            .map(|mut g| std::mem::take(&mut *g))
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn append(&self, record: DeadLetterRecord) -> Result<()> {
        self.records.lock().map_err(sink_err)?.push(record);
        Ok(())
    }
}

/// JSON Lines 文件死信存储：每条记录一行，追加写入
pub struct JsonLinesDeadLetterSink {
    path: PathBuf,
    file: tokio::sync::Mutex<File>,
}

impl JsonLinesDeadLetterSink {
    /// 以追加模式打开（不存在则创建）
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(sink_err)?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取文件中的全部死信记录
    pub async fn read_all(path: impl AsRef<Path>) -> Result<Vec<DeadLetterRecord>> {
        let content = match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(sink_err(e)),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(DomainError::from))
            .collect()
    }
}

#[async_trait]
impl DeadLetterSink for JsonLinesDeadLetterSink {
    async fn append(&self, record: DeadLetterRecord) -> Result<()> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await.map_err(sink_err)?;
        file.flush().await.map_err(sink_err)?;
        Ok(())
    }
}
