//! 反思记录持久化
//!
//! ReflectionSink 为写入协作方；JsonlReflectionStore 每条记录追加一行 JSON，
//! MemoryReflectionSink 仅保存在内存中（测试与未配置 store_path 时使用）。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::reflection::ReflectionEntry;

/// 反思记录写入协作方
#[async_trait]
pub trait ReflectionSink: Send + Sync {
    async fn write(&self, entry: &ReflectionEntry) -> anyhow::Result<()>;
}

/// JSON Lines 文件存储；父目录不存在时自动创建
#[derive(Debug)]
pub struct JsonlReflectionStore {
    path: PathBuf,
}

impl JsonlReflectionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部记录（原样 JSON）；文件不存在时返回空 Vec
    pub async fn load(&self) -> anyhow::Result<Vec<serde_json::Value>> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        data.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl ReflectionSink for JsonlReflectionStore {
    async fn write(&self, entry: &ReflectionEntry) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// 内存中的反思记录
#[derive(Debug, Default)]
pub struct MemoryReflectionSink {
    entries: Mutex<Vec<ReflectionEntry>>,
}

impl MemoryReflectionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ReflectionEntry> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl ReflectionSink for MemoryReflectionSink {
    async fn write(&self, entry: &ReflectionEntry) -> anyhow::Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
