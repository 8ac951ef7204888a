use super::{FileInfo, FileMeta, Storage, IO_TIMEOUT_SECS};
use crate::config::EndpointConfig;
use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metakey, Operator};
use std::time::Duration;

/// SFTP 连接器
///
/// 认证使用 `private_key_path` 指定的私钥，未配置时回退到
/// ssh-agent / 默认密钥。策略 JSON 中的密码字段为形状兼容保留，
/// 底层服务不支持密码认证。
pub struct SftpStorage {
    operator: Operator,
    name: String,
}

impl SftpStorage {
    pub fn new(config: &EndpointConfig) -> Result<Self> {
        use opendal::services::Sftp;

        let endpoint = format!("ssh://{}:{}", config.host, config.port);
        let root = if config.path.is_empty() { "/" } else { &config.path };

        let mut builder = Sftp::default()
            .endpoint(&endpoint)
            .root(root)
            .user(&config.username)
            .known_hosts_strategy("accept");

        if !config.private_key_path.is_empty() {
            builder = builder.key(&config.private_key_path);
        }

        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(config.timeout))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!("sftp://{}:{}{}", config.host, config.port, root);

        Ok(Self { operator, name })
    }

    /// 确保父目录逐级存在
    async fn ensure_parent_dirs(&self, path: &str) {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let parent_str = parent.to_string_lossy().replace('\\', "/");
            if !parent_str.is_empty() && parent_str != "." {
                let mut current = String::new();
                for part in parent_str.split('/').filter(|s| !s.is_empty()) {
                    current.push_str(part);
                    current.push('/');
                    let _ = self.operator.create_dir(&current).await;
                }
            }
        }
    }
}

#[async_trait]
impl Storage for SftpStorage {
    async fn connect(&self) -> Result<()> {
        self.operator
            .check()
            .await
            .map_err(|e| SyncError::Connect(format!("{}: {}", self.name, e)))?;
        Ok(())
    }

    async fn disconnect(&self) {
        // SSH 会话随 Operator drop 关闭
    }

    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>> {
        let mut files = Vec::new();
        let path = prefix.unwrap_or("");

        let mut lister = self
            .operator
            .lister_with(path)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::LastModified | Metakey::Mode)
            .await?;

        loop {
            match lister.try_next().await {
                Ok(Some(entry)) => {
                    let path_str = entry.path().to_string();

                    if path_str.is_empty() || path_str == "/" {
                        continue;
                    }

                    let meta = entry.metadata();

                    files.push(FileInfo {
                        path: path_str.trim_start_matches('/').trim_end_matches('/').to_string(),
                        size: if meta.is_dir() { 0 } else { meta.content_length() },
                        modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                        is_dir: meta.is_dir(),
                        checksum: None,
                    });
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("SFTP 列目录中断（已获取 {} 个条目）: {}", files.len(), e);
                    break;
                }
            }
        }

        Ok(files)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileMeta>> {
        match self.operator.stat(path).await {
            Ok(meta) => Ok(Some(FileMeta {
                size: if meta.is_dir() { 0 } else { meta.content_length() },
                modified_time: meta.last_modified().map_or(0, |t| t.timestamp()),
                is_dir: meta.is_dir(),
            })),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let data = self.operator.read(path).await?;
        Ok(data.to_vec())
    }

    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let data = self
            .operator
            .read_with(path)
            .range(offset..offset + length)
            .await?;
        Ok(data.to_vec())
    }

    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = path.replace('\\', "/");
        let path = path.trim_start_matches('/');

        self.ensure_parent_dirs(path).await;
        self.operator.write(path, data).await?;
        Ok(())
    }

    async fn append(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = path.replace('\\', "/");
        let path = path.trim_start_matches('/');

        self.ensure_parent_dirs(path).await;
        self.operator.write_with(path, data).append(true).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        match self.operator.delete(path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_dir(&self, path: &str) -> Result<()> {
        let dir_path = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };
        match self.operator.remove_all(&dir_path).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        let dir_path = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };
        self.operator.create_dir(&dir_path).await?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
