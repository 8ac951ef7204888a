pub mod ftp;
pub mod local;
pub mod sftp;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use ftp::FtpStorage;
pub use local::LocalStorage;
pub use sftp::SftpStorage;

// ============ 公共常量 ============

/// 单文件传输通道的空闲/IO 超时上限（秒），与连接超时分开
pub const IO_TIMEOUT_SECS: u64 = 3600;

/// 文件信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    /// 相对于端点根的路径，统一使用正斜杠，是条目的唯一标识
    pub path: String,
    pub size: u64,
    /// Unix 秒级时间戳，部分 FTP 服务器不提供时为 0
    pub modified_time: i64,
    pub is_dir: bool,
    pub checksum: Option<String>,
}

impl FileInfo {
    /// 文件名（路径最后一段）
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

impl PartialEq for FileInfo {
    fn eq(&self, other: &Self) -> bool {
        // 同一路径即视为同一逻辑文件
        self.path == other.path
    }
}

impl Eq for FileInfo {}

/// 文件元数据（stat 结果，不含路径）
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub size: u64,
    pub modified_time: i64,
    pub is_dir: bool,
}

/// 计算内容校验和（BLAKE3，十六进制）
pub fn calculate_checksum(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// 存储抽象接口
///
/// 本地文件系统、FTP、SFTP 各自实现一套相同语义的原语。
/// 连接器实例不跨线程共享；引擎为每个工作线程建立独立的连接对。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 建立会话。本地端点在根目录不存在时自动创建；
    /// 认证失败、主机不可达、超时都在这里返回连接级错误。
    async fn connect(&self) -> Result<()>;

    /// 释放会话；幂等，从不报错
    async fn disconnect(&self);

    /// 递归列出子路径下的所有条目（一次调用返回完整闭包）。
    /// 子目录枚举失败只记日志并跳过该子树，根路径不可达才返回错误。
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<FileInfo>>;

    /// 获取文件元数据，不存在返回 None
    async fn stat(&self, path: &str) -> Result<Option<FileMeta>>;

    /// 读取整个文件
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// 读取文件的一部分（用于分块传输和断点续传）
    async fn read_range(&self, path: &str, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// 写入整个文件（覆盖）
    async fn write(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 追加写入（断点续传的续写原语）。
    /// 后端不支持时返回 Unsupported 类错误，由传输层降级处理。
    async fn append(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 删除文件
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// 递归删除目录
    async fn delete_dir(&self, path: &str) -> Result<()>;

    /// 创建目录（已存在不算错误）
    async fn create_dir(&self, path: &str) -> Result<()>;

    /// 检查路径是否存在
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    /// 计算文件内容校验和，仅在 compare_method = hash 时按需调用
    async fn checksum(&self, path: &str) -> Result<String> {
        let data = self.read(path).await?;
        Ok(calculate_checksum(&data))
    }

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据端点配置创建存储实例
pub fn create_storage(
    config: &crate::config::EndpointConfig,
) -> Result<std::sync::Arc<dyn Storage>> {
    use crate::config::EndpointKind;

    match config.kind {
        EndpointKind::Local => {
            if config.path.is_empty() {
                anyhow::bail!("本地端点缺少 path");
            }
            tracing::debug!("初始化本地存储: {}", config.path);
            Ok(std::sync::Arc::new(LocalStorage::new(&config.path)?) as std::sync::Arc<dyn Storage>)
        }
        EndpointKind::Ftp => {
            if config.host.is_empty() {
                anyhow::bail!("FTP 端点缺少 host");
            }
            tracing::debug!("初始化 FTP 存储: {}", config.display_name());
            Ok(std::sync::Arc::new(FtpStorage::new(config)?) as std::sync::Arc<dyn Storage>)
        }
        EndpointKind::Sftp => {
            if config.host.is_empty() {
                anyhow::bail!("SFTP 端点缺少 host");
            }
            tracing::debug!("初始化 SFTP 存储: {}", config.display_name());
            Ok(std::sync::Arc::new(SftpStorage::new(config)?) as std::sync::Arc<dyn Storage>)
        }
    }
}
