//! 同步策略配置
//!
//! 定义一次同步的全部输入：两端的连接描述、同步模式、比较方式、过滤规则
//! 以及执行期参数。JSON 形状由外部的配置层持有，引擎按原样反序列化。

use crate::core::filter::FilterRule;
use serde::{Deserialize, Serialize};

/// 连接类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Local,
    Ftp,
    Sftp,
}

/// 连接配置（源端或目标端）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    #[serde(rename = "type")]
    pub kind: EndpointKind,
    /// 本地根目录或远端根路径
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// SFTP 私钥路径（可选）
    #[serde(default)]
    pub private_key_path: String,
    /// 连接超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// 被动模式（FTP）
    #[serde(default = "default_passive")]
    pub passive_mode: bool,
}

fn default_port() -> u16 {
    21
}

fn default_timeout() -> u64 {
    30
}

fn default_passive() -> bool {
    true
}

impl EndpointConfig {
    /// 本地端点的便捷构造
    pub fn local(path: impl Into<String>) -> Self {
        Self {
            kind: EndpointKind::Local,
            path: path.into(),
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: String::new(),
            private_key_path: String::new(),
            timeout: default_timeout(),
            passive_mode: default_passive(),
        }
    }

    /// 显示名称（用于日志，不含凭据）
    pub fn display_name(&self) -> String {
        match self.kind {
            EndpointKind::Local => format!("local:{}", self.path),
            EndpointKind::Ftp => {
                format!("ftp://{}@{}:{}{}", self.username, self.host, self.port, self.path)
            }
            EndpointKind::Sftp => {
                format!("sftp://{}@{}:{}{}", self.username, self.host, self.port, self.path)
            }
        }
    }
}

/// 同步模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// 镜像：源为准，可删除目标多余文件
    Mirror,
    /// 更新：只复制新增和较新的文件，从不删除
    Update,
    /// 双向：合并两端，按冲突策略处理差异
    TwoWay,
    /// 备份：只复制和覆盖，不看时间新旧
    Backup,
}

/// 文件比较方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompareMethod {
    Size,
    Time,
    TimeSize,
    Hash,
}

/// 冲突处理策略（仅双向同步使用）
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// 源优先
    Source,
    /// 目标优先
    Target,
    /// 较新的一方优先
    Newer,
    /// 不自动处理，记录为冲突
    Skip,
}

/// 同步任务策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    pub source: EndpointConfig,
    pub target: EndpointConfig,
    #[serde(default = "default_sync_mode")]
    pub sync_mode: SyncMode,
    #[serde(default = "default_compare_method")]
    pub compare_method: CompareMethod,
    #[serde(default)]
    pub filter_rule: FilterRule,
    /// 是否删除目标端多余文件（仅镜像模式有效）
    #[serde(default)]
    pub delete_extra: bool,
    /// 是否保留目录结构
    #[serde(default = "default_true")]
    pub preserve_structure: bool,
    #[serde(default = "default_conflict_resolution")]
    pub conflict_resolution: ConflictResolution,
    /// 单文件失败后是否继续执行剩余计划
    #[serde(default = "default_true")]
    pub continue_on_error: bool,
    /// 最大并发传输数，执行时收紧到 1..=16
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_sync_mode() -> SyncMode {
    SyncMode::Update
}

fn default_compare_method() -> CompareMethod {
    CompareMethod::TimeSize
}

fn default_conflict_resolution() -> ConflictResolution {
    ConflictResolution::Newer
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    2
}

impl SyncPolicy {
    /// 并发数收紧到 1..=16
    pub fn concurrency(&self) -> usize {
        self.max_concurrent.clamp(1, 16)
    }
}
