//! 瞬时错误重试策略
//!
//! 只有瞬时错误（超时、连接被重置等）才会重试，
//! 致命错误（文件不存在、权限不足、已取消）立即失败。

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;

/// 重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// 最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒），指数退避
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败后的退避延迟（attempt 从 0 开始）
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        self.base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt))
    }
}

/// 判断错误是否为瞬时错误（值得重试）
pub fn is_transient(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(sync_err) = cause.downcast_ref::<SyncError>() {
            match sync_err {
                SyncError::Cancelled | SyncError::Unsupported(_) => return false,
                SyncError::Connect(_) => return true,
            }
        }

        if let Some(op_err) = cause.downcast_ref::<opendal::Error>() {
            return match op_err.kind() {
                opendal::ErrorKind::NotFound
                | opendal::ErrorKind::PermissionDenied
                | opendal::ErrorKind::Unsupported
                | opendal::ErrorKind::ConfigInvalid => false,
                _ => op_err.is_temporary() || matches!(op_err.kind(), opendal::ErrorKind::Unexpected),
            };
        }

        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io_err.kind(),
                IoErrorKind::TimedOut
                    | IoErrorKind::ConnectionReset
                    | IoErrorKind::ConnectionAborted
                    | IoErrorKind::BrokenPipe
                    | IoErrorKind::Interrupted
                    | IoErrorKind::WouldBlock
            );
        }
    }

    false
}
