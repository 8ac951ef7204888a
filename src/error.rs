//! 同步引擎错误类型
//!
//! 大部分调用链使用 `anyhow::Result`，这里只定义引擎必须区分的几种条件：
//! 取消、连接失败、后端不支持的能力。工作线程通过 downcast 识别它们。

use thiserror::Error;

/// 引擎级错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 用户取消，区别于普通失败：不重试、不计入失败数
    #[error("操作已取消")]
    Cancelled,

    /// 连接级错误（认证失败、主机不可达、超时），整个同步过程中止
    #[error("连接失败: {0}")]
    Connect(String),

    /// 后端不支持的操作（如 append），传输层据此降级为整文件复制
    #[error("后端不支持该操作: {0}")]
    Unsupported(String),
}

/// 判断错误链中是否包含取消信号
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| matches!(e.downcast_ref::<SyncError>(), Some(SyncError::Cancelled)))
}

/// 判断错误链中是否为"不支持"错误（含 opendal 的 Unsupported）
pub fn is_unsupported(err: &anyhow::Error) -> bool {
    err.chain().any(|e| {
        matches!(e.downcast_ref::<SyncError>(), Some(SyncError::Unsupported(_)))
            || e.downcast_ref::<opendal::Error>()
                .is_some_and(|oe| oe.kind() == opendal::ErrorKind::Unsupported)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_cancelled() {
        let err = anyhow::Error::new(SyncError::Cancelled).context("传输中断");
        assert!(is_cancelled(&err));

        let other = anyhow::anyhow!("普通错误");
        assert!(!is_cancelled(&other));
    }
}
