//! syncore - 文件同步引擎
//!
//! 在本地文件系统、FTP、SFTP 端点之间做目录同步：
//! 递归列举 + 过滤 → 比较产出动作计划 → 并发执行（分块传输、断点续传、
//! 协作取消、瞬时错误重试）→ 汇总为同步报告。
//!
//! 本 crate 是纯库组件；调度、通知投递、日志持久化和界面由外部协作方承担。
//!
//! ```no_run
//! use syncore::{EndpointConfig, SyncEngine, SyncPolicy};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let policy: SyncPolicy = serde_json::from_str(
//!     r#"{
//!         "source": {"type": "local", "path": "/data/photos"},
//!         "target": {"type": "sftp", "path": "/backup/photos",
//!                    "host": "backup.example.com", "port": 22,
//!                    "username": "deploy", "privateKeyPath": "/home/me/.ssh/id_rsa"},
//!         "syncMode": "mirror",
//!         "deleteExtra": true
//!     }"#,
//! )?;
//!
//! let engine = SyncEngine::new(policy);
//! let report = engine.sync().await?;
//! println!("复制 {} 个文件, 传输 {} 字节", report.copied, report.bytesTransferred);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{
    CompareMethod, ConflictResolution, EndpointConfig, EndpointKind, SyncMode, SyncPolicy,
};
pub use core::{
    ActionDetail, ActionKind, ActionSummary, FileComparator, FileScanner, FilterRule, RetryPolicy,
    SyncEngine, SyncItem, SyncReport, SyncStatus,
};
pub use error::SyncError;
pub use storage::{create_storage, FileInfo, FileMeta, Storage};
