//! 文件扫描器
//!
//! 包装 Storage 的递归列举，应用过滤规则后产出 path → FileInfo 的清单。
//! 时间窗口在扫描器构造时解析一次，保证两端用同一个窗口。

use crate::core::filter::{FilterRule, TimeWindow};
use crate::error::SyncError;
use crate::storage::{FileInfo, Storage};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// 文件扫描器
pub struct FileScanner {
    filter: FilterRule,
    window: TimeWindow,
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl FileScanner {
    pub fn new(filter: FilterRule) -> Self {
        let window = filter.resolve_time_window();
        Self {
            filter,
            window,
            cancel_flag: None,
        }
    }

    /// 创建带取消标志的扫描器
    pub fn with_cancel(filter: FilterRule, cancel_flag: Arc<AtomicBool>) -> Self {
        let window = filter.resolve_time_window();
        Self {
            filter,
            window,
            cancel_flag: Some(cancel_flag),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// 扫描存储并返回过滤后的文件清单
    ///
    /// 被过滤掉的条目完全不进入清单，后续既不会被同步也不会被删除。
    pub async fn scan_storage(
        &self,
        storage: &dyn Storage,
        prefix: Option<&str>,
    ) -> Result<HashMap<String, FileInfo>> {
        if self.is_cancelled() {
            return Err(SyncError::Cancelled.into());
        }

        info!("开始扫描存储: {}, prefix: {:?}", storage.name(), prefix);

        let files = storage.list_files(prefix).await?;
        debug!("list_files 返回 {} 个条目", files.len());

        if self.is_cancelled() {
            return Err(SyncError::Cancelled.into());
        }

        let mut tree = HashMap::new();
        let mut excluded_count = 0;
        let mut dir_count = 0;

        for file in files {
            // 每处理一定数量检查一次取消状态
            if tree.len() % 100 == 0 && self.is_cancelled() {
                return Err(SyncError::Cancelled.into());
            }

            if file.is_dir {
                dir_count += 1;
            }

            if !self.filter.should_include(&file, &self.window) {
                debug!("过滤排除: {}", file.path);
                excluded_count += 1;
                continue;
            }

            tree.insert(file.path.clone(), file);
        }

        info!(
            "扫描完成: {} ({} 个条目，其中 {} 个目录，{} 个被过滤)",
            storage.name(),
            tree.len(),
            dir_count,
            excluded_count
        );

        Ok(tree)
    }
}
