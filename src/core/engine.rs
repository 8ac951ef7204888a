#![allow(non_snake_case)]

//! 同步引擎
//!
//! 单次调用的状态机：连接 → 比较 → 并发执行 → 报告。
//! 调用之间不保留任何状态；每次 `sync()` 都是独立的一轮。

use crate::config::{SyncMode, SyncPolicy};
use crate::core::comparator::{ActionKind, ActionSummary, FileComparator, SyncItem};
use crate::core::retry::{is_transient, RetryPolicy};
use crate::core::scanner::FileScanner;
use crate::core::transfer;
use crate::error::{is_cancelled, SyncError};
use crate::storage::{create_storage, Storage};
use anyhow::{bail, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// 同步状态
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    Failed,
    Cancelled,
}

/// 单个动作的执行记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDetail {
    pub action: ActionKind,
    pub path: String,
    pub success: bool,
    pub bytes: u64,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// 本轮同步的标识（日志关联用）
    pub passId: String,
    pub status: SyncStatus,
    pub copied: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytesTransferred: u64,
    pub details: Vec<ActionDetail>,
    pub errors: Vec<String>,
    pub startTime: i64,
    pub endTime: i64,
    pub duration: u64,
}

impl SyncReport {
    pub fn success(&self) -> bool {
        self.failed == 0 && self.status == SyncStatus::Completed
    }
}

/// 执行期计数器（跨工作任务共享，仅原子更新）
#[derive(Default)]
struct ExecStats {
    copied: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes_completed: AtomicU64,
    processed: AtomicU64,
}

type StoragePair = (Arc<dyn Storage>, Arc<dyn Storage>);

/// 连接状态：主连接对 + 每个工作任务各自的连接对
#[derive(Default)]
struct Connections {
    primary: Option<StoragePair>,
    pool: Vec<StoragePair>,
}

/// 粗粒度进度回调：(消息, 已处理数, 总数)
pub type ProgressFn = dyn Fn(&str, usize, usize) + Send + Sync;
/// 单文件完成回调：(路径, 动作, 是否成功, 传输字节)
pub type FileCompletedFn = dyn Fn(&str, ActionKind, bool, u64) + Send + Sync;

/// 同步引擎
pub struct SyncEngine {
    policy: SyncPolicy,
    retry: RetryPolicy,
    cancelled: Arc<AtomicBool>,
    connections: tokio::sync::Mutex<Connections>,
    on_progress: Option<Arc<ProgressFn>>,
    on_file_completed: Option<Arc<FileCompletedFn>>,
}

impl SyncEngine {
    pub fn new(policy: SyncPolicy) -> Self {
        Self {
            policy,
            retry: RetryPolicy::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
            connections: tokio::sync::Mutex::new(Connections::default()),
            on_progress: None,
            on_file_completed: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 设置粗粒度进度回调，每个动作入队/完成时触发
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, usize, usize) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(f));
        self
    }

    /// 设置单文件完成回调，每个可执行动作触发一次
    pub fn on_file_completed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, ActionKind, bool, u64) + Send + Sync + 'static,
    {
        self.on_file_completed = Some(Arc::new(f));
        self
    }

    /// 请求取消。传输循环在块间观察该标志，在约一个块的时间内中止
    pub fn cancel(&self) {
        info!("收到取消请求");
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// 建立主连接对；并发数大于 1 时额外建立连接池（每个工作任务一对，
    /// 协议会话不跨任务共享）。任何一个成员失败都会中止整个连接步骤
    /// 并释放已打开的连接。
    pub async fn connect(&self) -> Result<()> {
        let mut conns = self.connections.lock().await;
        if conns.primary.is_some() {
            return Ok(());
        }

        info!(
            "连接端点: {} -> {}",
            self.policy.source.display_name(),
            self.policy.target.display_name()
        );

        let primary = Self::open_pair(&self.policy).await?;

        let concurrency = self.policy.concurrency();
        let mut pool = Vec::new();
        if concurrency > 1 {
            for i in 0..concurrency {
                match Self::open_pair(&self.policy).await {
                    Ok(pair) => pool.push(pair),
                    Err(e) => {
                        error!("连接池第 {} 对建立失败: {}", i + 1, e);
                        Self::close_pair(&primary).await;
                        for pair in &pool {
                            Self::close_pair(pair).await;
                        }
                        return Err(e);
                    }
                }
            }
            debug!("连接池建立完成: {} 对", pool.len());
        }

        conns.primary = Some(primary);
        conns.pool = pool;
        Ok(())
    }

    async fn open_pair(policy: &SyncPolicy) -> Result<StoragePair> {
        let source = create_storage(&policy.source)?;
        let target = create_storage(&policy.target)?;

        source.connect().await?;
        if let Err(e) = target.connect().await {
            source.disconnect().await;
            return Err(e);
        }
        Ok((source, target))
    }

    async fn close_pair(pair: &StoragePair) {
        pair.0.disconnect().await;
        pair.1.disconnect().await;
    }

    /// 释放主连接对和整个连接池；幂等
    pub async fn disconnect(&self) {
        let mut conns = self.connections.lock().await;
        if let Some(primary) = conns.primary.take() {
            Self::close_pair(&primary).await;
        }
        for pair in conns.pool.drain(..) {
            Self::close_pair(&pair).await;
        }
    }

    /// 列出两端并产出动作计划
    pub async fn compare(&self) -> Result<Vec<SyncItem>> {
        let (source, target) = {
            let conns = self.connections.lock().await;
            conns
                .primary
                .clone()
                .ok_or_else(|| anyhow::anyhow!("尚未连接"))?
        };

        let scanner =
            FileScanner::with_cancel(self.policy.filter_rule.clone(), self.cancelled.clone());
        let source_tree = scanner.scan_storage(source.as_ref(), None).await?;
        let target_tree = scanner.scan_storage(target.as_ref(), None).await?;

        let plan = FileComparator::new()
            .compare(
                &source_tree,
                &target_tree,
                &self.policy,
                source.as_ref(),
                target.as_ref(),
            )
            .await?;

        let summary = ActionSummary::of(&plan);
        info!(
            "比较完成: {} 复制, {} 更新, {} 删除, {} 冲突, {} 跳过, {} 一致 (待传输 {} 字节)",
            summary.copy_count,
            summary.update_count,
            summary.delete_count,
            summary.conflict_count,
            summary.skip_count,
            summary.equal_count,
            summary.transfer_bytes
        );

        Ok(plan)
    }

    /// 执行动作计划
    pub async fn execute(&self, plan: Vec<SyncItem>) -> Result<SyncReport> {
        let start_time = chrono::Utc::now().timestamp();
        let pass_id = uuid::Uuid::new_v4().to_string();
        self.execute_inner(plan, start_time, pass_id).await
    }

    async fn execute_inner(
        &self,
        plan: Vec<SyncItem>,
        start_time: i64,
        pass_id: String,
    ) -> Result<SyncReport> {
        let pairs: Vec<StoragePair> = {
            let conns = self.connections.lock().await;
            let Some(primary) = conns.primary.clone() else {
                bail!("尚未连接");
            };
            if conns.pool.is_empty() {
                vec![primary]
            } else {
                conns.pool.clone()
            }
        };

        let total = plan.len();
        let stats = Arc::new(ExecStats::default());
        let details = Arc::new(Mutex::new(Vec::<ActionDetail>::new()));
        let errors = Arc::new(Mutex::new(Vec::<String>::new()));
        let stop = Arc::new(AtomicBool::new(false));

        // 记账项（一致/跳过/冲突）按计划顺序直接入账，不经过工作队列
        let mut queue = VecDeque::new();
        for item in plan {
            if item.action.is_actionable() {
                queue.push_back(item);
            } else {
                let path = item.relative_path().to_string();
                if item.action == ActionKind::Conflict {
                    warn!("冲突未处理: {} ({})", path, item.reason);
                }
                details.lock().unwrap().push(ActionDetail {
                    action: item.action,
                    path: path.clone(),
                    success: true,
                    bytes: 0,
                });
                stats.skipped.fetch_add(1, Ordering::Relaxed);
                let processed = stats.processed.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(cb) = &self.on_progress {
                    cb(&format!("跳过: {}", path), processed as usize, total);
                }
            }
        }

        let actionable = queue.len();
        info!("开始执行: {} 个动作, 并发 {}", actionable, pairs.len());
        let queue = Arc::new(Mutex::new(queue));

        // 每个工作任务独立的在途字节计数，实时总量 = 已完成 + Σ在途
        let inflight: Vec<Arc<AtomicU64>> =
            (0..pairs.len()).map(|_| Arc::new(AtomicU64::new(0))).collect();

        let mut handles = Vec::new();
        for (worker_id, pair) in pairs.into_iter().enumerate() {
            let queue = queue.clone();
            let stats = stats.clone();
            let details = details.clone();
            let errors = errors.clone();
            let stop = stop.clone();
            let cancelled = self.cancelled.clone();
            let inflight = inflight[worker_id].clone();
            let retry = self.retry.clone();
            let continue_on_error = self.policy.continue_on_error;
            let on_progress = self.on_progress.clone();
            let on_file_completed = self.on_file_completed.clone();

            let handle = tokio::spawn(async move {
                let (source, target) = pair;
                loop {
                    if cancelled.load(Ordering::SeqCst) || stop.load(Ordering::SeqCst) {
                        break;
                    }

                    let item = { queue.lock().unwrap().pop_front() };
                    let Some(item) = item else { break };

                    let path = item.relative_path().to_string();
                    let result = Self::run_with_retry(
                        &item,
                        source.as_ref(),
                        target.as_ref(),
                        &retry,
                        &cancelled,
                        &inflight,
                    )
                    .await;
                    inflight.store(0, Ordering::Relaxed);

                    match result {
                        Ok(bytes) => {
                            match item.action {
                                ActionKind::CopyToTarget | ActionKind::CopyToSource => {
                                    stats.copied.fetch_add(1, Ordering::Relaxed);
                                }
                                ActionKind::UpdateTarget | ActionKind::UpdateSource => {
                                    stats.updated.fetch_add(1, Ordering::Relaxed);
                                }
                                ActionKind::DeleteTarget | ActionKind::DeleteSource => {
                                    stats.deleted.fetch_add(1, Ordering::Relaxed);
                                }
                                _ => {}
                            }
                            stats.bytes_completed.fetch_add(bytes, Ordering::Relaxed);
                            details.lock().unwrap().push(ActionDetail {
                                action: item.action,
                                path: path.clone(),
                                success: true,
                                bytes,
                            });
                            if let Some(cb) = &on_file_completed {
                                cb(&path, item.action, true, bytes);
                            }
                            let processed =
                                stats.processed.fetch_add(1, Ordering::Relaxed) + 1;
                            if let Some(cb) = &on_progress {
                                cb(&format!("已完成: {}", path), processed as usize, total);
                            }
                        }
                        Err(e) if is_cancelled(&e) => {
                            // 取消既不算成功也不算失败，不入账
                            debug!("工作任务 {} 因取消中止: {}", worker_id, path);
                            break;
                        }
                        Err(e) => {
                            stats.failed.fetch_add(1, Ordering::Relaxed);
                            errors.lock().unwrap().push(format!("{}: {}", path, e));
                            details.lock().unwrap().push(ActionDetail {
                                action: item.action,
                                path: path.clone(),
                                success: false,
                                bytes: 0,
                            });
                            if let Some(cb) = &on_file_completed {
                                cb(&path, item.action, false, 0);
                            }
                            let processed =
                                stats.processed.fetch_add(1, Ordering::Relaxed) + 1;
                            if let Some(cb) = &on_progress {
                                cb(&format!("失败: {}", path), processed as usize, total);
                            }
                            if !continue_on_error {
                                warn!("单文件失败且策略要求中止，通知所有工作任务停止");
                                stop.store(true, Ordering::SeqCst);
                            }
                        }
                    }
                }
            });
            handles.push(handle);
        }

        // 周期性上报实时进度：已完成字节 + 各工作任务的在途字节
        let reporter = {
            let stats = stats.clone();
            let inflight = inflight.clone();
            let cancelled = self.cancelled.clone();
            let on_progress = self.on_progress.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    if cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    let processed = stats.processed.load(Ordering::Relaxed);
                    let live_bytes = stats.bytes_completed.load(Ordering::Relaxed)
                        + inflight.iter().map(|c| c.load(Ordering::Relaxed)).sum::<u64>();
                    if let Some(cb) = &on_progress {
                        cb(
                            &format!("同步中，已传输 {} 字节", live_bytes),
                            processed as usize,
                            total,
                        );
                    }
                    if processed >= total as u64 {
                        break;
                    }
                }
            })
        };

        for handle in handles {
            let _ = handle.await;
        }
        reporter.abort();

        // 镜像删除后清理目标端的空目录（尽力而为，失败忽略）
        if self.policy.sync_mode == SyncMode::Mirror
            && self.policy.delete_extra
            && !self.is_cancelled()
        {
            let target = {
                let conns = self.connections.lock().await;
                conns.primary.clone().map(|(_, t)| t)
            };
            if let Some(target) = target {
                Self::prune_empty_dirs(target.as_ref()).await;
            }
        }

        let end_time = chrono::Utc::now().timestamp();
        let failed = stats.failed.load(Ordering::Relaxed);
        let status = if self.is_cancelled() {
            SyncStatus::Cancelled
        } else if failed > 0 && !self.policy.continue_on_error {
            SyncStatus::Failed
        } else {
            SyncStatus::Completed
        };

        let report = SyncReport {
            passId: pass_id,
            status,
            copied: stats.copied.load(Ordering::Relaxed),
            updated: stats.updated.load(Ordering::Relaxed),
            deleted: stats.deleted.load(Ordering::Relaxed),
            skipped: stats.skipped.load(Ordering::Relaxed),
            failed,
            bytesTransferred: stats.bytes_completed.load(Ordering::Relaxed),
            details: std::mem::take(&mut *details.lock().unwrap()),
            errors: std::mem::take(&mut *errors.lock().unwrap()),
            startTime: start_time,
            endTime: end_time,
            duration: (end_time - start_time).max(0) as u64,
        };

        info!(
            "执行结束 [{}]: {:?}, 复制 {}, 更新 {}, 删除 {}, 跳过 {}, 失败 {}, 传输 {} 字节",
            report.passId,
            report.status,
            report.copied,
            report.updated,
            report.deleted,
            report.skipped,
            report.failed,
            report.bytesTransferred
        );

        Ok(report)
    }

    /// 带重试的单动作执行。只重试瞬时错误；取消立即中止
    async fn run_with_retry(
        item: &SyncItem,
        source: &dyn Storage,
        target: &dyn Storage,
        retry: &RetryPolicy,
        cancelled: &AtomicBool,
        inflight: &AtomicU64,
    ) -> Result<u64> {
        let mut attempt = 0;
        loop {
            if cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled.into());
            }

            match Self::execute_item(item, source, target, cancelled, inflight).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => {
                    if attempt < retry.max_retries && is_transient(&e) {
                        let delay = retry.delay_ms(attempt);
                        warn!(
                            "操作失败，{}ms 后重试 ({}/{}): {}",
                            delay,
                            attempt + 1,
                            retry.max_retries,
                            e
                        );
                        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                        attempt += 1;
                    } else {
                        if attempt > 0 {
                            error!("操作最终失败 (已重试 {} 次): {}", attempt, e);
                        }
                        return Err(e);
                    }
                }
            }
        }
    }

    /// 执行单个动作
    async fn execute_item(
        item: &SyncItem,
        source: &dyn Storage,
        target: &dyn Storage,
        cancelled: &AtomicBool,
        inflight: &AtomicU64,
    ) -> Result<u64> {
        match item.action {
            ActionKind::CopyToTarget | ActionKind::UpdateTarget => {
                let Some(info) = item.source.as_ref() else {
                    bail!("计划项缺少源端文件信息: {}", item.relative_path());
                };
                // 新增复制可以续传，覆盖性更新总是全量重传
                let resume = item.action == ActionKind::CopyToTarget;
                debug!("复制: {} ({} 字节, resume={})", info.path, info.size, resume);
                let progress = |done: u64, _total: u64| {
                    inflight.store(done, Ordering::Relaxed);
                };
                transfer::copy_file(
                    source,
                    target,
                    &info.path,
                    &info.path,
                    info.size,
                    resume,
                    cancelled,
                    Some(&progress),
                )
                .await
            }
            ActionKind::CopyToSource | ActionKind::UpdateSource => {
                let Some(info) = item.target.as_ref() else {
                    bail!("计划项缺少目标端文件信息: {}", item.relative_path());
                };
                let resume = item.action == ActionKind::CopyToSource;
                debug!("反向复制: {} ({} 字节, resume={})", info.path, info.size, resume);
                let progress = |done: u64, _total: u64| {
                    inflight.store(done, Ordering::Relaxed);
                };
                transfer::copy_file(
                    target,
                    source,
                    &info.path,
                    &info.path,
                    info.size,
                    resume,
                    cancelled,
                    Some(&progress),
                )
                .await
            }
            ActionKind::DeleteTarget => {
                let path = item.relative_path();
                debug!("删除目标端: {}", path);
                if item.is_dir() {
                    target.delete_dir(path).await?;
                } else {
                    target.delete_file(path).await?;
                }
                Ok(0)
            }
            ActionKind::DeleteSource => {
                let path = item.relative_path();
                debug!("删除源端: {}", path);
                if item.is_dir() {
                    source.delete_dir(path).await?;
                } else {
                    source.delete_file(path).await?;
                }
                Ok(0)
            }
            // 记账项不会进入工作队列
            ActionKind::Conflict | ActionKind::Skip | ActionKind::Equal => Ok(0),
        }
    }

    /// 删除目标端的空目录，由深到浅级联
    async fn prune_empty_dirs(target: &dyn Storage) {
        let Ok(entries) = target.list_files(None).await else {
            return;
        };

        let mut paths: Vec<String> = entries.iter().map(|e| e.path.clone()).collect();
        let mut dirs: Vec<String> = entries
            .iter()
            .filter(|e| e.is_dir)
            .map(|e| e.path.trim_end_matches('/').to_string())
            .collect();
        // 先删深层目录，父目录随之变空
        dirs.sort_by_key(|d| std::cmp::Reverse(d.matches('/').count()));

        for dir in dirs {
            let prefix = format!("{}/", dir);
            let empty = !paths
                .iter()
                .any(|p| p.starts_with(&prefix) && p.trim_end_matches('/') != dir);
            if empty {
                match target.delete_dir(&dir).await {
                    Ok(()) => {
                        debug!("清理空目录: {}", dir);
                        paths.retain(|p| p.trim_end_matches('/') != dir);
                    }
                    Err(e) => debug!("清理空目录失败（忽略）: {} ({})", dir, e),
                }
            }
        }
    }

    /// 完整的一轮同步：连接 → 比较 → 执行 → 断开
    ///
    /// 连接失败时整轮失败，不产出部分结果；
    /// 执行期的单文件失败被隔离记录，不中止整轮（除非策略要求）。
    pub async fn sync(&self) -> Result<SyncReport> {
        let start_time = chrono::Utc::now().timestamp();
        let pass_id = uuid::Uuid::new_v4().to_string();

        // 开始前收到的取消请求作用于本轮；标志被消费后下一轮从干净状态开始
        if self.cancelled.swap(false, Ordering::SeqCst) {
            info!("同步开始前已收到取消请求 [{}]", pass_id);
            return Ok(self.cancelled_report(&pass_id, start_time));
        }

        info!(
            "开始同步 [{}]: {} -> {} (模式 {:?})",
            pass_id,
            self.policy.source.display_name(),
            self.policy.target.display_name(),
            self.policy.sync_mode
        );

        if let Err(e) = self.connect().await {
            error!("连接失败: {}", e);
            return Ok(self.failed_report(&pass_id, start_time, vec![format!("连接失败: {}", e)]));
        }

        let plan = match self.compare().await {
            Ok(plan) => plan,
            Err(e) => {
                self.disconnect().await;
                if is_cancelled(&e) {
                    info!("比较阶段被取消");
                    return Ok(self.cancelled_report(&pass_id, start_time));
                }
                error!("比较失败: {}", e);
                return Ok(self.failed_report(&pass_id, start_time, vec![format!("比较失败: {}", e)]));
            }
        };

        let report = self.execute_inner(plan, start_time, pass_id).await;
        self.disconnect().await;
        report
    }

    fn failed_report(&self, pass_id: &str, start_time: i64, errors: Vec<String>) -> SyncReport {
        let end_time = chrono::Utc::now().timestamp();
        SyncReport {
            passId: pass_id.to_string(),
            status: SyncStatus::Failed,
            copied: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            failed: 0,
            bytesTransferred: 0,
            details: Vec::new(),
            errors,
            startTime: start_time,
            endTime: end_time,
            duration: (end_time - start_time).max(0) as u64,
        }
    }

    fn cancelled_report(&self, pass_id: &str, start_time: i64) -> SyncReport {
        let end_time = chrono::Utc::now().timestamp();
        SyncReport {
            passId: pass_id.to_string(),
            status: SyncStatus::Cancelled,
            copied: 0,
            updated: 0,
            deleted: 0,
            skipped: 0,
            failed: 0,
            bytesTransferred: 0,
            details: Vec::new(),
            errors: vec!["用户取消".to_string()],
            startTime: start_time,
            endTime: end_time,
            duration: (end_time - start_time).max(0) as u64,
        }
    }
}
