//! 文件比较器
//!
//! 纯函数式的核心：给定两端的文件清单和同步策略，产出一份有序的动作计划。
//! 目录不参与动作计算（复制时按需创建，镜像模式的多余目录在执行后统一清理）。

use crate::config::{CompareMethod, ConflictResolution, SyncPolicy, SyncMode};
use crate::storage::{FileInfo, Storage};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// 同步动作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// 复制到目标端（目标不存在）
    CopyToTarget,
    /// 复制到源端（双向同步，源不存在）
    CopyToSource,
    /// 覆盖目标端文件
    UpdateTarget,
    /// 覆盖源端文件（双向同步）
    UpdateSource,
    /// 删除目标端文件
    DeleteTarget,
    /// 删除源端文件
    DeleteSource,
    /// 冲突，留给用户决定
    Conflict,
    /// 按策略跳过
    Skip,
    /// 两端一致
    Equal,
}

impl ActionKind {
    /// 是否需要实际执行（非记账项）
    pub fn is_actionable(&self) -> bool {
        !matches!(self, ActionKind::Equal | ActionKind::Skip | ActionKind::Conflict)
    }

    /// 排序权重：传输在前、删除在后，记账项最后
    fn rank(&self) -> u8 {
        match self {
            ActionKind::CopyToTarget => 0,
            ActionKind::CopyToSource => 1,
            ActionKind::UpdateTarget => 2,
            ActionKind::UpdateSource => 3,
            ActionKind::DeleteTarget => 4,
            ActionKind::DeleteSource => 5,
            ActionKind::Conflict => 6,
            ActionKind::Skip => 7,
            ActionKind::Equal => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CopyToTarget => "copy_to_target",
            ActionKind::CopyToSource => "copy_to_source",
            ActionKind::UpdateTarget => "update_target",
            ActionKind::UpdateSource => "update_source",
            ActionKind::DeleteTarget => "delete_target",
            ActionKind::DeleteSource => "delete_source",
            ActionKind::Conflict => "conflict",
            ActionKind::Skip => "skip",
            ActionKind::Equal => "equal",
        }
    }
}

/// 计划中的一项动作
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItem {
    pub source: Option<FileInfo>,
    pub target: Option<FileInfo>,
    pub action: ActionKind,
    /// 人类可读的决策原因（日志用，不做机器解析）
    pub reason: String,
}

impl SyncItem {
    /// 相对路径：优先取源端。不变式：两端至少有一端存在
    pub fn relative_path(&self) -> &str {
        self.source
            .as_ref()
            .map(|f| f.path.as_str())
            .or_else(|| self.target.as_ref().map(|f| f.path.as_str()))
            .unwrap_or("")
    }

    pub fn is_dir(&self) -> bool {
        self.source
            .as_ref()
            .or(self.target.as_ref())
            .map(|f| f.is_dir)
            .unwrap_or(false)
    }

    /// 传输该项需要的字节数（删除和记账项为 0）
    pub fn transfer_size(&self) -> u64 {
        match self.action {
            ActionKind::CopyToTarget | ActionKind::UpdateTarget => {
                self.source.as_ref().map(|f| f.size).unwrap_or(0)
            }
            ActionKind::CopyToSource | ActionKind::UpdateSource => {
                self.target.as_ref().map(|f| f.size).unwrap_or(0)
            }
            _ => 0,
        }
    }
}

/// 计划统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionSummary {
    pub copy_count: usize,
    pub update_count: usize,
    pub delete_count: usize,
    pub conflict_count: usize,
    pub skip_count: usize,
    pub equal_count: usize,
    /// 计划传输的总字节数
    pub transfer_bytes: u64,
}

impl ActionSummary {
    pub fn of(plan: &[SyncItem]) -> Self {
        let mut summary = Self::default();
        for item in plan {
            match item.action {
                ActionKind::CopyToTarget | ActionKind::CopyToSource => summary.copy_count += 1,
                ActionKind::UpdateTarget | ActionKind::UpdateSource => summary.update_count += 1,
                ActionKind::DeleteTarget | ActionKind::DeleteSource => summary.delete_count += 1,
                ActionKind::Conflict => summary.conflict_count += 1,
                ActionKind::Skip => summary.skip_count += 1,
                ActionKind::Equal => summary.equal_count += 1,
            }
            summary.transfer_bytes += item.transfer_size();
        }
        summary
    }

    /// 需要实际执行的动作数
    pub fn actionable_count(&self) -> usize {
        self.copy_count + self.update_count + self.delete_count
    }
}

/// 两个文件之间的差异判定结果
enum Difference {
    None,
    Size,
    Time,
    Hash,
}

/// 文件比较器
pub struct FileComparator {
    /// 时间容差（秒），吸收文件系统时间戳精度差异
    time_tolerance_seconds: i64,
}

impl Default for FileComparator {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: 2,
        }
    }
}

impl FileComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 比较两端清单，产出有序动作计划
    ///
    /// 输入清单已经过滤（见 scanner）。`hash` 比较方式需要逐对读取内容，
    /// 所以这里拿两端的 Storage 引用；其余方式不做任何 I/O。
    /// 相同输入产出相同计划（按动作类型和路径排序）。
    pub async fn compare(
        &self,
        source: &HashMap<String, FileInfo>,
        target: &HashMap<String, FileInfo>,
        policy: &SyncPolicy,
        source_storage: &dyn Storage,
        target_storage: &dyn Storage,
    ) -> Result<Vec<SyncItem>> {
        let mut plan = Vec::new();

        for (path, src) in source {
            if src.is_dir {
                continue;
            }

            let item = match target.get(path) {
                None => SyncItem {
                    source: Some(src.clone()),
                    target: None,
                    action: ActionKind::CopyToTarget,
                    reason: "目标端不存在".to_string(),
                },
                // 目标端同名条目是目录：目录不参与文件比较，按不存在处理
                Some(dst) if dst.is_dir => SyncItem {
                    source: Some(src.clone()),
                    target: None,
                    action: ActionKind::CopyToTarget,
                    reason: "目标端不存在（同名路径是目录）".to_string(),
                },
                Some(dst) => {
                    let diff = self
                        .difference(src, dst, policy.compare_method, source_storage, target_storage)
                        .await?;
                    self.resolve(src, dst, diff, policy)
                }
            };

            plan.push(item);
        }

        // 目标端独有的条目
        for (path, dst) in target {
            if dst.is_dir || source.contains_key(path) {
                continue;
            }

            match policy.sync_mode {
                SyncMode::Mirror if policy.delete_extra => plan.push(SyncItem {
                    source: None,
                    target: Some(dst.clone()),
                    action: ActionKind::DeleteTarget,
                    reason: "镜像模式：目标端多余文件".to_string(),
                }),
                SyncMode::TwoWay => plan.push(SyncItem {
                    source: None,
                    target: Some(dst.clone()),
                    action: ActionKind::CopyToSource,
                    reason: "双向同步：源端不存在".to_string(),
                }),
                // 其余模式对目标端独有文件不产出任何计划项
                _ => {}
            }
        }

        // 按动作类型和路径排序，保证相同输入产出相同计划
        plan.sort_by(|a, b| {
            a.action
                .rank()
                .cmp(&b.action.rank())
                .then_with(|| a.relative_path().cmp(b.relative_path()))
        });

        Ok(plan)
    }

    /// 按比较方式判定两个文件是否有差异
    async fn difference(
        &self,
        src: &FileInfo,
        dst: &FileInfo,
        method: CompareMethod,
        source_storage: &dyn Storage,
        target_storage: &dyn Storage,
    ) -> Result<Difference> {
        match method {
            CompareMethod::Size => {
                if src.size != dst.size {
                    Ok(Difference::Size)
                } else {
                    Ok(Difference::None)
                }
            }
            CompareMethod::Time => {
                if self.time_differs(src, dst) {
                    Ok(Difference::Time)
                } else {
                    Ok(Difference::None)
                }
            }
            CompareMethod::TimeSize => {
                if src.size != dst.size {
                    Ok(Difference::Size)
                } else if self.time_differs(src, dst) {
                    Ok(Difference::Time)
                } else {
                    Ok(Difference::None)
                }
            }
            CompareMethod::Hash => {
                // 只对相遇的文件对逐个计算，绝不做全量预扫
                let src_sum = match &src.checksum {
                    Some(sum) => sum.clone(),
                    None => source_storage.checksum(&src.path).await?,
                };
                let dst_sum = match &dst.checksum {
                    Some(sum) => sum.clone(),
                    None => target_storage.checksum(&dst.path).await?,
                };
                if src_sum != dst_sum {
                    debug!("文件内容不同: {} (src={}, dst={})", src.path, src_sum, dst_sum);
                    Ok(Difference::Hash)
                } else {
                    Ok(Difference::None)
                }
            }
        }
    }

    fn time_differs(&self, src: &FileInfo, dst: &FileInfo) -> bool {
        (src.modified_time - dst.modified_time).abs() > self.time_tolerance_seconds
    }

    /// 有差异时按同步模式决定动作
    fn resolve(
        &self,
        src: &FileInfo,
        dst: &FileInfo,
        diff: Difference,
        policy: &SyncPolicy,
    ) -> SyncItem {
        let make = |action: ActionKind, reason: &str| SyncItem {
            source: Some(src.clone()),
            target: Some(dst.clone()),
            action,
            reason: reason.to_string(),
        };

        let diff_reason = match diff {
            Difference::None => return make(ActionKind::Equal, "两端一致"),
            Difference::Size => "文件大小不同",
            Difference::Time => "修改时间不同",
            Difference::Hash => "内容校验和不同",
        };

        match policy.sync_mode {
            // 镜像/备份：源无条件覆盖目标
            SyncMode::Mirror | SyncMode::Backup => {
                make(ActionKind::UpdateTarget, &format!("{}，源端覆盖", diff_reason))
            }
            // 更新：仅源端严格更新时覆盖，否则跳过
            SyncMode::Update => {
                if src.modified_time > dst.modified_time {
                    make(ActionKind::UpdateTarget, &format!("{}，源端较新", diff_reason))
                } else {
                    make(ActionKind::Skip, &format!("{}，源端不比目标新", diff_reason))
                }
            }
            SyncMode::TwoWay => match policy.conflict_resolution {
                ConflictResolution::Source => {
                    make(ActionKind::UpdateTarget, &format!("{}，源端优先", diff_reason))
                }
                ConflictResolution::Target => {
                    make(ActionKind::UpdateSource, &format!("{}，目标端优先", diff_reason))
                }
                ConflictResolution::Newer => {
                    // 严格比较修改时间；相等时跳过，即使内容可能不同也不做校验
                    if src.modified_time > dst.modified_time {
                        make(ActionKind::UpdateTarget, &format!("{}，源端较新", diff_reason))
                    } else if dst.modified_time > src.modified_time {
                        make(ActionKind::UpdateSource, &format!("{}，目标端较新", diff_reason))
                    } else {
                        make(ActionKind::Skip, &format!("{}，修改时间相同", diff_reason))
                    }
                }
                ConflictResolution::Skip => {
                    make(ActionKind::Conflict, &format!("{}，需要手动处理", diff_reason))
                }
            },
        }
    }
}
