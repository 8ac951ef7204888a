//! 同步过滤规则
//!
//! 在比较之前应用于两端的每个候选条目：隐藏文件、排除目录、
//! 文件名 glob 模式、大小上下限、修改时间窗口。
//! 被过滤掉的条目完全不进入计划——既不同步也不删除。

use crate::storage::FileInfo;
use chrono::{Duration, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// 时间过滤类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeFilterType {
    #[default]
    None,
    Today,
    Yesterday,
    #[serde(rename = "days_3")]
    Days3,
    #[serde(rename = "days_7")]
    Days7,
    #[serde(rename = "days_30")]
    Days30,
    Custom,
}

/// 已解析的时间窗口（Unix 秒），在一次同步过程开始时解析一次
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeWindow {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeWindow {
    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// 同步过滤规则
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    /// 包含的文件名模式（如 *.txt）；空或仅 ["*"] 表示不限制
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// 排除的文件名模式
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// 排除的目录名（匹配路径中的任意一段）
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    /// 最小文件大小（字节，0 表示不限制）
    #[serde(default)]
    pub min_size: u64,
    /// 最大文件大小（字节，0 表示不限制）
    #[serde(default)]
    pub max_size: u64,
    /// 是否同步隐藏文件
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub time_filter_type: TimeFilterType,
    /// 自定义时间范围 - 开始（ISO-8601 字符串，如 "2024-01-01T00:00:00"）
    #[serde(default)]
    pub time_filter_start: Option<String>,
    /// 自定义时间范围 - 结束
    #[serde(default)]
    pub time_filter_end: Option<String>,
}

fn default_exclude_dirs() -> Vec<String> {
    vec![
        ".git".to_string(),
        "__pycache__".to_string(),
        "node_modules".to_string(),
        ".svn".to_string(),
    ]
}

impl Default for FilterRule {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            exclude_dirs: default_exclude_dirs(),
            min_size: 0,
            max_size: 0,
            include_hidden: false,
            time_filter_type: TimeFilterType::None,
            time_filter_start: None,
            time_filter_end: None,
        }
    }
}

/// 当天 0 点往前 `days_back` 天的起始时间戳
fn day_start_ts(days_back: i64) -> i64 {
    let date = Local::now().date_naive() - Duration::days(days_back);
    date.and_hms_opt(0, 0, 0)
        .and_then(|t| t.and_local_timezone(Local).single())
        .map_or(0, |t| t.timestamp())
}

/// 解析 ISO-8601 字符串为本地时间戳，带偏移和不带偏移的格式都接受
fn parse_iso_ts(s: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .and_then(|t| t.and_local_timezone(Local).single())
        .map(|t| t.timestamp())
}

impl FilterRule {
    /// 解析时间过滤窗口。预定义窗口相对当前时间，每个同步过程解析一次
    pub fn resolve_time_window(&self) -> TimeWindow {
        let now = Local::now().timestamp();

        match self.time_filter_type {
            TimeFilterType::None => TimeWindow::default(),
            TimeFilterType::Today => TimeWindow {
                start: Some(day_start_ts(0)),
                end: Some(now),
            },
            TimeFilterType::Yesterday => TimeWindow {
                start: Some(day_start_ts(1)),
                end: Some(day_start_ts(0)),
            },
            TimeFilterType::Days3 => TimeWindow {
                start: Some(day_start_ts(3)),
                end: Some(now),
            },
            TimeFilterType::Days7 => TimeWindow {
                start: Some(day_start_ts(7)),
                end: Some(now),
            },
            TimeFilterType::Days30 => TimeWindow {
                start: Some(day_start_ts(30)),
                end: Some(now),
            },
            TimeFilterType::Custom => TimeWindow {
                start: self.time_filter_start.as_deref().and_then(parse_iso_ts),
                end: self.time_filter_end.as_deref().and_then(parse_iso_ts),
            },
        }
    }

    /// 检查条目是否应该参与同步
    pub fn should_include(&self, file: &FileInfo, window: &TimeWindow) -> bool {
        let name = file.name();

        // 隐藏文件
        if !self.include_hidden && name.starts_with('.') {
            return false;
        }

        // 排除目录：路径中的任意一段命中即排除
        if !self.exclude_dirs.is_empty() {
            for part in file.path.split('/') {
                if self.exclude_dirs.iter().any(|d| d == part) {
                    return false;
                }
            }
        }

        // 排除模式
        if self.exclude_patterns.iter().any(|p| glob_match(name, p)) {
            return false;
        }

        // 包含模式（空或仅 "*" 不限制）
        if !file.is_dir && !self.include_patterns.is_empty() {
            let match_all = self.include_patterns.len() == 1 && self.include_patterns[0] == "*";
            if !match_all && !self.include_patterns.iter().any(|p| glob_match(name, p)) {
                return false;
            }
        }

        // 文件大小限制（不对目录）
        if !file.is_dir {
            if self.min_size > 0 && file.size < self.min_size {
                return false;
            }
            if self.max_size > 0 && file.size > self.max_size {
                return false;
            }
        }

        // 时间窗口（仅对文件，且 mtime 已知时）
        if !file.is_dir && file.modified_time > 0 && !window.is_unbounded() {
            if let Some(start) = window.start {
                if file.modified_time < start {
                    return false;
                }
            }
            if let Some(end) = window.end {
                if file.modified_time > end {
                    return false;
                }
            }
        }

        true
    }
}

/// 文件名 glob 匹配（fnmatch 语义：* 任意串，? 任意单字符）
pub fn glob_match(name: &str, pattern: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c if "\\.+()[]{}^$|".contains(c) => {
                re.push('\\');
                re.push(c);
            }
            c => re.push(c),
        }
    }
    re.push('$');

    regex::Regex::new(&re).map(|re| re.is_match(name)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, size: u64, mtime: i64) -> FileInfo {
        FileInfo {
            path: path.to_string(),
            size,
            modified_time: mtime,
            is_dir: false,
            checksum: None,
        }
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("report.txt", "*.txt"));
        assert!(glob_match("a.tmp", "*.tmp"));
        assert!(!glob_match("report.txt", "*.log"));
        assert!(glob_match("data1.csv", "data?.csv"));
        assert!(!glob_match("data12.csv", "data?.csv"));
        // 正则特殊字符按字面量处理
        assert!(glob_match("a+b.txt", "a+b.*"));
    }

    #[test]
    fn test_hidden_files_excluded_by_default() {
        let rule = FilterRule::default();
        let window = TimeWindow::default();

        assert!(!rule.should_include(&file(".env", 10, 100), &window));

        let mut rule = FilterRule::default();
        rule.include_hidden = true;
        assert!(rule.should_include(&file(".env", 10, 100), &window));
    }

    #[test]
    fn test_exclude_dir_component() {
        let rule = FilterRule::default();
        let window = TimeWindow::default();

        // .git 在默认排除目录里，config 本身不是隐藏文件
        assert!(!rule.should_include(&file(".git/config", 10, 100), &window));
        assert!(rule.should_include(&file("src/config", 10, 100), &window));
    }

    #[test]
    fn test_include_exclude_patterns() {
        let mut rule = FilterRule::default();
        rule.exclude_patterns = vec!["*.tmp".to_string()];
        let window = TimeWindow::default();

        assert!(!rule.should_include(&file("cache/a.tmp", 10, 100), &window));
        assert!(rule.should_include(&file("cache/a.txt", 10, 100), &window));

        rule.include_patterns = vec!["*.txt".to_string(), "*.md".to_string()];
        assert!(rule.should_include(&file("doc/readme.md", 10, 100), &window));
        assert!(!rule.should_include(&file("doc/image.png", 10, 100), &window));

        // 仅 "*" 表示不限制
        rule.include_patterns = vec!["*".to_string()];
        assert!(rule.should_include(&file("doc/image.png", 10, 100), &window));
    }

    #[test]
    fn test_size_bounds() {
        let mut rule = FilterRule::default();
        rule.min_size = 100;
        rule.max_size = 1000;
        let window = TimeWindow::default();

        assert!(!rule.should_include(&file("small.bin", 50, 100), &window));
        assert!(rule.should_include(&file("mid.bin", 500, 100), &window));
        assert!(!rule.should_include(&file("big.bin", 5000, 100), &window));
    }

    #[test]
    fn test_custom_time_window() {
        let mut rule = FilterRule::default();
        rule.time_filter_type = TimeFilterType::Custom;
        rule.time_filter_start = Some("2024-01-01T00:00:00".to_string());
        rule.time_filter_end = Some("2024-06-30T23:59:59".to_string());

        let window = rule.resolve_time_window();
        let start = window.start.unwrap();
        let end = window.end.unwrap();
        assert!(start < end);

        assert!(rule.should_include(&file("in.txt", 10, start + 3600), &window));
        assert!(!rule.should_include(&file("before.txt", 10, start - 3600), &window));
        assert!(!rule.should_include(&file("after.txt", 10, end + 3600), &window));
        // mtime 未知（0）的文件不受时间窗口影响
        assert!(rule.should_include(&file("unknown.txt", 10, 0), &window));
    }

    #[test]
    fn test_predefined_windows_relative_to_now() {
        let mut rule = FilterRule::default();
        rule.time_filter_type = TimeFilterType::Days7;
        let window = rule.resolve_time_window();

        let now = Local::now().timestamp();
        assert!(rule.should_include(&file("fresh.txt", 10, now - 3600), &window));
        // 10 天前的文件在 7 天窗口之外
        assert!(!rule.should_include(&file("stale.txt", 10, now - 10 * 86400), &window));
    }
}
