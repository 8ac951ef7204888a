//! 日志模块 - 文件日志、大小轮转与 tracing 初始化

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_enabled() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 从配置目录的 config.json 中读取 "log" 片段
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        if config_file.exists() {
            if let Ok(content) = fs::read_to_string(&config_file) {
                if let Ok(config) = serde_json::from_str::<serde_json::Value>(&content) {
                    if let Some(log_config) = config.get("log") {
                        if let Ok(log) = serde_json::from_value::<LogConfig>(log_config.clone()) {
                            return log;
                        }
                    }
                }
            }
        }
        Self::default()
    }

    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;

        let file_path = log_dir.join("app.log");
        let max_size = (max_size_mb as u64) * 1024 * 1024;

        let writer = Self::open_file(&file_path, max_size)?;

        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        // 现有文件超限时先轮转
        if file_path.exists() {
            if let Ok(metadata) = fs::metadata(file_path) {
                if metadata.len() > max_size {
                    Self::rotate_log(file_path)?;
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(file_path)?;

        Ok(BufWriter::new(file))
    }

    /// 轮转日志文件：当前日志改名为 app.log.old
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = file_path.with_extension("log.old");

        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }

        fs::rename(file_path, &backup_path)?;

        Ok(())
    }

    fn check_and_rotate(&self) -> io::Result<()> {
        if self.file_path.exists() {
            if let Ok(metadata) = fs::metadata(&self.file_path) {
                if metadata.len() > self.max_size {
                    let mut writer_guard = self.writer.lock().unwrap();

                    if let Some(mut w) = writer_guard.take() {
                        let _ = w.flush();
                    }

                    Self::rotate_log(&self.file_path)?;

                    let new_writer = Self::open_file(&self.file_path, self.max_size)?;
                    *writer_guard = Some(new_writer);
                }
            }
        }
        Ok(())
    }
}

impl Clone for SizeRotatingWriter {
    fn clone(&self) -> Self {
        Self {
            file_path: self.file_path.clone(),
            max_size: self.max_size,
            writer: self.writer.clone(),
        }
    }
}

/// 日志写入器包装
pub struct LogWriter {
    inner: Arc<Mutex<Option<BufWriter<File>>>>,
    file_path: PathBuf,
    max_size: u64,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.inner.lock().unwrap();

        if let Some(ref mut writer) = *guard {
            let result = writer.write(buf)?;
            writer.flush()?;

            // 写入后检查文件大小，超限则轮转
            drop(guard);
            if self.file_path.exists() {
                if let Ok(metadata) = fs::metadata(&self.file_path) {
                    if metadata.len() > self.max_size {
                        let mut guard = self.inner.lock().unwrap();
                        if let Some(mut w) = guard.take() {
                            let _ = w.flush();
                        }

                        let _ = SizeRotatingWriter::rotate_log(&self.file_path);

                        if let Ok(new_writer) =
                            SizeRotatingWriter::open_file(&self.file_path, self.max_size)
                        {
                            *guard = Some(new_writer);
                        }
                    }
                }
            }

            Ok(result)
        } else {
            Err(io::Error::new(io::ErrorKind::Other, "Writer not available"))
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(ref mut writer) = *guard {
            writer.flush()
        } else {
            Ok(())
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let _ = self.check_and_rotate();

        LogWriter {
            inner: self.writer.clone(),
            file_path: self.file_path.clone(),
            max_size: self.max_size,
        }
    }
}

/// 初始化日志系统
///
/// 宿主进程调用一次；返回的 guard 需要存活到进程结束，
/// 否则异步写入线程会提前退出丢失日志。
pub fn init(
    log_dir: &Path,
    config: &LogConfig,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    if !config.enabled {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(config.tracing_level().into())
        .add_directive("opendal=warn".parse().unwrap());

    match SizeRotatingWriter::new(log_dir, config.max_size_mb) {
        Ok(file_writer) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file_writer.make_writer());
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let subscriber = tracing_subscriber::registry().with(env_filter).with(file_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            eprintln!("创建文件日志失败: {}", e);
            let console_layer = tracing_subscriber::fmt::layer().with_target(false);
            let subscriber = tracing_subscriber::registry().with(env_filter).with(console_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            None
        }
    }
}
