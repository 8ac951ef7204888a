//! 分块文件传输
//!
//! 引擎的传输原语：固定大小分块流式复制，支持断点续传、节流的进度回调
//! 和块间协作取消。后端不支持追加写入时降级为整文件复制。

use crate::error::{is_unsupported, SyncError};
use crate::storage::Storage;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// 传输块大小（512KB，限制单块内存占用并保证取消响应）
pub const CHUNK_SIZE: u64 = 512 * 1024;

/// 进度回调的最小间隔
const PROGRESS_INTERVAL: Duration = Duration::from_millis(300);

/// 传输进度回调：(已传输字节, 总字节)。
/// 带生命周期参数，允许调用方传入借用局部状态的闭包。
pub type TransferProgressFn<'a> = dyn Fn(u64, u64) + Send + Sync + 'a;

/// 复制单个文件，返回本次实际传输的字节数
///
/// `resume` 为 true 且目标端已有小于 `expected_size` 的部分文件时，
/// 从该偏移续传（追加），不从头重传。覆盖性更新传 `resume=false`。
/// 取消标志在每个块之间检查，置位后以 `SyncError::Cancelled` 中止。
#[allow(clippy::too_many_arguments)]
pub async fn copy_file(
    from: &dyn Storage,
    to: &dyn Storage,
    from_path: &str,
    to_path: &str,
    expected_size: u64,
    resume: bool,
    cancelled: &AtomicBool,
    progress: Option<&TransferProgressFn<'_>>,
) -> Result<u64> {
    if cancelled.load(Ordering::SeqCst) {
        return Err(SyncError::Cancelled.into());
    }

    // 空文件直接落盘
    if expected_size == 0 {
        to.write(to_path, Vec::new()).await?;
        return Ok(0);
    }

    // 断点续传：目标端已有的部分文件决定起始偏移
    let offset = if resume {
        match to.stat(to_path).await? {
            Some(meta) if !meta.is_dir && meta.size > 0 && meta.size < expected_size => {
                debug!(
                    "断点续传: {} 已有 {} 字节，从偏移处继续 (总 {} 字节)",
                    to_path, meta.size, expected_size
                );
                meta.size
            }
            _ => 0,
        }
    } else {
        0
    };

    // 小文件且无续传偏移：整块读写，避免分块开销
    if offset == 0 && expected_size <= CHUNK_SIZE {
        let data = from.read(from_path).await?;
        let len = data.len() as u64;
        to.write(to_path, data).await?;
        if let Some(progress) = progress {
            progress(len, expected_size);
        }
        return Ok(len);
    }

    match copy_chunked(from, to, from_path, to_path, expected_size, offset, cancelled, progress)
        .await
    {
        Ok(bytes) => Ok(bytes),
        Err(err) if is_unsupported(&err) => {
            // 后端不支持追加写入，降级为整文件复制
            warn!("{} 不支持追加写入，降级为整文件复制: {}", to.name(), to_path);
            if cancelled.load(Ordering::SeqCst) {
                return Err(SyncError::Cancelled.into());
            }
            let data = from.read(from_path).await?;
            let len = data.len() as u64;
            to.write(to_path, data).await?;
            if let Some(progress) = progress {
                progress(len, expected_size);
            }
            Ok(len)
        }
        Err(err) => Err(err),
    }
}

/// 分块复制主循环
#[allow(clippy::too_many_arguments)]
async fn copy_chunked(
    from: &dyn Storage,
    to: &dyn Storage,
    from_path: &str,
    to_path: &str,
    expected_size: u64,
    offset: u64,
    cancelled: &AtomicBool,
    progress: Option<&TransferProgressFn<'_>>,
) -> Result<u64> {
    let mut pos = offset;
    let mut transferred: u64 = 0;
    let mut last_emit = Instant::now();

    while pos < expected_size {
        if cancelled.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled.into());
        }

        let want = CHUNK_SIZE.min(expected_size - pos);
        let chunk = from.read_range(from_path, pos, want).await?;
        if chunk.is_empty() {
            // 源文件比清单中的尺寸短（扫描后被改动），按已有内容收尾
            warn!("源文件提前结束: {} (offset={}, 预期 {})", from_path, pos, expected_size);
            break;
        }

        let len = chunk.len() as u64;
        if pos == 0 {
            // 第一块覆盖写，截断目标端的旧内容
            to.write(to_path, chunk).await?;
        } else {
            to.append(to_path, chunk).await?;
        }

        pos += len;
        transferred += len;

        if let Some(progress) = progress {
            if last_emit.elapsed() >= PROGRESS_INTERVAL {
                progress(pos, expected_size);
                last_emit = Instant::now();
            }
        }

        if len < want {
            break;
        }
    }

    if let Some(progress) = progress {
        progress(pos, expected_size);
    }

    debug!(
        "传输完成: {} -> {} (本次 {} 字节, 起始偏移 {})",
        from_path, to_path, transferred, offset
    );

    Ok(transferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use std::sync::Arc;

    fn make_pair() -> (tempfile::TempDir, LocalStorage, tempfile::TempDir, LocalStorage) {
        let src_dir = tempfile::tempdir().unwrap();
        let dst_dir = tempfile::tempdir().unwrap();
        let src = LocalStorage::new(src_dir.path().to_str().unwrap()).unwrap();
        let dst = LocalStorage::new(dst_dir.path().to_str().unwrap()).unwrap();
        (src_dir, src, dst_dir, dst)
    }

    #[tokio::test]
    async fn test_whole_file_copy() {
        let (_s, src, _d, dst) = make_pair();
        let flag = AtomicBool::new(false);

        src.write("a.bin", vec![7u8; 1000]).await.unwrap();
        let bytes = copy_file(&src, &dst, "a.bin", "a.bin", 1000, true, &flag, None)
            .await
            .unwrap();

        assert_eq!(bytes, 1000);
        assert_eq!(dst.read("a.bin").await.unwrap(), vec![7u8; 1000]);
    }

    #[tokio::test]
    async fn test_resume_transfers_only_missing_tail() {
        let (_s, src, _d, dst) = make_pair();
        let flag = AtomicBool::new(false);

        // 源 1000 字节，目标已有前 400 字节
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        src.write("big.bin", content.clone()).await.unwrap();
        dst.write("big.bin", content[..400].to_vec()).await.unwrap();

        let bytes = copy_file(&src, &dst, "big.bin", "big.bin", 1000, true, &flag, None)
            .await
            .unwrap();

        // 只传缺失的 600 字节，最终内容完整
        assert_eq!(bytes, 600);
        assert_eq!(dst.read("big.bin").await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_no_resume_retransfers_in_full() {
        let (_s, src, _d, dst) = make_pair();
        let flag = AtomicBool::new(false);

        let content = vec![3u8; 1000];
        src.write("f.bin", content.clone()).await.unwrap();
        // 目标端已有与源不一致的部分内容
        dst.write("f.bin", vec![9u8; 400]).await.unwrap();

        let bytes = copy_file(&src, &dst, "f.bin", "f.bin", 1000, false, &flag, None)
            .await
            .unwrap();

        assert_eq!(bytes, 1000);
        assert_eq!(dst.read("f.bin").await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_zero_byte_file() {
        let (_s, src, _d, dst) = make_pair();
        let flag = AtomicBool::new(false);

        src.write("empty", Vec::new()).await.unwrap();
        let bytes = copy_file(&src, &dst, "empty", "empty", 0, true, &flag, None)
            .await
            .unwrap();

        assert_eq!(bytes, 0);
        assert!(dst.exists("empty").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (_s, src, _d, dst) = make_pair();
        let flag = AtomicBool::new(true);

        src.write("a.bin", vec![1u8; 100]).await.unwrap();
        let err = copy_file(&src, &dst, "a.bin", "a.bin", 100, true, &flag, None)
            .await
            .unwrap_err();
        assert!(crate::error::is_cancelled(&err));
    }

    #[tokio::test]
    async fn test_progress_closure_may_borrow_local_counter() {
        use std::sync::atomic::AtomicU64;

        let (_s, src, _d, dst) = make_pair();
        let flag = AtomicBool::new(false);
        // 引擎的在途字节计数就是这样借用的：闭包只借用局部原子，不要求 'static
        let inflight = AtomicU64::new(0);

        src.write("a.bin", vec![2u8; 300]).await.unwrap();
        let progress = |done: u64, _total: u64| {
            inflight.store(done, Ordering::Relaxed);
        };
        let bytes = copy_file(&src, &dst, "a.bin", "a.bin", 300, false, &flag, Some(&progress))
            .await
            .unwrap();

        assert_eq!(bytes, 300);
        assert_eq!(inflight.load(Ordering::Relaxed), 300);
    }

    #[tokio::test]
    async fn test_progress_reports_final_total() {
        let (_s, src, _d, dst) = make_pair();
        let flag = AtomicBool::new(false);

        // 超过一个块，走分块路径
        let size = CHUNK_SIZE * 2 + 100;
        src.write("big.bin", vec![5u8; size as usize]).await.unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let progress = move |done: u64, total: u64| {
            seen_cb.lock().unwrap().push((done, total));
        };

        // 制造一个续传偏移，确保进入分块循环
        dst.write("big.bin", vec![5u8; 100]).await.unwrap();
        let bytes = copy_file(
            &src,
            &dst,
            "big.bin",
            "big.bin",
            size,
            true,
            &flag,
            Some(&progress),
        )
        .await
        .unwrap();

        assert_eq!(bytes, size - 100);
        let seen = seen.lock().unwrap();
        // 收尾时一定上报一次完整进度
        assert_eq!(*seen.last().unwrap(), (size, size));
    }
}
