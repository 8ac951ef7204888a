//! 同步引擎端到端测试（本地端点）

use std::fs;
use std::path::Path;
use syncore::{
    ActionKind, EndpointConfig, FileInfo, SyncEngine, SyncItem, SyncMode, SyncPolicy, SyncStatus,
};
use tempfile::TempDir;

fn local_policy(src: &Path, dst: &Path, mode: SyncMode) -> SyncPolicy {
    let mut policy: SyncPolicy = serde_json::from_str(&format!(
        r#"{{"source": {{"type": "local", "path": {src:?}}},
            "target": {{"type": "local", "path": {dst:?}}}}}"#,
        src = src.to_str().unwrap(),
        dst = dst.to_str().unwrap(),
    ))
    .unwrap();
    policy.sync_mode = mode;
    policy.max_concurrent = 1;
    policy
}

fn write_file(root: &Path, name: &str, content: &[u8]) {
    let path = root.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[tokio::test]
async fn test_mirror_end_to_end() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_file(src.path(), "a.txt", &[1u8; 100]);
    write_file(src.path(), "b.txt", &[2u8; 50]);

    let engine = SyncEngine::new(local_policy(src.path(), dst.path(), SyncMode::Mirror));
    let report = engine.sync().await.unwrap();

    assert_eq!(report.status, SyncStatus::Completed);
    assert!(report.success());
    assert_eq!(report.copied, 2);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(report.bytesTransferred, 150);
    assert_eq!(fs::read(dst.path().join("a.txt")).unwrap(), vec![1u8; 100]);
    assert_eq!(fs::read(dst.path().join("b.txt")).unwrap(), vec![2u8; 50]);
}

#[tokio::test]
async fn test_mirror_deletes_extra_and_prunes_dirs() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_file(src.path(), "keep.txt", b"keep");
    write_file(dst.path(), "keep.txt", b"keep");
    write_file(dst.path(), "old/extra.txt", b"extra");

    let mut policy = local_policy(src.path(), dst.path(), SyncMode::Mirror);
    policy.delete_extra = true;

    let engine = SyncEngine::new(policy);
    let report = engine.sync().await.unwrap();

    assert!(report.success());
    assert_eq!(report.deleted, 1);
    assert!(!dst.path().join("old/extra.txt").exists());
    // 删空的目录被清理
    assert!(!dst.path().join("old").exists());
}

#[tokio::test]
async fn test_update_never_deletes() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_file(src.path(), "a.txt", b"hello");
    write_file(dst.path(), "a.txt", b"hello");
    write_file(dst.path(), "b.txt", b"target only");

    let mut policy = local_policy(src.path(), dst.path(), SyncMode::Update);
    policy.delete_extra = true; // 更新模式下不生效

    let engine = SyncEngine::new(policy);
    let report = engine.sync().await.unwrap();

    assert!(report.success());
    assert_eq!(report.deleted, 0);
    assert!(dst.path().join("b.txt").exists());
}

#[tokio::test]
async fn test_execute_resumes_partial_file() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    write_file(src.path(), "big.bin", &content);
    // 目标端已有前 400 字节的部分文件
    write_file(dst.path(), "big.bin", &content[..400]);

    let engine = SyncEngine::new(local_policy(src.path(), dst.path(), SyncMode::Mirror));
    engine.connect().await.unwrap();

    let plan = vec![SyncItem {
        source: Some(FileInfo {
            path: "big.bin".to_string(),
            size: 1000,
            modified_time: 0,
            is_dir: false,
            checksum: None,
        }),
        target: None,
        action: ActionKind::CopyToTarget,
        reason: String::new(),
    }];
    let report = engine.execute(plan).await.unwrap();
    engine.disconnect().await;

    // 只传缺失的 600 字节，最终文件完整
    assert!(report.success());
    assert_eq!(report.bytesTransferred, 600);
    assert_eq!(fs::read(dst.path().join("big.bin")).unwrap(), content);
}

#[tokio::test]
async fn test_cancel_before_execute() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    for i in 0..10 {
        write_file(src.path(), &format!("f{}.txt", i), &[0u8; 100]);
    }

    let engine = SyncEngine::new(local_policy(src.path(), dst.path(), SyncMode::Mirror));
    engine.connect().await.unwrap();
    let plan = engine.compare().await.unwrap();
    assert_eq!(plan.len(), 10);

    engine.cancel();
    let report = engine.execute(plan).await.unwrap();
    engine.disconnect().await;

    assert_eq!(report.status, SyncStatus::Cancelled);
    assert!(!report.success());
    // 取消前没有动作开始执行
    assert_eq!(report.copied, 0);
}

#[tokio::test]
async fn test_cancel_before_sync_applies_to_next_pass() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_file(src.path(), "a.txt", b"data");

    let engine = SyncEngine::new(local_policy(src.path(), dst.path(), SyncMode::Mirror));

    // sync 开始前的取消请求不被丢弃，作用于接下来的一轮
    engine.cancel();
    let report = engine.sync().await.unwrap();
    assert_eq!(report.status, SyncStatus::Cancelled);
    assert_eq!(report.copied, 0);
    assert!(!dst.path().join("a.txt").exists());

    // 标志在那一轮被消费，随后的 sync 正常完成
    let report = engine.sync().await.unwrap();
    assert!(report.success());
    assert_eq!(report.copied, 1);
    assert!(dst.path().join("a.txt").exists());
}

#[tokio::test]
async fn test_concurrent_execution_exact_counters() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    for i in 0..100 {
        write_file(src.path(), &format!("dir{}/f{}.bin", i % 5, i), &[7u8; 10]);
    }

    let mut policy = local_policy(src.path(), dst.path(), SyncMode::Mirror);
    policy.max_concurrent = 4;

    let engine = SyncEngine::new(policy);
    let report = engine.sync().await.unwrap();

    // 计数不重不漏
    assert!(report.success());
    assert_eq!(report.copied, 100);
    assert_eq!(report.failed, 0);
    assert_eq!(report.bytesTransferred, 1000);
    assert_eq!(report.details.len(), 100);
    assert!(report.details.iter().all(|d| d.success));

    for i in 0..100 {
        assert!(dst.path().join(format!("dir{}/f{}.bin", i % 5, i)).exists());
    }
}

#[tokio::test]
async fn test_two_way_copies_back() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_file(src.path(), "from_source.txt", b"s");
    write_file(dst.path(), "from_target.txt", b"t");

    let engine = SyncEngine::new(local_policy(src.path(), dst.path(), SyncMode::TwoWay));
    let report = engine.sync().await.unwrap();

    assert!(report.success());
    assert_eq!(report.copied, 2);
    assert!(src.path().join("from_target.txt").exists());
    assert!(dst.path().join("from_source.txt").exists());
}

#[tokio::test]
async fn test_filtered_files_not_synced_or_deleted() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_file(src.path(), "data.txt", b"data");
    write_file(src.path(), "junk.tmp", b"junk");
    // 目标端多出的 .tmp 文件同样在过滤范围外，镜像删除也不碰它
    write_file(dst.path(), "leftover.tmp", b"leftover");

    let mut policy = local_policy(src.path(), dst.path(), SyncMode::Mirror);
    policy.delete_extra = true;
    policy.filter_rule.exclude_patterns = vec!["*.tmp".to_string()];

    let engine = SyncEngine::new(policy);
    let report = engine.sync().await.unwrap();

    assert!(report.success());
    assert_eq!(report.copied, 1);
    assert_eq!(report.deleted, 0);
    assert!(dst.path().join("data.txt").exists());
    assert!(!dst.path().join("junk.tmp").exists());
    assert!(dst.path().join("leftover.tmp").exists());
}

#[tokio::test]
async fn test_progress_callbacks_fire() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();
    write_file(src.path(), "a.txt", &[1u8; 64]);
    write_file(src.path(), "b.txt", &[2u8; 64]);

    let completed = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let completed_cb = completed.clone();

    let engine = SyncEngine::new(local_policy(src.path(), dst.path(), SyncMode::Mirror))
        .on_file_completed(move |path, action, success, bytes| {
            completed_cb
                .lock()
                .unwrap()
                .push((path.to_string(), action, success, bytes));
        });
    let report = engine.sync().await.unwrap();

    assert!(report.success());
    let completed = completed.lock().unwrap();
    assert_eq!(completed.len(), 2);
    assert!(completed.iter().all(|(_, action, success, bytes)| {
        *action == ActionKind::CopyToTarget && *success && *bytes == 64
    }));
}

#[tokio::test]
async fn test_connect_failure_gives_failed_report() {
    let src = TempDir::new().unwrap();
    let dst = TempDir::new().unwrap();

    let mut policy = local_policy(src.path(), dst.path(), SyncMode::Mirror);
    // host 为空的 FTP 端点无法构造连接
    policy.target = EndpointConfig {
        kind: syncore::EndpointKind::Ftp,
        ..EndpointConfig::local("")
    };

    let engine = SyncEngine::new(policy);
    let report = engine.sync().await.unwrap();

    assert_eq!(report.status, SyncStatus::Failed);
    assert!(!report.success());
    assert!(!report.errors.is_empty());
    assert!(report.details.is_empty());
}
