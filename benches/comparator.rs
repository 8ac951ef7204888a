use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use syncore::storage::LocalStorage;
use syncore::{FileComparator, FileInfo, SyncPolicy};

fn make_tree(count: usize, base_mtime: i64) -> HashMap<String, FileInfo> {
    (0..count)
        .map(|i| {
            let path = format!("dir{}/file_{:06}.dat", i % 64, i);
            (
                path.clone(),
                FileInfo {
                    path,
                    size: (i as u64 % 4096) + 1,
                    modified_time: base_mtime + (i as i64 % 7),
                    is_dir: false,
                    checksum: None,
                },
            )
        })
        .collect()
}

fn bench_compare(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let storage = LocalStorage::new("/tmp").unwrap();

    let policy: SyncPolicy = serde_json::from_str(
        r#"{
            "source": {"type": "local", "path": "/tmp/a"},
            "target": {"type": "local", "path": "/tmp/b"},
            "syncMode": "mirror",
            "deleteExtra": true
        }"#,
    )
    .unwrap();

    // 源 10k 条目，目标一半重合一半漂移：覆盖复制、更新、删除、一致四类决策
    let source = make_tree(10_000, 1_700_000_000);
    let mut target = make_tree(5_000, 1_700_000_000);
    target.extend(make_tree(10_000, 1_600_000_000).into_iter().skip(5_000));

    c.bench_function("compare_10k_mirror", |b| {
        b.iter(|| {
            rt.block_on(async {
                FileComparator::new()
                    .compare(
                        black_box(&source),
                        black_box(&target),
                        &policy,
                        &storage,
                        &storage,
                    )
                    .await
                    .unwrap()
            })
        })
    });
}

criterion_group!(benches, bench_compare);
criterion_main!(benches);
