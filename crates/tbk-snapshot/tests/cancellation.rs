//! Dropping a snapshot or restore future part way through.

mod common;

use std::path::Path;
use std::time::Duration;

use common::{assert_same_tree, committed, Fixture, GatedStore};
use tbk_snapshot::RestoreOptions;

const STALL_TIMEOUT: Duration = Duration::from_secs(30);

fn noise(len: usize, mut state: u64) -> Vec<u8> {
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            b'a' + (state % 26) as u8
        })
        .collect()
}

fn regular_files(dir: &Path) -> Vec<String> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.extend(regular_files(&path));
        } else {
            out.push(path.display().to_string());
        }
    }
    out
}

#[tokio::test]
async fn dropped_snapshot_commits_nothing_and_releases_the_lock() {
    let fx = Fixture::new();
    for i in 0..6 {
        fx.write(&format!("f{i}.txt"), format!("file number {i}").as_bytes());
    }

    let gated = GatedStore::puts(fx.store.clone(), 2);
    let engine = fx.engine_with(gated.clone());
    let mut snapshot = Box::pin(engine.snapshot());
    tokio::time::timeout(STALL_TIMEOUT, async {
        tokio::select! {
            outcome = &mut snapshot => panic!("snapshot finished with uploads stalled: {outcome:?}"),
            _ = gated.entered.notified() => {}
        }
    })
    .await
    .expect("no chunk upload stalled");
    drop(snapshot);

    assert!(fx.engine().catalog().list_ids().await.unwrap().is_empty());

    // Lock released; chunks left by the dropped run are sealed again
    let report = committed(fx.engine().snapshot().await.unwrap());
    assert_eq!(report.files, 6);
    assert_eq!(report.chunks_uploaded, 6);
    assert!(report.previous.is_none());

    let out = fx.target("out");
    let restored = fx
        .restorer()
        .restore(&report.snapshot_id, &out, RestoreOptions::default())
        .await
        .unwrap();
    assert!(restored.is_complete());
    assert_same_tree(fx.source(), &out);
}

#[tokio::test]
async fn dropped_restore_leaves_no_partial_file() {
    let fx = Fixture::new();
    fx.write("notes.txt", &noise(300_000, 0x9e37_79b9_7f4a_7c15));
    let report = committed(fx.engine().snapshot().await.unwrap());

    let gated = GatedStore::gets(fx.store.clone(), 1);
    let restorer = fx.restorer_with(gated.clone());
    let out = fx.target("out");
    let mut restore = Box::pin(restorer.restore(&report.snapshot_id, &out, RestoreOptions::default()));
    tokio::time::timeout(STALL_TIMEOUT, async {
        tokio::select! {
            result = &mut restore => panic!("restore finished with fetches stalled: {result:?}"),
            _ = gated.entered.notified() => {}
        }
    })
    .await
    .expect("no chunk fetch stalled");
    drop(restore);

    assert!(regular_files(&out).is_empty(), "{:?}", regular_files(&out));

    // A later restore is unaffected
    let restored = fx
        .restorer()
        .restore(&report.snapshot_id, &out, RestoreOptions::default())
        .await
        .unwrap();
    assert!(restored.is_complete());
    assert_same_tree(fx.source(), &out);
}
