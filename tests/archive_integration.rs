//! Archive assembly: resume, atomic replace and failure isolation.

mod support;

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mediaprobe_core::archive::partial_path;
use mediaprobe_core::{
    ArchiveAssembler, Compression, GateController, GatePolicy, GateSignals, OutputStore,
    Partition, Scheduler, SchedulerConfig, SessionMode,
};
use support::mock_session::{Catalog, MockSessionFactory};

const SEED: &str = "https://media.test/seed";
const A_URL: &str = "https://media.test/files/A.avi";
const B_URL: &str = "https://media.test/files/B.mp4";
const B_MEDIA: &str = "https://cdn.media.test/stream/B.mp4?token=1";
const C_URL: &str = "https://media.test/files/C.avi";

fn scheduler(factory: &Arc<MockSessionFactory>) -> Scheduler {
    let gate = Arc::new(GateController::new(
        GateSignals {
            challenge_cookie_markers: vec!["cf".to_string()],
            consent_marker: "<video".to_string(),
        },
        GatePolicy {
            seed_url: SEED.to_string(),
            poll_interval: Duration::from_millis(10),
            timeout: Some(Duration::from_secs(2)),
            seed_timeout: Duration::from_secs(1),
        },
    ));
    Scheduler::new(
        SchedulerConfig {
            workers: 3,
            partition: Partition::Dynamic,
            session_mode: SessionMode::Isolated,
        },
        factory.clone(),
        gate,
        CancellationToken::new(),
    )
    .unwrap()
}

fn assembler(archive: &Path) -> ArchiveAssembler {
    ArchiveAssembler::new(
        archive,
        Compression::Stored,
        vec![".avi".to_string(), ".mov".to_string()],
        Duration::from_secs(1),
    )
}

fn catalog() -> Catalog {
    Catalog::new(SEED)
        .with_direct(A_URL, b"direct payload for A")
        .with_embedded(B_URL, B_MEDIA, b"streamed payload for B, a bit longer")
        .with_direct(C_URL, b"direct payload for C")
}

async fn write_store(path: &Path, urls: &[&str]) {
    let store = OutputStore::open(path).await.unwrap();
    for url in urls {
        store.append(url).await.unwrap();
    }
    store.close().await;
}

/// (name, crc32, compressed size, contents) per entry, in container order.
fn read_entries(path: &Path) -> Vec<(String, u32, u64, Vec<u8>)> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|index| {
            let mut entry = archive.by_index(index).unwrap();
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            (
                entry.name().to_string(),
                entry.crc32(),
                entry.compressed_size(),
                contents,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_fresh_archive_holds_direct_and_embedded_payloads() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("valid_media.txt");
    let archive_path = dir.path().join("media_archive.zip");
    write_store(&store_path, &[A_URL, B_URL]).await;

    let factory = Arc::new(MockSessionFactory::new(catalog()));
    let urls = OutputStore::load(&store_path).await.unwrap();
    let summary = assembler(&archive_path)
        .run(urls, &scheduler(&factory))
        .await
        .unwrap();

    assert_eq!(summary.added, 2);
    assert_eq!(summary.carried, 0);
    assert!(summary.replaced);
    assert!(summary.run.is_clean());

    let entries = read_entries(&archive_path);
    let mut names: Vec<&str> = entries.iter().map(|entry| entry.0.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["A.avi", "B.mp4"]);
    let b = entries.iter().find(|entry| entry.0 == "B.mp4").unwrap();
    assert_eq!(b.3, b"streamed payload for B, a bit longer");
    assert!(!factory.visits_to(B_MEDIA).is_empty());

    assert!(!partial_path(&archive_path).exists());
    assert!(!dir.path().join("media_archive.zip.spool").exists());
}

#[tokio::test]
async fn test_resume_adds_new_entries_and_keeps_existing_ones_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("valid_media.txt");
    let archive_path = dir.path().join("media_archive.zip");
    write_store(&store_path, &[A_URL, B_URL]).await;

    let first = Arc::new(MockSessionFactory::new(catalog()));
    assembler(&archive_path)
        .run(
            OutputStore::load(&store_path).await.unwrap(),
            &scheduler(&first),
        )
        .await
        .unwrap();
    let before = read_entries(&archive_path);

    write_store(&store_path, &[C_URL]).await;
    let second = Arc::new(MockSessionFactory::new(catalog()));
    let summary = assembler(&archive_path)
        .run(
            OutputStore::load(&store_path).await.unwrap(),
            &scheduler(&second),
        )
        .await
        .unwrap();

    assert_eq!(summary.already_archived, 2);
    assert_eq!(summary.carried, 2);
    assert_eq!(summary.added, 1);
    assert!(second.visits_to(A_URL).is_empty());
    assert!(second.visits_to(B_URL).is_empty());
    assert_eq!(second.visits_to(C_URL).len(), 1);

    let after = read_entries(&archive_path);
    assert_eq!(after.len(), 3);
    for entry in &before {
        assert!(after.contains(entry), "{} changed on resume", entry.0);
    }
    let c = after.iter().find(|entry| entry.0 == "C.avi").unwrap();
    assert_eq!(c.3, b"direct payload for C");
}

#[tokio::test]
async fn test_nothing_pending_leaves_container_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("valid_media.txt");
    let archive_path = dir.path().join("media_archive.zip");
    write_store(&store_path, &[A_URL]).await;

    let factory = Arc::new(MockSessionFactory::new(catalog()));
    assembler(&archive_path)
        .run(
            OutputStore::load(&store_path).await.unwrap(),
            &scheduler(&factory),
        )
        .await
        .unwrap();
    let bytes_before = std::fs::read(&archive_path).unwrap();

    let factory = Arc::new(MockSessionFactory::new(catalog()));
    let summary = assembler(&archive_path)
        .run(
            OutputStore::load(&store_path).await.unwrap(),
            &scheduler(&factory),
        )
        .await
        .unwrap();

    assert!(!summary.replaced);
    assert_eq!(summary.already_archived, 1);
    assert_eq!(factory.created(), 0);
    assert_eq!(std::fs::read(&archive_path).unwrap(), bytes_before);
}

#[tokio::test]
async fn test_failed_retrieval_is_left_for_a_later_run() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("valid_media.txt");
    let archive_path = dir.path().join("media_archive.zip");
    write_store(&store_path, &[A_URL, C_URL]).await;
    let store_before = std::fs::read_to_string(&store_path).unwrap();

    let broken = Catalog::new(SEED)
        .with_direct(A_URL, b"direct payload for A")
        .with_broken_direct(C_URL);
    let factory = Arc::new(MockSessionFactory::new(broken));
    let summary = assembler(&archive_path)
        .run(
            OutputStore::load(&store_path).await.unwrap(),
            &scheduler(&factory),
        )
        .await
        .unwrap();

    assert_eq!(summary.run.failed, 1);
    assert_eq!(summary.added, 1);
    assert!(!summary.run.is_clean());
    assert_eq!(std::fs::read_to_string(&store_path).unwrap(), store_before);
    let names: Vec<String> = read_entries(&archive_path)
        .into_iter()
        .map(|entry| entry.0)
        .collect();
    assert_eq!(names, vec!["A.avi"]);

    let factory = Arc::new(MockSessionFactory::new(catalog()));
    let summary = assembler(&archive_path)
        .run(
            OutputStore::load(&store_path).await.unwrap(),
            &scheduler(&factory),
        )
        .await
        .unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.carried, 1);
    assert_eq!(read_entries(&archive_path).len(), 2);
}

#[tokio::test]
async fn test_leftover_partial_from_crashed_run_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("valid_media.txt");
    let archive_path = dir.path().join("media_archive.zip");
    write_store(&store_path, &[A_URL]).await;
    std::fs::write(partial_path(&archive_path), b"half-written garbage").unwrap();

    let factory = Arc::new(MockSessionFactory::new(catalog()));
    let summary = assembler(&archive_path)
        .run(
            OutputStore::load(&store_path).await.unwrap(),
            &scheduler(&factory),
        )
        .await
        .unwrap();

    assert_eq!(summary.added, 1);
    assert!(!partial_path(&archive_path).exists());
    assert_eq!(read_entries(&archive_path).len(), 1);
}
