//! Integration tests for the harvester
//!
//! These tests use wiremock to serve generated images and run full
//! harvests end-to-end against a temporary save directory.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, Instant};
use sumi_harvest::config::Config;
use sumi_harvest::crawler::{harvest, Coordinator, StaticSource};
use sumi_harvest::dedup::{list_stored_images, ContentHash};
use sumi_harvest::service::{HarvestService, ServiceError};
use sumi_harvest::state::Candidate;
use sumi_harvest::storage::{CheckpointStore, JsonCheckpointStore, StorageError};
use sumi_harvest::{CheckpointState, HarvestError};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// An 8x8 grid of pseudo-random colored cells with light per-pixel jitter
///
/// The cells give each seed a distinct perceptual signature; the jitter keeps
/// the encoded PNG well above the minimum payload size.
fn pattern_image(seed: u32) -> RgbImage {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    let mut next = move || {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (state >> 16) as u8
    };

    let mut cells = [[0u8; 3]; 64];
    for cell in cells.iter_mut() {
        *cell = [next(), next(), next()];
    }

    RgbImage::from_fn(128, 128, |x, y| {
        let [r, g, b] = cells[((y / 16) * 8 + x / 16) as usize];
        let jitter = ((x.wrapping_mul(31) ^ y.wrapping_mul(17) ^ seed) % 4) as u8;
        Rgb([
            r.saturating_add(jitter),
            g.saturating_sub(jitter),
            b.saturating_add(jitter),
        ])
    })
}

fn encode_png(image: RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode PNG");
    out.into_inner()
}

fn pattern_png(seed: u32) -> Vec<u8> {
    encode_png(pattern_image(seed))
}

fn data_url(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
}

/// Creates a test configuration saving into `dir`
fn create_test_config(dir: &Path) -> Config {
    let mut config = Config::for_save_dir(dir);
    config.harvester.max_concurrent_downloads = 4;
    config.harvester.enumeration_backoff_ms = 1;
    config.fetch.timeout_secs = 5;
    config
}

fn candidate(index: u64, url: String) -> Candidate {
    Candidate::new(index, url).with_dimensions(300, 300)
}

async fn serve(server: &MockServer, route: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body)
                .insert_header("content-type", "image/png"),
        )
        .mount(server)
        .await;
}

fn load_checkpoint(config: &Config) -> CheckpointState {
    JsonCheckpointStore::new(&config.output.checkpoint_path)
        .load()
        .expect("Failed to load checkpoint")
}

fn stored_hashes(config: &Config) -> Vec<ContentHash> {
    list_stored_images(Path::new(&config.output.image_dir))
        .expect("Failed to list images")
        .into_iter()
        .map(|(hash, _)| hash)
        .collect()
}

#[tokio::test]
async fn test_full_harvest_remote_images() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    for seed in 0..3u32 {
        serve(&mock_server, &format!("/img/{}.png", seed), pattern_png(seed)).await;
    }

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let source = StaticSource::new(
        (0..3u64)
            .map(|i| candidate(i, format!("{}/img/{}.png", base_url, i)))
            .collect(),
    );

    let coordinator = Coordinator::new(config.clone(), source, false).unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.stats.committed, 3);
    assert_eq!(report.stats.rejected(), 0);
    assert_eq!(report.resume_index, 2);

    let checkpoint = load_checkpoint(&config);
    assert_eq!(checkpoint.accepted_count(), 3);
    assert_eq!(checkpoint.resume_index(), 2);

    // Every accepted hash names a file holding exactly those bytes
    for seed in 0..3u32 {
        let bytes = pattern_png(seed);
        let hash = ContentHash::of(&bytes);
        assert!(checkpoint.contains(&hash));
        let saved = std::fs::read(Path::new(&config.output.image_dir).join(hash.file_name()))
            .unwrap();
        assert_eq!(saved, bytes);
    }
}

#[tokio::test]
async fn test_rerun_adds_nothing() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    for seed in 0..4u32 {
        serve(&mock_server, &format!("/img/{}.png", seed), pattern_png(seed + 10)).await;
    }

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let candidates: Vec<_> = (0..4u64)
        .map(|i| candidate(i, format!("{}/img/{}.png", base_url, i)))
        .collect();

    let first = Coordinator::new(config.clone(), StaticSource::new(candidates.clone()), false)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(first.stats.committed, 4);
    let after_first = load_checkpoint(&config);

    let second = Coordinator::new(config.clone(), StaticSource::new(candidates), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    // The resume index is inclusive, so the last candidate is revisited and
    // recognised as already kept
    assert_eq!(second.stats.committed, 0);
    assert_eq!(second.stats.enumerated, 1);
    assert_eq!(second.stats.exact_duplicates, 1);

    let after_second = load_checkpoint(&config);
    assert_eq!(after_second.accepted_hashes(), after_first.accepted_hashes());
    assert!(after_second.resume_index() >= after_first.resume_index());
    assert_eq!(stored_hashes(&config).len(), 4);
}

#[tokio::test]
async fn test_same_bytes_at_two_urls_kept_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let bytes = pattern_png(42);
    serve(&mock_server, "/a.png", bytes.clone()).await;
    serve(&mock_server, "/mirror/a.png", bytes.clone()).await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.harvester.max_concurrent_downloads = 1;
    let source = StaticSource::new(vec![
        candidate(0, format!("{}/a.png", base_url)),
        candidate(1, format!("{}/mirror/a.png", base_url)),
    ]);

    let report = Coordinator::new(config.clone(), source, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.committed, 1);
    assert_eq!(report.stats.exact_duplicates, 1);
    assert_eq!(stored_hashes(&config), vec![ContentHash::of(&bytes)]);
}

#[tokio::test]
async fn test_near_duplicate_rejected() {
    let original = pattern_image(5);
    let mut touched = original.clone();
    touched.put_pixel(70, 70, Rgb([255, 0, 0]));

    let original_png = encode_png(original);
    let touched_png = encode_png(touched);
    assert_ne!(ContentHash::of(&original_png), ContentHash::of(&touched_png));

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.harvester.max_concurrent_downloads = 1;
    let source = StaticSource::new(vec![
        candidate(0, data_url(&original_png)),
        candidate(1, data_url(&touched_png)),
        candidate(2, data_url(&pattern_png(6))),
    ]);

    let report = Coordinator::new(config.clone(), source, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.committed, 2);
    assert_eq!(report.stats.near_duplicates, 1);

    let checkpoint = load_checkpoint(&config);
    assert!(checkpoint.contains(&ContentHash::of(&original_png)));
    assert!(!checkpoint.contains(&ContentHash::of(&touched_png)));
}

#[tokio::test]
async fn test_concurrent_identical_candidates_commit_once() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();
    let bytes = pattern_png(77);
    serve(&mock_server, "/same.png", bytes.clone()).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let source = StaticSource::new(
        (0..8u64)
            .map(|i| candidate(i, format!("{}/same.png", base_url)))
            .collect(),
    );

    let report = Coordinator::new(config.clone(), source, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.dispatched, 8);
    assert_eq!(report.stats.committed, 1);
    assert_eq!(report.stats.exact_duplicates, 7);
    assert_eq!(load_checkpoint(&config).accepted_count(), 1);
    assert_eq!(stored_hashes(&config).len(), 1);
}

#[tokio::test]
async fn test_small_declared_dimensions_never_fetched() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/tiny.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(pattern_png(1)))
        .expect(0)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let source = StaticSource::new(vec![
        Candidate::new(0, format!("{}/tiny.png", base_url)).with_dimensions(40, 40),
        Candidate::new(1, format!("{}/tiny.png", base_url)),
    ]);

    let report = Coordinator::new(config.clone(), source, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.filtered, 2);
    assert_eq!(report.stats.dispatched, 0);
    assert_eq!(report.resume_index, 1);
    assert!(stored_hashes(&config).is_empty());
}

#[tokio::test]
async fn test_failed_fetches_are_rejected() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/placeholder.gif"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x47u8; 200]))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>".repeat(400)))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let source = StaticSource::new(vec![
        candidate(0, format!("{}/missing.png", base_url)),
        candidate(1, format!("{}/placeholder.gif", base_url)),
        candidate(2, format!("{}/page.html", base_url)),
        candidate(3, "ftp://example.com/image.png".to_string()),
    ]);

    let report = Coordinator::new(config.clone(), source, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.fetch_failures, 4);
    assert_eq!(report.stats.committed, 0);
    assert_eq!(report.resume_index, 3);
    assert!(stored_hashes(&config).is_empty());
}

#[tokio::test]
async fn test_resume_skips_earlier_candidates() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    for i in 0..10u32 {
        let expected = if i >= 7 { 1 } else { 0 };
        Mock::given(method("GET"))
            .and(path(format!("/img/{}.png", i)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pattern_png(100 + i)))
            .expect(expected)
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());

    let mut state = CheckpointState::new();
    state.advance_resume(7);
    JsonCheckpointStore::new(&config.output.checkpoint_path)
        .save(&state)
        .unwrap();

    let source = StaticSource::new(
        (0..10u64)
            .map(|i| candidate(i, format!("{}/img/{}.png", base_url, i)))
            .collect(),
    );
    let report = Coordinator::new(config.clone(), source, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.enumerated, 3);
    assert_eq!(report.stats.committed, 3);
    assert_eq!(report.resume_index, 9);
}

#[tokio::test]
async fn test_corrupt_checkpoint_refuses_to_start() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    std::fs::write(&config.output.checkpoint_path, "{\"processed_hashes\": [").unwrap();

    let result = Coordinator::new(config.clone(), StaticSource::default(), false);
    assert!(matches!(
        result,
        Err(HarvestError::Storage(StorageError::CorruptCheckpoint { .. }))
    ));

    // The damaged file is left for the operator to inspect
    let content = std::fs::read_to_string(&config.output.checkpoint_path).unwrap();
    assert_eq!(content, "{\"processed_hashes\": [");
}

#[tokio::test]
async fn test_image_saved_before_crash_is_reconciled() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());

    // Simulate a crash between writing the image and saving the checkpoint
    let bytes = pattern_png(9);
    let hash = ContentHash::of(&bytes);
    std::fs::create_dir_all(&config.output.image_dir).unwrap();
    std::fs::write(
        Path::new(&config.output.image_dir).join(hash.file_name()),
        &bytes,
    )
    .unwrap();

    let source = StaticSource::new(vec![candidate(0, data_url(&bytes))]);
    let coordinator = Coordinator::new(config.clone(), source, false).unwrap();
    assert!(coordinator.checkpoint().contains(&hash));
    assert!(load_checkpoint(&config).contains(&hash));

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.rebuild.reconciled, vec![hash]);
    assert_eq!(report.stats.committed, 0);
    assert_eq!(report.stats.exact_duplicates, 1);
}

#[tokio::test]
async fn test_visually_similar_to_previous_run_rejected() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());

    let original = pattern_image(21);
    let mut touched = original.clone();
    touched.put_pixel(3, 90, Rgb([0, 255, 0]));

    let first = StaticSource::new(vec![candidate(0, data_url(&encode_png(original)))]);
    Coordinator::new(config.clone(), first, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    // A new process only knows the first image through the rebuilt index
    let second = StaticSource::new(vec![candidate(1, data_url(&encode_png(touched)))]);
    let report = Coordinator::new(config.clone(), second, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.rebuild.signed, 1);
    assert_eq!(report.stats.near_duplicates, 1);
    assert_eq!(stored_hashes(&config).len(), 1);
}

#[tokio::test]
async fn test_stop_lets_in_flight_work_finish() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    for i in 0..20u32 {
        Mock::given(method("GET"))
            .and(path(format!("/slow/{}.png", i)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(pattern_png(200 + i))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&mock_server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.harvester.max_concurrent_downloads = 2;
    let source = StaticSource::new(
        (0..20u64)
            .map(|i| candidate(i, format!("{}/slow/{}.png", base_url, i)))
            .collect(),
    );

    let coordinator = Coordinator::new(config.clone(), source, false).unwrap();
    let stop = coordinator.stop_handle();
    let run = tokio::spawn(coordinator.run());

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.stop();
    let report = run.await.unwrap().unwrap();

    assert!(report.stopped);
    assert!(report.stats.dispatched < 20);
    assert_eq!(report.stats.committed, report.stats.dispatched);
    assert_eq!(report.resume_index + 1, report.stats.dispatched);

    let checkpoint = load_checkpoint(&config);
    assert_eq!(checkpoint.accepted_count() as u64, report.stats.committed);
    assert_eq!(checkpoint.resume_index(), report.resume_index);
}

#[tokio::test]
async fn test_checkpoint_holds_at_slowest_in_flight_candidate() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/slow/0.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(pattern_png(500))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&mock_server)
        .await;
    serve(&mock_server, "/img/1.png", pattern_png(501)).await;
    serve(&mock_server, "/img/2.png", pattern_png(502)).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path());
    let source = StaticSource::new(vec![
        candidate(0, format!("{}/slow/0.png", base_url)),
        candidate(1, format!("{}/img/1.png", base_url)),
        candidate(2, format!("{}/img/2.png", base_url)),
    ]);

    let coordinator = Coordinator::new(config.clone(), source, false).unwrap();
    let run = tokio::spawn(coordinator.run());

    // Wait for the two fast candidates to be committed while 0 is still downloading
    let deadline = Instant::now() + Duration::from_millis(1200);
    let mid_run = loop {
        let state = load_checkpoint(&config);
        if state.accepted_count() == 2 || Instant::now() >= deadline {
            break state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(mid_run.accepted_count(), 2);
    assert_eq!(mid_run.resume_index(), 0);

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.stats.committed, 3);
    assert_eq!(report.resume_index, 2);

    let checkpoint = load_checkpoint(&config);
    assert_eq!(checkpoint.accepted_count(), 3);
    assert_eq!(checkpoint.resume_index(), 2);
}

#[tokio::test]
async fn test_oversized_payload_rejected() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    let small = pattern_png(600);
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path());
    config.fetch.max_image_bytes = small.len() + 1;

    Mock::given(method("GET"))
        .and(path("/huge.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0xFFu8; small.len() * 4])
                .insert_header("content-type", "image/png"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;
    serve(&mock_server, "/small.png", small).await;

    let source = StaticSource::new(vec![
        candidate(0, format!("{}/huge.png", base_url)),
        candidate(1, format!("{}/small.png", base_url)),
    ]);
    let report = Coordinator::new(config.clone(), source, false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(report.stats.fetch_failures, 1);
    assert_eq!(report.stats.committed, 1);
    assert_eq!(report.resume_index, 1);
    assert_eq!(stored_hashes(&config).len(), 1);
}

#[tokio::test]
async fn test_harvest_from_json_lines_file() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir.path().join("out"));

    let lines: Vec<String> = (0..3u64)
        .map(|i| {
            serde_json::to_string(&candidate(i, data_url(&pattern_png(300 + i as u32)))).unwrap()
        })
        .collect();
    let candidates_path = dir.path().join("candidates.jsonl");
    std::fs::write(&candidates_path, lines.join("\n")).unwrap();

    let report = harvest(config.clone(), &candidates_path).await.unwrap();
    assert_eq!(report.stats.committed, 3);
    assert_eq!(stored_hashes(&config).len(), 3);
}

#[tokio::test]
async fn test_service_runs_one_harvest_at_a_time() {
    let dir = TempDir::new().unwrap();
    let base = create_test_config(&dir.path().join("unused"));
    let save_dir = dir.path().join("service");

    let urls: Vec<String> = (0..2u32).map(|i| data_url(&pattern_png(400 + i))).collect();
    let service = HarvestService::new(base, move || {
        StaticSource::new(
            urls.iter()
                .enumerate()
                .map(|(i, url)| candidate(i as u64, url.clone()))
                .collect(),
        )
    });

    service.start_task(&save_dir).unwrap();
    let status = service.status();
    assert!(status.running);
    assert_eq!(status.save_dir.as_deref(), Some(save_dir.as_path()));
    assert!(matches!(
        service.start_task(&save_dir),
        Err(ServiceError::AlreadyRunning)
    ));

    service.wait().await;
    assert!(!service.status().running);
    assert_eq!(service.last_report().unwrap().stats.committed, 2);

    let json = serde_json::to_value(service.status()).unwrap();
    assert_eq!(json["running"], false);
    assert!(json["last_error"].is_null());
}
