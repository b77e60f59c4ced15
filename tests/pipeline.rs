//! End-to-end tests through the public API: remote fetch, persisted cache,
//! preprocessing, and the batch driver.
//!
//! Run with: cargo test --test pipeline

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use watchframe::fetch::HttpFetcher;
use watchframe::imaging::OutputFormat;
use watchframe::prepare::{self, BatchSettings, BatchSummary};
use watchframe::preprocess::ImagePreprocessor;
use watchframe::saliency::{CacheLimits, JsonFileStore, NullStore, SaliencyEstimator};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const DIAL_BLUE: [u8; 3] = [31, 61, 179];

/// White frame with a blue dial of radius `r` centered at `(cx, cy)`.
fn dial_photo(width: u32, height: u32, cx: f64, cy: f64, r: f64) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let dx = x as f64 + 0.5 - cx;
        let dy = y as f64 + 0.5 - cy;
        if dx * dx + dy * dy <= r * r {
            Rgb(DIAL_BLUE)
        } else {
            Rgb([255, 255, 255])
        }
    }))
}

fn png(img: &DynamicImage) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5), "watchframe-test").unwrap()
}

#[tokio::test]
async fn remote_photo_is_fetched_once_and_persisted() {
    let server = MockServer::start().await;
    let photo = dial_photo(800, 600, 600.0, 300.0, 120.0);
    Mock::given(method("GET"))
        .and(path("/watches/42.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png(&photo)))
        .expect(1)
        .mount(&server)
        .await;
    let url = format!("{}/watches/42.png", server.uri());
    let cache = TempDir::new().unwrap();

    let first = {
        let estimator = SaliencyEstimator::new(
            JsonFileStore::in_dir(cache.path()),
            fetcher(),
            CacheLimits::default(),
        );
        let d = estimator.analyze_from_source(&url, "watch-42").await;
        assert!(d.offset_x > 0.4, "subject is right of center: {d:?}");
        assert!(d.offset_y.abs() < 0.05);
        assert!(d.dial_color.is_some());
        estimator.flush();
        d
    };

    // Same key after a restart: served from disk, no second request
    let estimator = SaliencyEstimator::new(
        JsonFileStore::in_dir(cache.path()),
        fetcher(),
        CacheLimits::default(),
    );
    assert_eq!(estimator.analyze_from_source(&url, "watch-42").await, first);
    assert_eq!(estimator.computations(), 0);
}

#[tokio::test]
async fn missing_remote_photo_degrades_to_neutral() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let estimator = SaliencyEstimator::new(NullStore, fetcher(), CacheLimits::default());
    let d = estimator
        .analyze_from_source(&format!("{}/gone.jpg", server.uri()), "gone")
        .await;
    assert!(d.is_neutral());
    assert!(estimator.contains("gone"));
}

#[tokio::test]
async fn prepared_upload_is_a_square_jpeg() {
    let estimator = Arc::new(SaliencyEstimator::in_memory());
    let pre = ImagePreprocessor::with_estimator(estimator.clone());

    let photo = dial_photo(2000, 1000, 1000.0, 500.0, 300.0);
    let out = pre.process(&photo, 1024, true, None).await.unwrap();

    assert_eq!(out.dimensions(), (900, 900));
    assert_eq!(out.format, OutputFormat::Jpeg);
    let decoded = image::load_from_memory(&out.upload_bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (900, 900));
    assert!(estimator.contains(&out.cache_key));
}

#[tokio::test]
async fn batch_prepares_a_directory() {
    let tmp = TempDir::new().unwrap();
    let shoot = tmp.path().join("shoot");
    std::fs::create_dir_all(shoot.join("day2")).unwrap();
    std::fs::write(
        shoot.join("seamaster.png"),
        png(&dial_photo(600, 400, 300.0, 200.0, 90.0)),
    )
    .unwrap();
    std::fs::write(
        shoot.join("day2/seamaster.png"),
        png(&dial_photo(400, 600, 200.0, 300.0, 90.0)),
    )
    .unwrap();
    std::fs::write(shoot.join("README.txt"), "not a photo").unwrap();

    let out_dir = tmp.path().join("out");
    let photos = prepare::collect_inputs(&[shoot]).unwrap();
    let jobs = prepare::plan_jobs(&photos, &out_dir, OutputFormat::Jpeg);
    let settings = BatchSettings {
        output_dir: out_dir.clone(),
        max_dimension: 256,
        blur_background: true,
        concurrency: 2,
        skip_existing: false,
    };
    let pre = Arc::new(ImagePreprocessor::with_estimator(Arc::new(
        SaliencyEstimator::in_memory(),
    )));

    let summary = prepare::prepare_all(pre, jobs, &settings, None)
        .await
        .unwrap();
    assert_eq!(
        summary,
        BatchSummary {
            prepared: 2,
            skipped: 0,
            failed: 0
        }
    );
    for name in ["seamaster.jpg", "seamaster-2.jpg"] {
        let img = image::open(out_dir.join(name)).unwrap();
        assert_eq!((img.width(), img.height()), (256, 256), "{name}");
    }

    // A re-run with skip_existing leaves both outputs alone
    let jobs = prepare::plan_jobs(&photos, &out_dir, OutputFormat::Jpeg);
    let rerun = BatchSettings {
        skip_existing: true,
        ..settings
    };
    let pre = Arc::new(ImagePreprocessor::with_estimator(Arc::new(
        SaliencyEstimator::in_memory(),
    )));
    let summary = prepare::prepare_all(pre, jobs, &rerun, None).await.unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.prepared, 0);
}

#[tokio::test]
async fn flaky_remote_photo_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/watches/7.png"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/watches/7.png"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(png(&dial_photo(400, 400, 100.0, 200.0, 60.0))),
        )
        .mount(&server)
        .await;

    let estimator = SaliencyEstimator::new(
        NullStore,
        fetcher().with_retries(1),
        CacheLimits::default(),
    );
    let d = estimator
        .analyze_from_source(&format!("{}/watches/7.png", server.uri()), "watch-7")
        .await;
    assert!(d.offset_x < -0.3, "subject is left of center: {d:?}");
    assert_eq!(estimator.computations(), 1);
}
