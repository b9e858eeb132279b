//! Integration tests for download dedupe, progress streams and failure fan-out.

mod common;

use std::time::Duration;

use common::{ScriptedFetcher, TestHarness};
use mediastash::downloads::StartOutcome;
use mediastash::server::routes_download::DownloadResponse;
use mediastash_common::Quality;
use tokio_test::assert_ok;

/// Parse `event:`/`data:` pairs out of a complete SSE body.
fn sse_events(body: &str) -> Vec<(String, serde_json::Value)> {
    let mut events = Vec::new();
    for block in body.split("\n\n") {
        let mut name = None;
        let mut data = None;
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                name = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data = serde_json::from_str(rest.trim()).ok();
            }
        }
        if let (Some(name), Some(data)) = (name, data) {
            events.push((name, data));
        }
    }
    events
}

#[tokio::test]
async fn two_viewers_share_one_fetch() {
    let (h, addr) = TestHarness::with_server(ScriptedFetcher::new(
        8,
        256 * 1024,
        Duration::from_millis(30),
    ))
    .await;

    let url = format!("http://{addr}/api/stream/shared?quality=360");
    let (a, b) = tokio::join!(reqwest::get(&url), reqwest::get(&url));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.status(), 200);
    assert_eq!(b.status(), 200);
    assert_ok!(a.bytes().await);
    assert_ok!(b.bytes().await);

    h.wait_idle().await;
    assert_eq!(h.fetcher.calls(), 1);

    // A third viewer after completion is a cache hit.
    let c = reqwest::get(&url).await.unwrap();
    assert_eq!(c.status(), 200);
    assert_eq!(c.bytes().await.unwrap().len() as u64, h.fetcher.total_bytes());
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn post_download_starts_then_reports_complete() {
    let (h, addr) =
        TestHarness::with_server(ScriptedFetcher::new(3, 100, Duration::from_millis(10))).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/download/vid");

    let started: DownloadResponse = client
        .post(&url)
        .json(&serde_json::json!({ "quality": "1080p" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started.status, "started");
    assert_eq!(started.quality, Quality::P1080);
    assert_eq!(started.buffer_threshold, 8 * 1024 * 1024);

    h.wait_idle().await;

    let again: DownloadResponse = client
        .post(&url)
        .json(&serde_json::json!({ "quality": "1080" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again.status, "complete");

    // No body falls back to the default quality.
    let default: DownloadResponse = client.post(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(default.quality, Quality::P720);
    assert_eq!(default.status, "started");
}

#[tokio::test]
async fn progress_stream_ends_with_complete() {
    let (h, addr) =
        TestHarness::with_server(ScriptedFetcher::new(5, 100, Duration::from_millis(30))).await;

    // Headers arrive only after the handler has subscribed.
    let stream = reqwest::get(format!("http://{addr}/api/download/watched/status"))
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);

    h.ctx
        .downloads
        .start_or_join(&"watched".parse().unwrap(), Quality::P480)
        .unwrap();

    let body = tokio::time::timeout(Duration::from_secs(10), stream.text())
        .await
        .expect("stream did not close")
        .unwrap();
    let events = sse_events(&body);

    assert_eq!(events[0].0, "snapshot");
    let (name, last) = events.last().unwrap();
    assert_eq!(name, "progress");
    assert_eq!(last["status"], "complete");
    assert_eq!(last["quality"], "480");
    assert_eq!(last["bytesWritten"], 500);
    assert_eq!(last["percent"], 100.0);

    let terminal = events
        .iter()
        .filter(|(_, e)| e["status"] == "complete" || e["status"] == "error")
        .count();
    assert_eq!(terminal, 1);
}

#[tokio::test]
async fn failure_reaches_every_subscriber_once() {
    let (h, addr) = TestHarness::with_server(
        ScriptedFetcher::new(10, 100, Duration::from_millis(30)).failing_after(3),
    )
    .await;
    let url = format!("http://{addr}/api/download/flaky/status");

    let first = reqwest::get(&url).await.unwrap();
    let second = reqwest::get(&url).await.unwrap();
    assert_eq!(h.ctx.events.subscriber_count(&"flaky".parse().unwrap()), 2);

    let outcome = h
        .ctx
        .downloads
        .start_or_join(&"flaky".parse().unwrap(), Quality::P720)
        .unwrap();
    assert!(matches!(outcome, StartOutcome::Started(_)));

    for stream in [first, second] {
        let body = tokio::time::timeout(Duration::from_secs(10), stream.text())
            .await
            .expect("stream did not close")
            .unwrap();
        let errors: Vec<_> = sse_events(&body)
            .into_iter()
            .filter(|(name, e)| name == "progress" && e["status"] == "error")
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1["error"], "scripted upstream failure");
    }

    h.wait_idle().await;
    let key = mediastash_common::CacheKey::new("flaky".parse().unwrap(), Quality::P720);
    assert!(!h.ctx.cache.temp_path(&key).exists());
    assert!(h.ctx.cache.get(&key).is_none());
}

#[tokio::test]
async fn snapshot_lists_in_flight_qualities() {
    let (h, addr) =
        TestHarness::with_server(ScriptedFetcher::new(50, 10, Duration::from_millis(50))).await;
    let resource = "multi".parse().unwrap();
    h.ctx.downloads.start_or_join(&resource, Quality::P360).unwrap();
    h.ctx.downloads.start_or_join(&resource, Quality::P1080).unwrap();

    let mut resp = reqwest::get(format!("http://{addr}/api/download/multi/status"))
        .await
        .unwrap();
    let mut buffered = String::new();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let chunk = resp.chunk().await.unwrap().expect("stream ended early");
            buffered.push_str(&String::from_utf8_lossy(&chunk));
            if let Some((name, data)) = sse_events(&buffered).into_iter().next() {
                return (name, data);
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(snapshot.0, "snapshot");
    let map = snapshot.1.as_object().unwrap();
    assert_eq!(map.len(), 2);
    assert!(map.contains_key("360"));
    assert!(map.contains_key("1080"));
    assert_eq!(map["360"]["status"], "fetching");

    h.ctx.downloads.shutdown().await;
    assert!(h.ctx.downloads.status(&resource).is_empty());
}

#[tokio::test]
async fn shutdown_delivers_terminal_event_before_streams_close() {
    let h = TestHarness::new(ScriptedFetcher::new(200, 100, Duration::from_millis(50)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(mediastash::server::serve(h.ctx.clone(), listener, async move {
        stopped.await.ok();
    }));

    let stream = reqwest::get(format!("http://{addr}/api/download/live/status"))
        .await
        .unwrap();
    assert_eq!(stream.status(), 200);

    let outcome = h
        .ctx
        .downloads
        .start_or_join(&"live".parse().unwrap(), Quality::P720)
        .unwrap();
    let download = outcome.download().unwrap().clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        while download.bytes_written() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("fetch never started");

    stop.send(()).unwrap();

    let body = tokio::time::timeout(Duration::from_secs(10), stream.text())
        .await
        .expect("stream did not close")
        .unwrap();
    let errors = sse_events(&body)
        .into_iter()
        .filter(|(name, e)| name == "progress" && e["status"] == "error")
        .count();
    assert_eq!(errors, 1);

    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
    assert_eq!(h.ctx.downloads.active_count(), 0);
    assert!(!download.temp_path().exists());
}
