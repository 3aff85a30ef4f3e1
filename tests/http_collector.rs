use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use warp::hyper::body::Bytes;
use warp::Filter;

use focusfy_lib::models::MetricSample;
use focusfy_lib::remote::{FrameScorer, HttpCollector, RemoteSync, UserContext};
use focusfy_lib::sensing::compute_focus_score;

#[derive(Default)]
struct ServerLog {
    authorization: Vec<Option<String>>,
    created: Vec<Value>,
    uploads: Vec<(String, Value)>,
    analyze_content_type: Option<String>,
    analyze_body: Vec<u8>,
}

type SharedLog = Arc<Mutex<ServerLog>>;

/// Serves the collector API on an ephemeral port. Fetches return every upload for
/// the session plus one malformed entry.
fn spawn_fake_collector() -> (SocketAddr, SharedLog) {
    let log = SharedLog::default();

    let create = {
        let log = log.clone();
        warp::post()
            .and(warp::path!("sessions"))
            .and(warp::header::optional::<String>("authorization"))
            .and(warp::body::json())
            .map(move |authorization: Option<String>, body: Value| {
                let mut log = log.lock().unwrap();
                log.authorization.push(authorization);
                log.created.push(body);
                warp::reply::json(&json!({ "sessionId": 42 }))
            })
    };

    let submit = {
        let log = log.clone();
        warp::post()
            .and(warp::path!("sessions" / String / "metrics"))
            .and(warp::body::json())
            .map(move |session_id: String, body: Value| {
                log.lock().unwrap().uploads.push((session_id, body));
                warp::reply::json(&json!({ "ok": true }))
            })
    };

    let fetch = {
        let log = log.clone();
        warp::get()
            .and(warp::path!("sessions" / String / "metrics"))
            .map(move |session_id: String| {
                let mut metrics: Vec<Value> = log
                    .lock()
                    .unwrap()
                    .uploads
                    .iter()
                    .filter(|(id, _)| *id == session_id)
                    .map(|(_, upload)| upload.clone())
                    .collect();
                metrics.push(json!({ "score": "not-a-number" }));
                warp::reply::json(&json!({ "metrics": metrics }))
            })
    };

    let analyze = {
        let log = log.clone();
        warp::post()
            .and(warp::path!("analyze"))
            .and(warp::header::<String>("content-type"))
            .and(warp::body::bytes())
            .map(move |content_type: String, body: Bytes| {
                let mut log = log.lock().unwrap();
                log.analyze_content_type = Some(content_type);
                log.analyze_body = body.to_vec();
                warp::reply::json(&json!({
                    "metrics": {
                        "gaze_direction": "left",
                        "blink_rate": 1.0,
                        "confidence": 1.0,
                        "face_detected": true
                    }
                }))
            })
    };

    let routes = create.or(submit).or(fetch).or(analyze);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    (addr, log)
}

fn collector(addr: SocketAddr, token: Option<&str>) -> HttpCollector {
    let user = UserContext::new("user-1", token.map(str::to_string));
    HttpCollector::new(format!("http://{addr}/"), &user).unwrap()
}

#[tokio::test]
async fn create_session_sends_duration_and_bearer_token() {
    let (addr, log) = spawn_fake_collector();
    let client = collector(addr, Some("secret"));

    let remote_id = client.create_session(25).await.unwrap();
    assert_eq!(remote_id, "42");

    let log = log.lock().unwrap();
    assert_eq!(log.created, vec![json!({ "duration": 25 })]);
    assert_eq!(log.authorization, vec![Some("Bearer secret".to_string())]);
}

#[tokio::test]
async fn anonymous_client_sends_no_authorization() {
    let (addr, log) = spawn_fake_collector();
    collector(addr, None).create_session(5).await.unwrap();
    assert_eq!(log.lock().unwrap().authorization, vec![None]);
}

#[tokio::test]
async fn uploaded_samples_come_back_and_malformed_entries_are_skipped() {
    let (addr, log) = spawn_fake_collector();
    let client = collector(addr, None);

    let first = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    let second = Utc.timestamp_millis_opt(1_700_000_001_500).unwrap();
    for (timestamp, score) in [(first, 91), (second, 74)] {
        let sample = MetricSample::new(timestamp, score, json!({ "gaze_direction": "center" }));
        client.submit_sample("42", &sample).await.unwrap();
    }

    let uploads = log.lock().unwrap().uploads.clone();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].0, "42");
    assert_eq!(uploads[0].1["ts"], json!(1_700_000_000_000_i64));

    let samples = client.fetch_samples("42").await.unwrap();
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].timestamp, first);
    assert_eq!(samples[0].score, 91);
    assert_eq!(samples[1].score, 74);
    assert_eq!(samples[1].raw_metrics["gaze_direction"], json!("center"));

    assert!(client.fetch_samples("unknown").await.unwrap().is_empty());
}

#[tokio::test]
async fn analyze_posts_jpeg_as_multipart_file() {
    let (addr, log) = spawn_fake_collector();
    let client = collector(addr, None);

    let jpeg = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
    let metrics = client.analyze(jpeg).await.unwrap();
    assert_eq!(metrics.gaze_direction.as_deref(), Some("left"));
    assert_eq!(metrics.extra.get("face_detected"), Some(&json!(true)));
    assert_eq!(compute_focus_score(&metrics), 65);

    let log = log.lock().unwrap();
    let content_type = log.analyze_content_type.clone().unwrap();
    assert!(content_type.starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(&log.analyze_body);
    assert!(body.contains("name=\"file\""));
    assert!(body.contains("filename=\"frame.jpg\""));
    assert!(body.contains("image/jpeg"));
}

#[tokio::test]
async fn unreachable_collector_is_an_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = collector(addr, None);
    assert!(client.create_session(25).await.is_err());
    assert!(client.fetch_samples("42").await.is_err());
}
