use std::sync::Arc;
use std::time::Duration;

use family_tree_cli::controller::spawn_controller;
use family_tree_cli::error::ServiceError;
use family_tree_cli::model::{
    CandidateId, ControllerConfig, ControllerEvent, Depth, DepthBounds, GenerationRequest, JobId,
    JobStatus,
};
use family_tree_cli::service::{GenerationService, HttpService};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use url::Url;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn recv(events: &mut UnboundedReceiver<ControllerEvent>) -> ControllerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out")
        .expect("closed")
}

fn config(server: &MockServer) -> ControllerConfig {
    let mut cfg = ControllerConfig::new(Url::parse(&server.uri()).unwrap());
    cfg.poll_interval = Duration::from_millis(20);
    cfg.request_timeout = Duration::from_secs(5);
    cfg
}

#[tokio::test]
async fn search_decodes_candidates_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "Iron Maiden"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "ca891d65", "name": "Iron Maiden", "type": "Group", "disambiguation": "English heavy metal band"},
            {"id": 7, "name": "Iron Maiden Tribute"}
        ])))
        .mount(&server)
        .await;

    let svc = HttpService::new(&config(&server)).unwrap();
    let found = svc.search("Iron Maiden").await.unwrap();

    let ids: Vec<_> = found.iter().map(|c| c.id.as_str().to_string()).collect();
    assert_eq!(ids, vec!["ca891d65".to_string(), "7".to_string()]);
    assert_eq!(found[0].kind.as_deref(), Some("Group"));
    assert_eq!(found[1].disambiguation, None);
}

#[tokio::test]
async fn submit_posts_artist_and_depth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_json(json!({"artist_id": "abc", "depth": 3})))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"job_id": "job-1", "status": "Processing", "progress": 10}),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let svc = HttpService::new(&config(&server)).unwrap();
    let resp = svc
        .submit(&GenerationRequest {
            artist_id: CandidateId::new("abc"),
            depth: Depth::new(3, DepthBounds::default()).unwrap(),
            detail_level: None,
        })
        .await
        .unwrap();

    assert_eq!(resp.job_id, JobId::new("job-1"));
    assert_eq!(resp.status, Some(JobStatus::Running));
    assert_eq!(resp.progress, Some(10));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let svc = HttpService::new(&config(&server)).unwrap();
    let err = svc.status(&JobId::new("missing")).await.unwrap_err();
    assert!(
        matches!(err, ServiceError::Status { status: 404, .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn malformed_body_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status/j"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let svc = HttpService::new(&config(&server)).unwrap();
    let err = svc.status(&JobId::new("j")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Decode { .. }), "{err:?}");
}

#[tokio::test]
async fn artifact_is_fetched_from_absolute_location() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download/j"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<svg/>", "image/svg+xml"))
        .mount(&server)
        .await;

    let cfg = config(&server);
    let svc = HttpService::new(&cfg).unwrap();
    let location = cfg.resolve_result_location("/download/j").unwrap();
    let body = svc.fetch_artifact(&location).await.unwrap();
    assert_eq!(&body[..], b"<svg/>");
}

#[tokio::test]
async fn controller_runs_full_lifecycle_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": "b1", "name": "The Beatles"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "abc"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "job_id": "abc",
            "status": "Completed",
            "progress": 100,
            "result_url": "/download/abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cfg = config(&server);
    let svc = Arc::new(HttpService::new(&cfg).unwrap());
    let (handle, mut events) = spawn_controller(cfg, svc);

    handle.submit_search("Beatles");
    assert!(matches!(
        recv(&mut events).await,
        ControllerEvent::SearchCompleted { count: 1, .. }
    ));
    handle.select_candidate_by_id(CandidateId::new("b1"));
    handle.request_generation(2);
    assert!(matches!(
        recv(&mut events).await,
        ControllerEvent::JobStarted { .. }
    ));
    let expected = Url::parse(&format!("{}/download/abc", server.uri())).unwrap();
    assert_eq!(
        recv(&mut events).await,
        ControllerEvent::JobCompleted {
            job_id: JobId::new("abc"),
            result_location: expected.clone()
        }
    );

    assert_eq!(handle.request_download().await, Some(expected));
    handle.shutdown().await;
}
