//! End-to-end tests over the library: real SQLite, disk store, web loader,
//! and an Ollama stand-in served by wiremock.

use std::sync::Arc;
use std::time::Duration;

use docflow::config::Config;
use docflow::models::TaskStatus;
use docflow::server;
use docflow::tasks::TaskQuery;
use docflow::worker::WorkerPool;
use docflow::workflow::Workflow;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = "<html><head><title>Notes</title></head><body><article>\
    <p>Ada Lovelace wrote about the Analytical Engine.</p>\
    </article></body></html>";

async fn mock_site() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/notes"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("CONCISE SUMMARY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "  Ada Lovelace described the Analytical Engine.  "
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("entity|target|relationship"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "**entity|target|relationship\nAda Lovelace|Analytical Engine|wrote about"
        })))
        .mount(&server)
        .await;

    server
}

fn config_for(tmp: &TempDir, server: &MockServer) -> Config {
    let mut config = Config::minimal(tmp.path());
    config.analysis.provider = "ollama".to_string();
    config.analysis.base_url = server.uri();
    config.analysis.max_retries = 0;
    config.loaders.request_timeout_secs = 5;
    config.worker.task_timeout_secs = 30;
    config
}

#[tokio::test]
async fn test_pipeline_with_disk_store() {
    let server = mock_site().await;
    let tmp = TempDir::new().unwrap();
    let config = config_for(&tmp, &server);
    let workflow = Workflow::from_config(&config).await.unwrap();

    let url = format!("{}/notes#intro", server.uri());
    let (registration, job) = workflow.register_url(&url, false).await.unwrap();
    let reports = workflow.execute(job.unwrap()).await.unwrap();
    assert!(
        reports.iter().all(|r| r.status == TaskStatus::Complete),
        "{:?}",
        reports
    );

    let summary = workflow.summary(&registration.hash).await.unwrap();
    assert_eq!(
        summary.summary.as_deref(),
        Some("Ada Lovelace described the Analytical Engine.")
    );

    let entities = workflow.entities(&registration.hash).await.unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].entity, "Ada Lovelace");
    assert_eq!(entities[0].relationship, "wrote about");

    let h = &registration.hash;
    let doc_dir = config.store.root.join(&h[0..2]).join(&h[2..4]).join(h);
    assert!(doc_dir.join("content.json").exists());
    assert!(doc_dir.join("summary.json").exists());
    assert!(doc_dir.join("entity-relations.json").exists());

    // Re-registering without force is a no-op.
    let (again, job) = workflow.register_url(&url, false).await.unwrap();
    assert!(again.duplicate);
    assert!(job.is_none());

    workflow.purge(&registration.hash).await.unwrap();
    assert!(!doc_dir.exists());
    assert!(!workflow.summary(&registration.hash).await.unwrap().has_summary);

    // The registry still remembers what ran.
    let tasks = workflow.list_tasks(&TaskQuery::default()).await.unwrap();
    assert_eq!(tasks.len(), 3);
}

async fn wait_until_settled(client: &reqwest::Client, base: &str) -> serde_json::Value {
    for _ in 0..100 {
        let body: serde_json::Value = client
            .get(format!("{}/tasks?filter=pending", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["tasks"].as_array().unwrap().is_empty() {
            return client
                .get(format!("{}/tasks?include_retried=true", base))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("tasks did not settle");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_http_api() {
    let site = mock_site().await;
    let tmp = TempDir::new().unwrap();
    let config = config_for(&tmp, &site);

    let workflow = Workflow::from_config(&config).await.unwrap();
    let workers = WorkerPool::start(workflow.clone(), &config.worker)
        .await
        .unwrap();
    let app = server::router(workflow, Arc::new(workers));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let registration: serde_json::Value = client
        .post(format!("{}/process", base))
        .json(&serde_json::json!({ "url": format!("{}/notes", site.uri()) }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(registration["duplicate"], false);
    assert!(registration["result_id"].is_string());
    let hash = registration["hash"].as_str().unwrap().to_string();

    let tasks = wait_until_settled(&client, &base).await;
    let rows = tasks["tasks"].as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r["status"] == "COMPLETE"));

    let summary: serde_json::Value = client
        .get(format!("{}/summary/{}", base, hash))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["has_summary"], true);

    let documents: serde_json::Value = client
        .get(format!("{}/process", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(documents[0]["hash"], hash.as_str());
    assert_eq!(documents[0]["has_summary"], true);

    let retry: serde_json::Value = client
        .post(format!("{}/tasks/{}/summarize/retry", base, hash))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(retry["task_id"].is_string());

    let tasks = wait_until_settled(&client, &base).await;
    let rows = tasks["tasks"].as_array().unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(
        rows.iter().filter(|r| !r["retry_task_id"].is_null()).count(),
        1
    );

    let missing = client
        .get(format!("{}/summary/{}", base, "0".repeat(64)))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    let body: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let bad = client
        .get(format!("{}/tasks?filter=running", base))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);

    let unsupported = client
        .post(format!("{}/process", base))
        .json(&serde_json::json!({ "url": "ftp://example.com/file" }))
        .send()
        .await
        .unwrap();
    assert_eq!(unsupported.status(), reqwest::StatusCode::BAD_REQUEST);
}
