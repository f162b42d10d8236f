//! End-to-end tests for webhook ingress, dispatch and action execution.
//!
//! Each test starts the full router on a random port against an in-memory
//! database and a wiremock Listmonk, then drives it over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ghost_listmonk_connector::api::{self, AppState, USER_ID_HEADER};
use ghost_listmonk_connector::config::{ListmonkConfig, QueueConfig};
use ghost_listmonk_connector::executor::{ActionRunner, DeferredSpawner, Dispatcher};
use ghost_listmonk_connector::listmonk::{ListmonkClient, MarketingApi};
use ghost_listmonk_connector::logs::{ActivityLog, ExecutionLogger, WebhookLogger};
use ghost_listmonk_connector::pipeline::signature::{self, SIGNATURE_HEADER};
use ghost_listmonk_connector::pipeline::{TriggerType, WebhookProcessor};
use ghost_listmonk_connector::queue::{PersistentQueue, WorkerPool};
use ghost_listmonk_connector::sons::{Action, Son, SonService};
use ghost_listmonk_connector::store::{Database, LibSqlBackend, Webhook};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const USER: &str = "user-1";
const SECRET: &str = "test-secret";

struct Harness {
    base: String,
    endpoint: String,
    db: Arc<dyn Database>,
    spawner: Arc<DeferredSpawner>,
    pool: Arc<WorkerPool>,
    executions: Arc<ExecutionLogger>,
    http: reqwest::Client,
}

/// Start the router on a random port with one webhook and one Son seeded.
async fn start_server(listmonk_url: &str) -> Harness {
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());

    let now = Utc::now();
    let endpoint = Uuid::new_v4().to_string();
    db.insert_webhook(&Webhook {
        id: Uuid::new_v4(),
        user_id: USER.into(),
        endpoint: endpoint.clone(),
        secret: SECRET.into(),
        created_at: now,
        updated_at: now,
    })
    .await
    .unwrap();

    let params = json!({"template_id": 4}).as_object().cloned().unwrap();
    db.insert_son(&Son {
        id: Uuid::new_v4(),
        user_id: USER.into(),
        name: "Welcome".into(),
        trigger: TriggerType::MemberCreated,
        delay: "0".into(),
        actions: vec![Action::SendTransactionalEmail(params)],
        enabled: true,
        created_at: now,
        updated_at: now,
    })
    .await
    .unwrap();

    let listmonk: Arc<dyn MarketingApi> = Arc::new(
        ListmonkClient::new(&ListmonkConfig {
            base_url: listmonk_url.to_string(),
            username: None,
            password: None,
            timeout: Some(Duration::from_secs(2)),
        })
        .unwrap(),
    );
    let executions = Arc::new(ExecutionLogger::new(db.clone(), Duration::from_secs(60)));
    let activity = Arc::new(ActivityLog::new(db.clone()));
    let queue = Arc::new(PersistentQueue::new(db.clone()));
    let dispatcher = Arc::new(Dispatcher::new(queue.clone(), executions.clone()));
    let runner = Arc::new(ActionRunner::new(listmonk.clone(), executions.clone()));
    let pool = Arc::new(WorkerPool::new(queue, runner, QueueConfig::default()));
    let spawner = Arc::new(DeferredSpawner::new());

    let state = AppState {
        db: db.clone(),
        processor: Arc::new(WebhookProcessor::new(
            db.clone(),
            dispatcher,
            spawner.clone(),
        )),
        sons: Arc::new(SonService::new(db.clone(), activity.clone())),
        webhook_logs: Arc::new(WebhookLogger::new(db.clone())),
        executions: executions.clone(),
        activity,
        listmonk,
        http: reqwest::Client::new(),
        frontend_url: None,
        webhook_max_age: None,
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = api::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        base: format!("http://127.0.0.1:{port}"),
        endpoint,
        db,
        spawner,
        pool,
        executions,
        http: reqwest::Client::new(),
    }
}

fn member_created_body() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "member": {"current": {"email": "new@example.com", "name": "New Member"}}
    }))
    .unwrap()
}

fn signature_header(body: &[u8], secret: &str) -> String {
    let ts = Utc::now().timestamp_millis().to_string();
    format!("sha256={}, t={ts}", signature::sign(body, &ts, secret))
}

impl Harness {
    async fn post_webhook(&self, body: Vec<u8>, sig: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/webhook/{}", self.base, self.endpoint))
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, sig)
            .body(body)
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str) -> Value {
        self.http
            .get(format!("{}{path}", self.base))
            .header(USER_ID_HEADER, USER)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn signed_webhook_runs_son_actions() {
    timeout(TEST_TIMEOUT, async {
        let listmonk = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tx"))
            .and(body_partial_json(json!({
                "subscriber_email": "new@example.com",
                "template_id": 4
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": true})))
            .expect(1)
            .mount(&listmonk)
            .await;

        let h = start_server(&listmonk.uri()).await;
        let body = member_created_body();
        let resp = h.post_webhook(body.clone(), &signature_header(&body, SECRET)).await;

        assert_eq!(resp.status(), 200);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["message"], "Webhook processed successfully");
        assert_eq!(json["sons_executed"], 1);

        assert_eq!(h.spawner.run_pending().await, 1);
        assert_eq!(h.pool.drain().await.unwrap(), 1);

        let (executions, total) = h.executions.get_execution_logs(USER, 10, 0).await.unwrap();
        assert_eq!(total, 1);
        let actions = h.executions.get_action_logs(executions[0].id).await.unwrap();
        let statuses: Vec<String> = actions.iter().map(|a| a.status.to_string()).collect();
        assert_eq!(statuses, vec!["queued", "success"]);

        let logs = h.get_json("/api/webhook-logs").await;
        assert_eq!(logs["pagination"]["total"], 1);
        assert_eq!(logs["logs"][0]["status_code"], 200);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn bad_signature_is_rejected_and_logged() {
    timeout(TEST_TIMEOUT, async {
        let listmonk = MockServer::start().await;
        let h = start_server(&listmonk.uri()).await;

        let body = member_created_body();
        let resp = h
            .post_webhook(body.clone(), &signature_header(&body, "wrong-secret"))
            .await;
        assert_eq!(resp.status(), 401);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["error"], "Invalid signature");

        assert_eq!(h.spawner.run_pending().await, 0);
        let logs = h.get_json("/api/webhook-logs").await;
        assert_eq!(logs["logs"][0]["status_code"], 401);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unknown_endpoint_is_not_found() {
    timeout(TEST_TIMEOUT, async {
        let listmonk = MockServer::start().await;
        let h = start_server(&listmonk.uri()).await;

        let body = member_created_body();
        let resp = h
            .http
            .post(format!("{}/webhook/{}", h.base, Uuid::new_v4()))
            .header(SIGNATURE_HEADER, signature_header(&body, SECRET))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let (_, total) = h.db.list_webhook_logs(USER, 10, 0).await.unwrap();
        assert_eq!(total, 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unclassifiable_payload_is_bad_request() {
    timeout(TEST_TIMEOUT, async {
        let listmonk = MockServer::start().await;
        let h = start_server(&listmonk.uri()).await;

        let body = serde_json::to_vec(&json!({"tag": {"current": {"name": "News"}}})).unwrap();
        let resp = h.post_webhook(body.clone(), &signature_header(&body, SECRET)).await;
        assert_eq!(resp.status(), 400);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["error"], "Unable to determine trigger type");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn api_requires_caller_identity() {
    timeout(TEST_TIMEOUT, async {
        let listmonk = MockServer::start().await;
        let h = start_server(&listmonk.uri()).await;

        let resp = h
            .http
            .get(format!("{}/api/sons", h.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        let json: Value = resp.json().await.unwrap();
        assert_eq!(json["error"], "User not authenticated");

        let sons = h.get_json("/api/sons").await;
        assert_eq!(sons.as_array().unwrap().len(), 1);
        assert_eq!(sons[0]["name"], "Welcome");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn replay_resends_stored_request() {
    timeout(TEST_TIMEOUT, async {
        let listmonk = MockServer::start().await;
        let h = start_server(&listmonk.uri()).await;

        let body = member_created_body();
        let resp = h.post_webhook(body.clone(), &signature_header(&body, SECRET)).await;
        assert_eq!(resp.status(), 200);

        let logs = h.get_json("/api/webhook-logs").await;
        let log_id = logs["logs"][0]["id"].as_str().unwrap().to_string();

        let other = h
            .http
            .post(format!("{}/api/webhook-logs/{log_id}/replay", h.base))
            .header(USER_ID_HEADER, "someone-else")
            .send()
            .await
            .unwrap();
        assert_eq!(other.status(), 403);

        let replay = h
            .http
            .post(format!("{}/api/webhook-logs/{log_id}/replay", h.base))
            .header(USER_ID_HEADER, USER)
            .send()
            .await
            .unwrap();
        assert_eq!(replay.status(), 200);
        let json: Value = replay.json().await.unwrap();
        assert_eq!(json["sons_executed"], 1);

        let logs = h.get_json("/api/webhook-logs").await;
        assert_eq!(logs["pagination"]["total"], 2);
        assert_eq!(h.spawner.run_pending().await, 2);
    })
    .await
    .expect("test timed out");
}
