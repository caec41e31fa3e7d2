use super::*;
use crate::command::CommandResult;
use crate::config::StorageConfig;
use crate::interfaces::{CommandError, CommandHandler, HandlerRegistry};
use crate::storage::init_storage;
use async_trait::async_trait;
use http::Method;
use sqlx::SqliteConnection;
use tempfile::TempDir;

/// Creates a widget row; fails on a `"name": "broken"` payload.
struct CreateWidget;

#[async_trait]
impl CommandHandler for CreateWidget {
    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        command: &CommandDescriptor,
        _principal: &Principal,
    ) -> crate::interfaces::command_handler::Result<CommandResult> {
        let name = command
            .field("name")
            .and_then(|v| v.as_str())
            .unwrap_or("widget")
            .to_string();
        if name == "broken" {
            return Err(CommandError::domain_rule("error.msg.widget.broken", "Broken widget"));
        }
        let done = sqlx::query("INSERT INTO widgets (name) VALUES (?)")
            .bind(&name)
            .execute(&mut *conn)
            .await?;
        Ok(CommandResult::with_resource_id(done.last_insert_rowid()))
    }
}

/// Adds a part to an existing widget.
struct AddPart;

#[async_trait]
impl CommandHandler for AddPart {
    async fn execute(
        &self,
        conn: &mut SqliteConnection,
        command: &CommandDescriptor,
        _principal: &Principal,
    ) -> crate::interfaces::command_handler::Result<CommandResult> {
        let widget_id = command.entity_id.unwrap_or_default();
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM widgets WHERE id = ?")
            .bind(widget_id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(CommandError::ResourceNotFound {
                entity: "Widget".to_string(),
                id: widget_id,
            });
        }
        Ok(CommandResult::with_resource_id(widget_id))
    }
}

async fn setup(max_requests: usize) -> (TempDir, BatchCoordinator) {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        path: dir.path().join("ledger.db").to_string_lossy().into_owned(),
        ..StorageConfig::default()
    };
    let ledger = init_storage(&config).await.unwrap();
    sqlx::query("CREATE TABLE widgets (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)")
        .execute(ledger.pool())
        .await
        .unwrap();

    let handlers = HandlerRegistry::new()
        .register("CREATE", "WIDGET", Arc::new(CreateWidget))
        .register("ADDPART", "WIDGET", Arc::new(AddPart));
    let routes = RouteTable::new()
        .route(Method::POST, "widgets", "CREATE", "WIDGET")
        .route(Method::POST, "widgets/{id}/parts", "ADDPART", "WIDGET");
    let admission = Arc::new(CommandAdmission::new(ledger, handlers));

    (
        dir,
        BatchCoordinator::new(admission, routes, BatchConfig { max_requests }),
    )
}

fn principal() -> Principal {
    Principal::new(1, "batch")
}

fn create(id: i64, name: &str) -> BatchRequest {
    BatchRequest::new(id, "POST", "widgets").with_body(&json!({ "name": name }))
}

fn add_part(id: i64, reference: i64) -> BatchRequest {
    BatchRequest::new(id, "POST", "widgets/$.resourceId/parts").with_reference(reference)
}

async fn widget_count(coordinator: &BatchCoordinator) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM widgets")
        .fetch_one(coordinator.admission.ledger().pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_oversized_batch_rejected_before_running() {
    let (_dir, coordinator) = setup(2).await;
    let requests = vec![create(1, "a"), create(2, "b"), create(3, "c")];

    for enclosing in [true, false] {
        let responses = coordinator.execute(&requests, &principal(), enclosing).await;
        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| r.status_code == 400));
        assert_eq!(responses[0].body["code"], TOO_MANY_REQUESTS_CODE);
    }
    assert_eq!(widget_count(&coordinator).await, 0);
}

#[tokio::test]
async fn test_independent_substitutes_resource_id() {
    let (_dir, coordinator) = setup(10).await;
    let requests = vec![create(1, "a"), add_part(2, 1)];

    let responses = coordinator.execute_independent(&requests, &principal()).await;

    assert_eq!(responses[0].status_code, 200);
    assert_eq!(responses[1].status_code, 200);
    assert_eq!(
        responses[1].body["resourceId"],
        responses[0].body["resourceId"]
    );
}

#[tokio::test]
async fn test_independent_dependency_forbidden_is_transitive() {
    let (_dir, coordinator) = setup(10).await;
    let requests = vec![
        create(1, "broken"),
        add_part(2, 1),
        add_part(3, 2),
        create(4, "fine"),
    ];

    let responses = coordinator.execute_independent(&requests, &principal()).await;

    let codes: Vec<u16> = responses.iter().map(|r| r.status_code).collect();
    assert_eq!(codes, vec![403, 403, 403, 200]);
    assert_eq!(responses[0].body["code"], "error.msg.widget.broken");
    assert_eq!(responses[1].body["code"], DEPENDENCY_FAILED_CODE);
    assert_eq!(responses[2].body["code"], DEPENDENCY_FAILED_CODE);
    assert_eq!(widget_count(&coordinator).await, 1);
}

#[tokio::test]
async fn test_independent_invalid_reference_and_route() {
    let (_dir, coordinator) = setup(10).await;
    let mut malformed = BatchRequest::new(4, "POST", "widgets");
    malformed.body = "{oops".to_string();
    let requests = vec![
        add_part(1, 2),
        create(2, "a"),
        BatchRequest::new(3, "DELETE", "widgets"),
        malformed,
    ];

    let responses = coordinator.execute_independent(&requests, &principal()).await;

    assert_eq!(responses.len(), 4);
    assert_eq!(responses[0].status_code, 400);
    assert_eq!(responses[0].body["code"], REFERENCE_INVALID_CODE);
    assert_eq!(responses[1].status_code, 200);
    assert_eq!(responses[2].status_code, 404);
    assert_eq!(responses[2].body["code"], ROUTE_NOT_FOUND_CODE);
    assert_eq!(responses[3].status_code, 400);
    assert_eq!(responses[3].body["code"], BODY_INVALID_CODE);
}

#[tokio::test]
async fn test_unresolved_placeholder() {
    let (_dir, coordinator) = setup(10).await;
    let requests = vec![
        create(1, "a"),
        BatchRequest::new(2, "POST", "widgets/$.loanId/parts").with_reference(1),
    ];

    let responses = coordinator.execute_independent(&requests, &principal()).await;
    assert_eq!(responses[1].status_code, 400);
    assert_eq!(responses[1].body["code"], PLACEHOLDER_UNRESOLVED_CODE);
}

#[tokio::test]
async fn test_enclosed_commits_all() {
    let (_dir, coordinator) = setup(10).await;
    let requests = vec![
        create(1, "a").with_idempotency_key("E1"),
        add_part(2, 1).with_idempotency_key("E2"),
    ];

    let responses = coordinator.execute_enclosed(&requests, &principal()).await;

    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(BatchResponse::is_success));
    assert_eq!(
        responses[0].headers,
        vec![Header::new("Idempotency-Key", "E1")]
    );
    assert_eq!(widget_count(&coordinator).await, 1);
}

#[tokio::test]
async fn test_enclosed_failure_truncates_and_rolls_back() {
    let (_dir, coordinator) = setup(10).await;
    let requests = vec![
        create(1, "a").with_idempotency_key("E1"),
        create(2, "broken").with_idempotency_key("E2"),
        create(3, "c").with_idempotency_key("E3"),
    ];

    let responses = coordinator.execute_enclosed(&requests, &principal()).await;

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1].status_code, 403);
    assert_eq!(widget_count(&coordinator).await, 0);
    assert!(coordinator
        .admission
        .lookup("CREATE", "WIDGET", "E1")
        .await
        .is_err());
}
