//! Integration tests for `GoogleSheets` using wiremock HTTP mocks.

use backup_reporter::error::SinkCause;
use backup_reporter::sink::{
    Area, Color, Container, GoogleSheets, Role, ServiceAccountKey, TabularSink, Worksheet,
};
use serde_json::json;
use std::path::Path;
use wiremock::matchers::{body_json, body_partial_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(server: &MockServer) -> GoogleSheets {
    GoogleSheets::with_token("test-token", &server.uri(), &server.uri())
        .expect("client construction should not fail")
}

fn book() -> Container {
    Container {
        id: "book1".to_string(),
        name: "Backups".to_string(),
    }
}

fn report_sheet() -> Worksheet {
    Worksheet {
        id: 42,
        title: "Report".to_string(),
        rows: 100,
        cols: 20,
    }
}

#[tokio::test]
async fn find_container_queries_drive_by_name() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(header("authorization", "Bearer test-token"))
        .and(query_param(
            "q",
            "name = 'Backups' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "files": [{ "id": "book1", "name": "Backups" }]
        })))
        .mount(&server)
        .await;

    let found = test_client(&server)
        .find_container("Backups")
        .await
        .expect("lookup should succeed");
    assert_eq!(found, Some(book()));
}

#[tokio::test]
async fn find_container_returns_none_when_absent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
        .mount(&server)
        .await;

    let found = test_client(&server).find_container("Nothing").await.unwrap();
    assert_eq!(found, None);
}

#[tokio::test]
async fn create_container_and_share_with_owner() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets"))
        .and(body_json(json!({ "properties": { "title": "Backups" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spreadsheetId": "book1",
            "properties": { "title": "Backups" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/drive/v3/files/book1/permissions"))
        .and(query_param("transferOwnership", "true"))
        .and(body_json(json!({
            "type": "user",
            "role": "owner",
            "emailAddress": "ops@example.com"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p1" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let container = client.create_container("Backups").await.unwrap();
    assert_eq!(container, book());
    client
        .create_permission(&container, "ops@example.com", Role::Owner)
        .await
        .unwrap();
}

#[tokio::test]
async fn permissions_are_listed_and_promoted() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files/book1/permissions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "permissions": [
                { "id": "p1", "emailAddress": "ops@example.com", "role": "writer" },
                { "id": "anyone", "role": "reader" }
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/drive/v3/files/book1/permissions/p1"))
        .and(query_param("transferOwnership", "true"))
        .and(body_json(json!({ "role": "owner" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p1", "role": "owner" })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let permissions = client.list_permissions(&book()).await.unwrap();
    assert_eq!(permissions.len(), 2);
    assert_eq!(permissions[0].role, Role::Writer);
    assert_eq!(permissions[1].email, None);

    client
        .update_permission_role(&book(), "p1", Role::Owner)
        .await
        .unwrap();
}

#[tokio::test]
async fn worksheets_are_listed_and_added() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v4/spreadsheets/book1"))
        .and(query_param("fields", "sheets.properties"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sheets": [{
                "properties": {
                    "sheetId": 0,
                    "title": "Sheet1",
                    "gridProperties": { "rowCount": 1000, "columnCount": 26 }
                }
            }]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets/book1:batchUpdate"))
        .and(body_partial_json(json!({
            "requests": [{ "addSheet": { "properties": {
                "title": "Report",
                "gridProperties": { "rowCount": 100, "columnCount": 20 }
            }}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spreadsheetId": "book1",
            "replies": [{ "addSheet": { "properties": {
                "sheetId": 42,
                "title": "Report",
                "gridProperties": { "rowCount": 100, "columnCount": 20 }
            }}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    let sheets = client.list_worksheets(&book()).await.unwrap();
    assert_eq!(sheets[0].title, "Sheet1");
    assert_eq!(sheets[0].cols, 26);

    let added = client.add_worksheet(&book(), "Report", 100, 20).await.unwrap();
    assert_eq!(added, report_sheet());
}

#[tokio::test]
async fn values_are_cleared_then_written_as_user_entered() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets/book1/values/'Report':clear"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spreadsheetId": "book1",
            "clearedRange": "Report!A1:Z1000"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/v4/spreadsheets/book1/values/'Report'!A1"))
        .and(query_param("valueInputOption", "USER_ENTERED"))
        .and(body_partial_json(json!({
            "values": [["Customer", "Type"], ["acme", "FilesBucket"]]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "updatedCells": 4 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server);
    client
        .clear_range(&book(), &report_sheet(), &Area::Whole)
        .await
        .unwrap();
    client
        .write_values(
            &book(),
            &report_sheet(),
            &[
                vec!["Customer".to_string(), "Type".to_string()],
                vec!["acme".to_string(), "FilesBucket".to_string()],
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn clear_targets_sheet_named_like_a_cell() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets/book1/values/'Q1':clear"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "spreadsheetId": "book1",
            "clearedRange": "Q1!A1:Z1000"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let quarter = Worksheet {
        title: "Q1".to_string(),
        ..report_sheet()
    };
    test_client(&server)
        .clear_range(&book(), &quarter, &Area::Whole)
        .await
        .unwrap();
}

#[tokio::test]
async fn background_targets_decoded_cell() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets/book1:batchUpdate"))
        .and(body_partial_json(json!({
            "requests": [{ "repeatCell": {
                "range": {
                    "sheetId": 42,
                    "startRowIndex": 2,
                    "endRowIndex": 3,
                    "startColumnIndex": 27,
                    "endColumnIndex": 28
                },
                "cell": { "userEnteredFormat": { "backgroundColor": { "red": 1.0, "green": 0.0, "blue": 0.0 } } },
                "fields": "userEnteredFormat.backgroundColor"
            }}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "replies": [{}] })))
        .expect(1)
        .mount(&server)
        .await;

    test_client(&server)
        .set_background(&book(), &report_sheet(), &Area::Cell("AB3".to_string()), Color::RED)
        .await
        .unwrap();
}

#[tokio::test]
async fn api_errors_carry_status_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v4/spreadsheets/book1/values/'Report':clear"))
        .respond_with(ResponseTemplate::new(429).set_body_string("Quota exceeded"))
        .mount(&server)
        .await;

    let err = test_client(&server)
        .clear_range(&book(), &report_sheet(), &Area::Whole)
        .await
        .unwrap_err();

    assert_eq!(err.operation, "clear values");
    match err.cause {
        SinkCause::Api { status, body } => {
            assert_eq!(status, 429);
            assert_eq!(body, "Quota exceeded");
        }
        other => panic!("unexpected cause: {other}"),
    }
}

#[tokio::test]
async fn connect_exchanges_signed_assertion_for_token() {
    let server = MockServer::start().await;

    let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/service_account.json");
    let mut key = ServiceAccountKey::from_file(&fixture).expect("fixture should load");
    key.token_uri = format!("{}/token", server.uri());

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
        ))
        .and(body_string_contains("assertion=ey"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "issued-token",
            "token_type": "Bearer",
            "expires_in": 3599
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/drive/v3/files"))
        .and(header("authorization", "Bearer issued-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GoogleSheets::connect_with_base_urls(&key, &server.uri(), &server.uri())
        .await
        .expect("token exchange should succeed");
    assert_eq!(client.find_container("Backups").await.unwrap(), None);
}

#[tokio::test]
async fn rejected_token_exchange_is_an_auth_error() {
    let server = MockServer::start().await;

    let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/service_account.json");
    let mut key = ServiceAccountKey::from_file(&fixture).unwrap();
    key.token_uri = format!("{}/token", server.uri());

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
        .mount(&server)
        .await;

    let err = GoogleSheets::connect_with_base_urls(&key, &server.uri(), &server.uri())
        .await
        .err()
        .expect("connect should fail");
    assert!(matches!(err.cause, SinkCause::Auth(_)));
}
