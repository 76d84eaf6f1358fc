//! Full sync runs against a mocked PostgREST/GoTrue backend

use std::sync::Arc;

use mockito::Matcher;
use serde_json::json;
use sync_lib::{
    GoTrueIdentity, PostgrestClient, RemoteConfig, StagedContact, StagedZone, SyncBatch,
    SyncConfig, SyncError, SyncOrchestrator, SyncState,
};

fn remote_config(server: &mockito::ServerGuard) -> RemoteConfig {
    RemoteConfig::new(server.url(), "anon-key").with_access_token("user-jwt")
}

fn orchestrator(config: &RemoteConfig) -> SyncOrchestrator {
    SyncOrchestrator::with_store(
        Arc::new(GoTrueIdentity::new(config).unwrap()),
        Arc::new(PostgrestClient::new(config).unwrap()),
        SyncConfig::default(),
    )
}

#[tokio::test]
async fn test_sync_over_http() {
    let mut server = mockito::Server::new_async().await;

    let auth = server
        .mock("GET", "/auth/v1/user")
        .match_header("authorization", "Bearer user-jwt")
        .with_status(200)
        .with_body(r#"{"id": "owner-1"}"#)
        .create_async()
        .await;

    let zone_row = json!({
        "id": 1,
        "user_id": "owner-1",
        "nombre": "Centro",
        "descripcion": "Plaza",
        "created_at": "2024-05-01T10:00:00+00:00"
    });

    let zone_upsert = server
        .mock("POST", "/rest/v1/zones")
        .match_query(Matcher::UrlEncoded(
            "on_conflict".into(),
            "user_id,nombre".into(),
        ))
        .match_body(Matcher::Json(json!([
            {"user_id": "owner-1", "nombre": "Centro", "descripcion": "Plaza"}
        ])))
        .with_status(201)
        .with_body(json!([zone_row]).to_string())
        .create_async()
        .await;

    let zone_query = server
        .mock("GET", "/rest/v1/zones")
        .match_query(Matcher::UrlEncoded("user_id".into(), "eq.owner-1".into()))
        .with_status(200)
        .with_body(json!([zone_row]).to_string())
        .create_async()
        .await;

    let contact_upsert = server
        .mock("POST", "/rest/v1/contacts")
        .match_query(Matcher::UrlEncoded("on_conflict".into(), "id".into()))
        .match_body(Matcher::Json(json!([{
            "user_id": "owner-1",
            "zona_id": 1,
            "nombre": "Ana",
            "telefono": "5551234567",
            "asistencia": true,
            "interes": false
        }])))
        .with_status(201)
        .with_body(
            json!([{
                "id": 10,
                "user_id": "owner-1",
                "zona_id": 1,
                "nombre": "Ana",
                "telefono": "5551234567",
                "asistencia": true,
                "interes": false
            }])
            .to_string(),
        )
        .create_async()
        .await;

    let batch = SyncBatch::new(vec![StagedZone::new("Centro").with_description("Plaza")])
        .with_group(
            "Centro",
            vec![StagedContact::new("Ana")
                .with_phone("+52 555 123 4567")
                .with_flags(true, false)],
        );

    let orchestrator = orchestrator(&remote_config(&server));
    let report = orchestrator.sync(&batch).await.unwrap();

    auth.assert_async().await;
    zone_upsert.assert_async().await;
    zone_query.assert_async().await;
    contact_upsert.assert_async().await;

    assert_eq!(report.zones_uploaded, 1);
    assert_eq!(report.contacts_uploaded, 1);
    assert_eq!(report.grouped_contacts["Centro"][0].id, Some(10));
    assert_eq!(orchestrator.state(), SyncState::Completed);
}

#[tokio::test]
async fn test_expired_session_stops_before_any_write() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("GET", "/auth/v1/user")
        .with_status(401)
        .with_body(r#"{"msg": "JWT expired"}"#)
        .create_async()
        .await;
    let writes = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let batch = SyncBatch::new(vec![StagedZone::new("Centro")]);
    let failure = orchestrator(&remote_config(&server))
        .sync(&batch)
        .await
        .unwrap_err();

    writes.assert_async().await;
    assert_eq!(failure.stage, SyncState::ResolvingIdentity);
    assert_eq!(failure.error, SyncError::Unauthenticated);
}

#[tokio::test]
async fn test_dangling_zone_is_reported_as_remote_failure() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("GET", "/auth/v1/user")
        .with_status(200)
        .with_body(r#"{"id": "owner-1"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/rest/v1/zones")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;
    server
        .mock("POST", "/rest/v1/contacts")
        .match_query(Matcher::Any)
        .with_status(409)
        .with_body(r#"{"code": "23503", "message": "violates foreign key constraint"}"#)
        .create_async()
        .await;

    let batch =
        SyncBatch::default().with_contacts(vec![StagedContact::new("Ana").with_zone_id(99)]);
    let failure = orchestrator(&remote_config(&server))
        .sync(&batch)
        .await
        .unwrap_err();

    assert_eq!(failure.stage, SyncState::ContactUpload);
    match failure.error {
        SyncError::RemoteUnavailable { operation, reason } => {
            assert_eq!(operation, "upsert contacts");
            assert!(reason.contains("rows rejected"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_group_mixing_known_and_new_contacts() {
    let mut server = mockito::Server::new_async().await;

    server
        .mock("GET", "/auth/v1/user")
        .with_status(200)
        .with_body(r#"{"id": "owner-1"}"#)
        .create_async()
        .await;
    server
        .mock("GET", "/rest/v1/zones")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(r#"[{"id": 1, "user_id": "owner-1", "nombre": "Centro"}]"#)
        .create_async()
        .await;
    let contact_upsert = server
        .mock("POST", "/rest/v1/contacts")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("on_conflict".into(), "id".into()),
            Matcher::Regex("columns=".into()),
        ]))
        .with_status(201)
        .with_body(
            json!([
                {"id": 10, "user_id": "owner-1", "zona_id": 1, "nombre": "Ana"},
                {"id": 11, "user_id": "owner-1", "zona_id": 1, "nombre": "Luis"}
            ])
            .to_string(),
        )
        .create_async()
        .await;

    let batch = SyncBatch::default().with_group(
        "Centro",
        vec![StagedContact::new("Ana").with_id(10), StagedContact::new("Luis")],
    );
    let report = orchestrator(&remote_config(&server))
        .sync(&batch)
        .await
        .unwrap();

    contact_upsert.assert_async().await;
    assert_eq!(report.contacts_uploaded, 2);
    assert_eq!(report.grouped_contacts["Centro"][1].id, Some(11));
}
