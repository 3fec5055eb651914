use super::*;
use axum::{body, body::Body, http::Request, response::Response};
use serde_json::{json, Value};
use std::path::PathBuf;
use tower::ServiceExt;

async fn test_app() -> (Router, PathBuf) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let uploads = std::env::temp_dir().join(format!("tracker_server_test_{suffix}"));
    let app = build_router(Arc::new(AppState {
        api: ApiContext::new(storage),
        files: ArtifactStore::new(&uploads),
    }));
    (app, uploads)
}

fn get_as(uri: &str, subject: &str, roles: &str) -> Request<Body> {
    Request::get(uri)
        .header(identity::SUBJECT_HEADER, subject)
        .header(identity::ROLES_HEADER, roles)
        .body(Body::empty())
        .expect("request")
}

fn post_json(uri: &str, subject: &str, roles: &str, payload: Value) -> Request<Body> {
    Request::post(uri)
        .header(identity::SUBJECT_HEADER, subject)
        .header(identity::ROLES_HEADER, roles)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request")
}

fn put_json(uri: &str, subject: &str, roles: &str, payload: Value) -> Request<Body> {
    Request::put(uri)
        .header(identity::SUBJECT_HEADER, subject)
        .header(identity::ROLES_HEADER, roles)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request")
}

async fn json_body(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Promotes a student to lead and creates a project, returning its id.
async fn create_project_as(app: &Router, subject: &str, name: &str) -> i64 {
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/profile",
            subject,
            "student",
            json!({ "mode": "lead" }),
        ))
        .await
        .expect("promote");
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/projects",
            subject,
            "student",
            json!({ "name": name }),
        ))
        .await
        .expect("create project");
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["id"].as_i64().expect("project id")
}

#[tokio::test]
async fn healthz_answers_without_identity_headers() {
    let (app, _uploads) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn healthz_reports_failure_when_storage_is_gone() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let app = build_router(Arc::new(AppState {
        api: ApiContext::new(storage.clone()),
        files: ArtifactStore::new(std::env::temp_dir()),
    }));
    storage.pool().close().await;

    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn api_routes_require_identity_headers() {
    let (app, _uploads) = test_app().await;
    let request = Request::get("/api/projects")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unrecognized_roles_are_forbidden() {
    let (app, _uploads) = test_app().await;
    let response = app
        .oneshot(get_as("/api/projects", "s-1", "admin,offline_access"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn profile_reflects_patched_fields() {
    let (app, _uploads) = test_app().await;

    let response = app
        .clone()
        .oneshot(get_as("/api/profile", "s-1", "student"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let profile = json_body(response).await;
    assert_eq!(profile["role"], "student");
    assert_eq!(profile["mode"], "participant");

    let response = app
        .oneshot(post_json(
            "/api/profile",
            "s-1",
            "student",
            json!({ "mode": "lead", "group_no": "11-901" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let profile = json_body(response).await;
    assert_eq!(profile["mode"], "lead");
    assert_eq!(profile["group_no"], "11-901");
}

#[tokio::test]
async fn project_is_hidden_from_outsiders_and_open_to_the_teacher() {
    let (app, _uploads) = test_app().await;
    let project_id = create_project_as(&app, "lead-1", "Campus Navigator").await;
    let uri = format!("/api/projects/{project_id}");

    let response = app
        .clone()
        .oneshot(get_as(&uri, "s-2", "student"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(get_as(&uri, "t-1", "teacher"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["name"], "Campus Navigator");
}

#[tokio::test]
async fn only_the_lead_may_edit_project_metadata() {
    let (app, _uploads) = test_app().await;
    let project_id = create_project_as(&app, "lead-1", "Campus Navigator").await;
    let uri = format!("/api/projects/{project_id}");

    let response = app
        .clone()
        .oneshot(put_json(&uri, "t-1", "teacher", json!({ "name": "Renamed" })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(put_json(
            &uri,
            "lead-1",
            "student",
            json!({ "tracker_url": "https://tracker.example/p1" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await["tracker_url"],
        "https://tracker.example/p1"
    );
}

#[tokio::test]
async fn milestone_publication_is_teacher_only() {
    let (app, _uploads) = test_app().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/milestones",
            "s-1",
            "student",
            json!({ "title": "MVP" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/milestones",
            "t-1",
            "teacher",
            json!({ "title": "MVP", "deadline": "2026-10-01" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app
        .oneshot(get_as("/api/milestones", "s-1", "student"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let milestones = json_body(response).await;
    assert_eq!(milestones.as_array().expect("array").len(), 1);
    assert_eq!(milestones[0]["deadline"], "2026-10-01");
}

#[tokio::test]
async fn grading_range_maps_to_bad_request() {
    let (app, _uploads) = test_app().await;
    let project_id = create_project_as(&app, "lead-1", "Campus Navigator").await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/milestones",
            "t-1",
            "teacher",
            json!({ "title": "MVP" }),
        ))
        .await
        .expect("publish");
    assert_eq!(response.status(), StatusCode::CREATED);
    let milestone_id = json_body(response).await["id"].as_i64().expect("id");
    let uri = format!("/api/projects/{project_id}/milestones/{milestone_id}/grade");

    let response = app
        .clone()
        .oneshot(post_json(&uri, "t-1", "teacher", json!({ "grade": 6 })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(&uri, "t-1", "teacher", json!({ "grade": 5 })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["grade"], 5);
}

#[tokio::test]
async fn artifact_upload_and_download_round_trip() {
    let (app, uploads) = test_app().await;
    let project_id = create_project_as(&app, "lead-1", "Campus Navigator").await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/milestones",
            "t-1",
            "teacher",
            json!({ "title": "MVP" }),
        ))
        .await
        .expect("publish");
    let milestone_id = json_body(response).await["id"].as_i64().expect("id");

    let boundary = "xYzBoundary";
    let multipart = format!(
        "--{boundary}\r\n\
         content-disposition: form-data; name=\"report\"; filename=\"final report.pdf\"\r\n\
         content-type: application/pdf\r\n\r\n\
         report bytes\r\n\
         --{boundary}--\r\n"
    );
    let upload = Request::post(format!(
        "/api/projects/{project_id}/milestones/{milestone_id}/files"
    ))
    .header(identity::SUBJECT_HEADER, "lead-1")
    .header(identity::ROLES_HEADER, "student")
    .header(
        "content-type",
        format!("multipart/form-data; boundary={boundary}"),
    )
    .body(Body::from(multipart))
    .expect("request");
    let response = app.clone().oneshot(upload).await.expect("upload");
    assert_eq!(response.status(), StatusCode::OK);
    let submission = json_body(response).await;
    assert!(submission["report_ref"]
        .as_str()
        .expect("report_ref")
        .ends_with("report_final_report.pdf"));

    let response = app
        .oneshot(get_as(
            &format!("/api/files/{project_id}/{milestone_id}/report"),
            "t-1",
            "teacher",
        ))
        .await
        .expect("download");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(&bytes[..], b"report bytes");

    tokio::fs::remove_dir_all(&uploads).await.expect("cleanup");
}

#[tokio::test]
async fn wipe_rejects_a_wrong_confirmation_phrase() {
    let (app, _uploads) = test_app().await;
    create_project_as(&app, "lead-1", "Campus Navigator").await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/admin/wipe",
            "t-1",
            "teacher",
            json!({ "confirmation": "erase all course data" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/api/admin/wipe",
            "t-1",
            "teacher",
            json!({ "confirmation": "ERASE ALL COURSE DATA" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let summary = json_body(response).await;
    assert_eq!(summary["projects"], 1);
    assert_eq!(summary["members"], 1);
}
