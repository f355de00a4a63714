use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use claimsentry_api::{build_router, AppState};
use claimsentry_core::rules::StaticRuleRepository;
use claimsentry_core::{JsonClaimStore, RuleEngine, Settings};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    let engine = RuleEngine::compile(StaticRuleRepository::builtin().rules().to_vec())
        .expect("built-in rules compile");
    let state = AppState::new(
        Settings::default(),
        Arc::new(JsonClaimStore::in_memory()),
        engine,
    )
    .expect("state builds");
    build_router(state)
}

async fn read_json(resp: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    (status, read_json(resp).await)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn suspicious_claim() -> Value {
    json!({
        "claim_id": "CLM90000001",
        "policy_number": "POL555001",
        "claimant_name": "Fai Ho",
        "claimant_id": "HK5550001",
        "provider_name": "Tuen Mun Hospital",
        "provider_id": "PRV0666",
        "claim_amount": 250000,
        "claim_date": "2024-03-16T11:00:00Z",
        "policy_inception_date": "2024-03-06T11:00:00Z",
        "treatment_code": "T345",
        "diagnosis_code": "D120",
        "location": { "district": "Tuen Mun", "latitude": 22.391, "longitude": 113.9773 }
    })
}

#[tokio::test]
async fn health_and_root() {
    let app = app();
    let (status, body) = send(&app, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "development");

    let (status, body) = send(&app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "operational");
}

#[tokio::test]
async fn submit_analyze_explain_delete_round_trip() {
    let app = app();

    let (status, body) = send(&app, post_json("/api/claims/submit", suspicious_claim())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["claim_id"], "CLM90000001");
    assert_eq!(body["status"], "submitted");

    let (status, body) = send(&app, get("/api/analysis/results/CLM90000001")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("run analysis first"));

    let (status, body) = send(
        &app,
        post_json("/api/analysis/analyze", json!({ "claim_id": "CLM90000001" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["risk_score"]["risk_level"], "high");
    assert_eq!(body["risk_score"]["overall_score"], 50.0);
    assert_eq!(body["rule_based_flags"].as_array().unwrap().len(), 5);

    let (status, body) = send(&app, get("/api/claims/CLM90000001")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "flagged");
    assert_eq!(body["risk_level"], "high");

    let (status, body) = send(&app, get("/api/analysis/results/CLM90000001")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["claim_id"], "CLM90000001");

    let (status, body) = send(
        &app,
        Request::post("/api/analysis/explain/CLM90000001")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["summary"].as_str().unwrap().contains("HIGH RISK"));
    assert!(body["top_factors"].as_array().unwrap().len() <= 5);

    let (status, body) = send(&app, get("/api/dashboard/recent-alerts")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["claim_id"], "CLM90000001");
    assert_eq!(body[0]["alert_id"], "ALT00001");

    let (status, body) = send(
        &app,
        Request::delete("/api/claims/CLM90000001")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Claim deleted successfully");

    let (status, _) = send(&app, get("/api/analysis/results/CLM90000001")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        &app,
        Request::delete("/api/claims/CLM90000001")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validation_errors_are_bad_requests() {
    let app = app();

    let mut claim = suspicious_claim();
    claim["policy_number"] = json!("  ");
    let (status, body) = send(&app, post_json("/api/claims/submit", claim)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("policy_number"));

    let (status, _) = send(&app, get("/api/claims/?page_size=500")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, get("/api/dashboard/trends?granularity=hour")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("hour"));

    let (status, _) = send(&app, get("/api/dashboard/providers?limit=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/api/dashboard/stats?start_date=yesterday")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get("/api/analysis/batch-analyze?claim_ids=")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_resources_are_not_found() {
    let app = app();
    let (status, body) = send(&app, get("/api/claims/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "claim `nope` not found");

    let (status, _) = send(
        &app,
        post_json("/api/analysis/analyze", json!({ "claim_id": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, get("/api/dashboard/network-graph?claim_id=nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Request::put("/api/claims/nope/status")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "status": "approved" }).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_batch_and_status_updates() {
    let app = app();
    send(&app, post_json("/api/claims/submit", suspicious_claim())).await;

    let (status, body) = send(
        &app,
        get("/api/analysis/batch-analyze?claim_ids=CLM90000001,%20missing"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["successful"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["errors"][0]["claim_id"], "missing");

    let (status, body) = send(&app, get("/api/claims?status=flagged")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["claims"][0]["claim_id"], "CLM90000001");

    let (status, body) = send(
        &app,
        Request::put("/api/claims/CLM90000001/status")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "status": "rejected" }).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");

    let (_, body) = send(&app, get("/api/dashboard/stats")).await;
    assert_eq!(body["total_claims"], 1);
    assert_eq!(body["flagged_claims"], 1);

    let (status, body) = send(&app, get("/api/analysis/feature-importance")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 6);
}

#[tokio::test]
async fn resubmitted_claim_is_reanalyzed() {
    let app = app();
    let mut routine = suspicious_claim();
    routine["claim_amount"] = json!(1234.5);
    routine["policy_inception_date"] = json!("2022-03-01T00:00:00Z");
    send(&app, post_json("/api/claims/submit", routine)).await;

    let analyze = || post_json("/api/analysis/analyze", json!({ "claim_id": "CLM90000001" }));
    let (status, first) = send(&app, analyze()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(first["rule_based_flags"].as_array().unwrap().len() < 5);
    assert_ne!(first["risk_score"]["overall_score"], 50.0);

    let (status, _) = send(&app, post_json("/api/claims/submit", suspicious_claim())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, second) = send(&app, analyze()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["risk_score"]["overall_score"], 50.0);
    assert_eq!(second["risk_score"]["risk_level"], "high");
    assert_eq!(second["rule_based_flags"].as_array().unwrap().len(), 5);

    let (status, body) = send(&app, get("/api/analysis/results/CLM90000001")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["risk_score"]["overall_score"], 50.0);
}

#[tokio::test]
async fn oversized_batches_are_rejected() {
    let app = app();
    let ids = |count: usize| {
        (0..count)
            .map(|n| format!("CLM{n:08}"))
            .collect::<Vec<_>>()
            .join(",")
    };

    let uri = format!("/api/analysis/batch-analyze?claim_ids={}", ids(101));
    let (status, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("at most 100"));

    let uri = format!("/api/analysis/batch-analyze?claim_ids={}", ids(100));
    let (status, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 100);
    assert_eq!(body["failed"], 100);
}

#[tokio::test]
async fn upload_extracts_text_documents() {
    let app = app();
    let boundary = "claimsentry-test-boundary";
    let form = "Policy Number: POL778899\n\
                Claimant Name: Chan Tai Man\n\
                HKID: A1234567\n\
                Provider Name: Kowloon Medical Centre\n\
                Provider ID: PRV0321\n\
                Claim Amount: HKD 12,480.50\n\
                Claim Date: 2024-05-04\n\
                Policy Inception Date: 15/01/2023\n\
                Treatment Code: T045\n\
                Diagnosis Code: D101\n";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"claim.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         {form}\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::post("/api/claims/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "extracted");
    assert_eq!(body["extracted_data"]["policy_number"], "POL778899");
    assert_eq!(body["extracted_data"]["claim_amount"], 12480.5);

    let claim_id = body["claim_id"].as_str().unwrap().to_string();
    let (status, _) = send(&app, get(&format!("/api/claims/{claim_id}"))).await;
    assert_eq!(status, StatusCode::OK);

    let bad = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"claim.exe\"\r\n\
         Content-Type: application/octet-stream\r\n\r\n\
         MZ\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::post("/api/claims/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(bad))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("File type not supported"));
}

#[tokio::test]
async fn chat_conversation_lifecycle() {
    let app = app();
    let (status, body) = send(
        &app,
        post_json("/api/chat/message", json!({ "message": "How many claims are flagged?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"], "data_query");
    let conversation_id = body["conversation_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        post_json(
            "/api/chat/message",
            json!({ "message": "Plot the trend", "conversation_id": conversation_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["visualization"]["chart_type"], "line");

    let uri = format!("/api/chat/conversation/{conversation_id}");
    let (status, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"].as_array().unwrap().len(), 4);
    assert_eq!(body["messages"][0]["role"], "user");

    let (status, body) = send(&app, Request::delete(&uri).body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Conversation deleted");
    let (status, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Conversation not found");

    let (status, _) = send(
        &app,
        post_json("/api/chat/execute-code", json!({ "code": "print(1)" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);

    let (status, body) = send(&app, get("/api/chat/suggestions?query=benford")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["suggestions"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, post_json("/api/chat/message", json!({ "message": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
