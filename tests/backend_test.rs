use axum::http::StatusCode;
use axum_test::TestServer;
use instaiq::backend::search::FlowConfig;
use instaiq::backend::{build_router, BackendConfig, BackendState};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const KEYSPACE_PATH: &str = "/api/json/v1/default_keyspace";
const PROFILE_POSTS_QUERY_HASH: &str = "003056d32c2554def87228bc3fd9668a";

fn backend_config(services: &MockServer) -> BackendConfig {
    BackendConfig {
        instagram_base_url: services.uri(),
        astra_endpoint: Some(services.uri()),
        astra_token: Some("astra-token".to_string()),
        collection_name: Some("posts".to_string()),
        keyspace: "default_keyspace".to_string(),
        flow: FlowConfig {
            base_api_url: Some(services.uri()),
            langflow_id: Some("flow-1".to_string()),
            endpoint: Some("insta".to_string()),
            token: Some("astra-token".to_string()),
        },
    }
}

fn test_server(config: BackendConfig) -> TestServer {
    TestServer::new(build_router(BackendState::new(config))).unwrap()
}

/// One page of timeline media holding posts `ids`, out of `total`.
fn media_page(ids: std::ops::Range<usize>, total: usize, next: Option<&str>) -> Value {
    let edges: Vec<Value> = ids
        .map(|i| {
            json!({
                "node": {
                    "id": format!("{}", 1000 + i),
                    "is_video": i % 2 == 0,
                    "taken_at_timestamp": 1_700_000_000 + i as i64,
                    "edge_liked_by": {"count": 10 * i},
                    "edge_media_to_comment": {"count": i}
                }
            })
        })
        .collect();
    json!({
        "count": total,
        "page_info": {"has_next_page": next.is_some(), "end_cursor": next},
        "edges": edges
    })
}

fn profile_body(media: Value) -> Value {
    json!({
        "data": {
            "user": {
                "id": "787132",
                "username": "natgeo",
                "edge_owner_to_timeline_media": media
            }
        }
    })
}

async fn mount_profile_media(services: &MockServer, username: &str, media: Value) {
    Mock::given(method("GET"))
        .and(path("/api/v1/users/web_profile_info/"))
        .and(query_param("username", username))
        .and(header("x-ig-app-id", "936619743392459"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profile_body(media)))
        .mount(services)
        .await;
}

async fn mount_profile(services: &MockServer, username: &str, posts: usize) {
    mount_profile_media(services, username, media_page(0..posts, posts, None)).await;
}

async fn mount_collections(services: &MockServer, existing: &[&str]) {
    Mock::given(method("POST"))
        .and(path(KEYSPACE_PATH))
        .and(header("Token", "astra-token"))
        .and(body_json(json!({"findCollections": {}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": {"collections": existing}})))
        .mount(services)
        .await;
}

#[tokio::test]
async fn test_process_data_requires_id() {
    let services = MockServer::start().await;
    let server = test_server(backend_config(&services));

    let response = server.post("/process_data").json(&json!({})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({"error": "Instagram ID is required."}));

    let response = server
        .post("/process_data")
        .json(&json!({"instagram_id": ""}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_process_data_requires_collection_name() {
    let services = MockServer::start().await;
    let mut config = backend_config(&services);
    config.collection_name = None;
    let server = test_server(config);

    let response = server
        .post("/process_data")
        .json(&json!({"instagram_id": "natgeo"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({"error": "ASTRA_DB_COLLECTION_NAME environment variable is not set."}));
}

#[tokio::test]
async fn test_process_data_requires_store_credentials() {
    let services = MockServer::start().await;
    let mut config = backend_config(&services);
    config.astra_token = None;
    let server = test_server(config);

    let response = server
        .post("/process_data")
        .json(&json!({"instagram_id": "natgeo"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("ASTRA_DB_API_ENDPOINT"));
}

#[test_log::test(tokio::test)]
async fn test_process_data_creates_collection_and_uploads() {
    let services = MockServer::start().await;
    mount_profile(&services, "natgeo", 2).await;
    mount_collections(&services, &[]).await;
    Mock::given(method("POST"))
        .and(path(KEYSPACE_PATH))
        .and(body_json(json!({
            "createCollection": {"name": "posts", "options": {"vector": {"metric": "cosine"}}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": {"ok": 1}})))
        .expect(1)
        .mount(&services)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/posts", KEYSPACE_PATH)))
        .and(body_partial_json(json!({
            "insertMany": {"documents": [
                {"post_id": "1000", "post_type": "reels", "username": "natgeo", "metadata": {"post_type": "reels", "username": "natgeo"}},
                {"post_id": "1001", "post_type": "static_image", "likes": 10, "comments": 1}
            ]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": {"insertedIds": ["a", "b"]}})))
        .expect(1)
        .mount(&services)
        .await;

    let server = test_server(backend_config(&services));
    let response = server
        .post("/process_data")
        .json(&json!({"instagram_id": "natgeo"}))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({
        "message": "Data processed successfully for Instagram ID natgeo.",
        "posts_fetched": 2,
        "posts_total": 2
    }));
}

#[test_log::test(tokio::test)]
async fn test_process_data_follows_next_page() {
    let services = MockServer::start().await;
    mount_profile_media(&services, "natgeo", media_page(0..2, 3, Some("QVFD"))).await;
    mount_collections(&services, &["posts"]).await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(query_param("query_hash", PROFILE_POSTS_QUERY_HASH))
        .and(query_param("variables", r#"{"id":"787132","first":50,"after":"QVFD"}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"user": {"edge_owner_to_timeline_media": media_page(2..3, 3, None)}}
        })))
        .expect(1)
        .mount(&services)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/posts", KEYSPACE_PATH)))
        .and(body_partial_json(json!({
            "insertMany": {"documents": [
                {"post_id": "1000"},
                {"post_id": "1001"},
                {"post_id": "1002", "likes": 20, "comments": 2}
            ]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": {"insertedIds": ["a", "b", "c"]}})))
        .expect(1)
        .mount(&services)
        .await;

    let server = test_server(backend_config(&services));
    let response = server
        .post("/process_data")
        .json(&json!({"instagram_id": "natgeo"}))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({
        "message": "Data processed successfully for Instagram ID natgeo.",
        "posts_fetched": 3,
        "posts_total": 3
    }));
}

#[tokio::test]
async fn test_process_data_reports_partial_fetch() {
    let services = MockServer::start().await;
    mount_profile_media(&services, "natgeo", media_page(0..2, 40, Some("QVFD"))).await;
    mount_collections(&services, &["posts"]).await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&services)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/posts", KEYSPACE_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": {"insertedIds": ["a", "b"]}})))
        .expect(1)
        .mount(&services)
        .await;

    let server = test_server(backend_config(&services));
    let response = server
        .post("/process_data")
        .json(&json!({"instagram_id": "natgeo"}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["posts_fetched"], 2);
    assert_eq!(body["posts_total"], 40);
}

#[tokio::test]
async fn test_process_data_uploads_in_chunks_of_fifty() {
    let services = MockServer::start().await;
    mount_profile(&services, "natgeo", 60).await;
    mount_collections(&services, &["posts"]).await;
    Mock::given(method("POST"))
        .and(path(KEYSPACE_PATH))
        .and(body_partial_json(json!({"createCollection": {"name": "posts"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": {"ok": 1}})))
        .expect(0)
        .mount(&services)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}/posts", KEYSPACE_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": {"insertedIds": []}})))
        .expect(2)
        .mount(&services)
        .await;

    let server = test_server(backend_config(&services));
    server
        .post("/process_data")
        .json(&json!({"instagram_id": "natgeo"}))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn test_process_data_unknown_profile() {
    let services = MockServer::start().await;
    mount_collections(&services, &["posts"]).await;
    Mock::given(method("GET"))
        .and(path("/api/v1/users/web_profile_info/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&services)
        .await;

    let server = test_server(backend_config(&services));
    let response = server
        .post("/process_data")
        .json(&json!({"instagram_id": "ghost"}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({"error": "The profile 'ghost' does not exist."}));
}

#[tokio::test]
async fn test_process_query_requires_query() {
    let services = MockServer::start().await;
    let server = test_server(backend_config(&services));

    let response = server.post("/process_query").json(&json!({"query": ""})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({"error": "Query string is required."}));
}

#[tokio::test]
async fn test_process_query_returns_flow_answer() {
    let services = MockServer::start().await;
    let flow_response = json!({
        "session_id": "s1",
        "outputs": [{"outputs": [{"results": {"message": {"data": {"text": "Your reels average 120 likes."}}}}]}]
    });
    Mock::given(method("POST"))
        .and(path("/lf/flow-1/api/v1/run/insta"))
        .and(header("authorization", "Bearer astra-token"))
        .and(body_json(json!({
            "input_value": "How do my reels do?",
            "output_type": "chat",
            "input_type": "chat"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(flow_response.clone()))
        .expect(1)
        .mount(&services)
        .await;

    let server = test_server(backend_config(&services));
    let response = server
        .post("/process_query")
        .json(&json!({"query": "How do my reels do?"}))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({
        "response": flow_response,
        "message": "Your reels average 120 likes."
    }));
}

#[tokio::test]
async fn test_process_query_malformed_flow_response() {
    let services = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/lf/flow-1/api/v1/run/insta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"outputs": []})))
        .mount(&services)
        .await;

    let server = test_server(backend_config(&services));
    let response = server
        .post("/process_query")
        .json(&json!({"query": "anything"}))
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    response.assert_json(&json!({
        "error": "The response format is invalid or does not contain the expected 'message' field."
    }));
}

#[tokio::test]
async fn test_process_query_flow_failure() {
    let services = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/lf/flow-1/api/v1/run/insta"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&services)
        .await;

    let server = test_server(backend_config(&services));
    let response = server
        .post("/process_query")
        .json(&json!({"query": "anything"}))
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("An error occurred while performing the vector search"));
}

#[tokio::test]
async fn test_process_query_without_flow_config() {
    let services = MockServer::start().await;
    let mut config = backend_config(&services);
    config.flow = FlowConfig::default();
    let server = test_server(config);

    let response = server
        .post("/process_query")
        .json(&json!({"query": "anything"}))
        .await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
}
