use file_registry_embeddings::EmbeddingError;
use file_registry_embeddings::EmbeddingProvider;
use file_registry_embeddings::TaskType;
use file_registry_embeddings::VertexClient;
use file_registry_embeddings::VertexConfig;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_partial_json;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;

fn client_for(server: &MockServer) -> VertexClient {
    VertexClient::new(VertexConfig {
        endpoint: format!("{}/v1/models", server.uri()),
        model: "text-embedding-005".to_string(),
        api_key: Some("token".to_string()),
        dimension: 3,
        max_batch: 2,
        max_chars: 50,
        timeout: Duration::from_secs(5),
        ..Default::default()
    })
    .expect("client")
}

fn prediction(values: [f32; 3], tokens: u64) -> serde_json::Value {
    json!({ "embeddings": { "values": values, "statistics": { "token_count": tokens, "truncated": false } } })
}

#[tokio::test]
async fn test_predict_request_shape_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/models/text-embedding-005:predict"))
        .and(header("authorization", "Bearer token"))
        .and(body_partial_json(json!({
            "instances": [
                { "task_type": "RETRIEVAL_DOCUMENT", "content": "alpha" },
                { "task_type": "RETRIEVAL_DOCUMENT", "content": "beta" }
            ],
            "parameters": { "outputDimensionality": 3 }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "predictions": [prediction([1.0, 0.0, 0.0], 4), prediction([0.0, 1.0, 0.0], 6)],
            "metadata": { "billableCharacterCount": 9 }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let embedded = client
        .embed_texts(
            &["alpha".to_string(), "beta".to_string()],
            TaskType::RetrievalDocument,
        )
        .await
        .expect("embed");

    assert_eq!(embedded.vectors, vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]);
    assert_eq!(embedded.usage.total_tokens, 10);
    assert_eq!(embedded.usage.billable_characters, 9);
    assert_eq!(client.model_tag(), "vertex/text-embedding-005");
}

#[tokio::test]
async fn test_long_inputs_are_truncated_before_sending() {
    let server = MockServer::start().await;
    let long = format!("{} {}", "a".repeat(45), "b".repeat(40));
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "instances": [{ "task_type": "RETRIEVAL_QUERY", "content": "a".repeat(45) }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "predictions": [prediction([0.0, 0.0, 1.0], 1)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (vector, usage) = client_for(&server)
        .embed_one(&long, TaskType::RetrievalQuery)
        .await
        .expect("embed");
    assert_eq!(vector, vec![0.0, 0.0, 1.0]);
    assert_eq!(usage.total_tokens, 1);
}

#[tokio::test]
async fn test_rejects_more_texts_than_cap() {
    let server = MockServer::start().await;
    let texts: Vec<String> = (0..3).map(|i| format!("t{i}")).collect();
    let err = client_for(&server)
        .embed_texts(&texts, TaskType::RetrievalDocument)
        .await
        .expect_err("over cap");
    assert!(matches!(err, EmbeddingError::TooManyTexts { max: 2, actual: 3 }));
}

#[tokio::test]
async fn test_api_error_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .embed_one("x", TaskType::RetrievalQuery)
        .await
        .expect_err("quota");
    assert_eq!(err.to_string(), "embedding API error: 429 - quota exceeded");
}
