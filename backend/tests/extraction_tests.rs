use base64::{engine::general_purpose, Engine};
use campus_marketplace::extraction::{
    GeminiConfig, GeminiExtractor, ImageUpload, ListingAnalyzer, ListingCategory, ExtractionError,
};
use httpmock::prelude::*;
use serde_json::json;
use std::time::Duration;

const MODEL: &str = "gemini-test";
const API_KEY: &str = "test-api-key";

fn extractor(server: &MockServer, timeout: Duration) -> GeminiExtractor {
    GeminiExtractor::new(GeminiConfig {
        api_key: API_KEY.to_string(),
        model: MODEL.to_string(),
        base_url: server.base_url(),
        timeout,
    })
    .unwrap()
}

fn jpeg() -> ImageUpload {
    ImageUpload {
        bytes: vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4],
        mime_type: "image/jpeg".to_string(),
    }
}

fn candidate_text(text: &str) -> serde_json::Value {
    json!({
        "candidates": [
            { "content": { "parts": [ { "text": text } ], "role": "model" } }
        ]
    })
}

fn generate_path() -> String {
    format!("/models/{}:generateContent", MODEL)
}

#[tokio::test]
async fn fenced_answer_is_parsed() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(generate_path())
                .header("x-goog-api-key", API_KEY);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(candidate_text("```json\n{\"title\":\"Chair\"}\n```"));
        })
        .await;

    let fields = extractor(&server, Duration::from_secs(5))
        .extract_listing_from_image(jpeg())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(serde_json::to_value(&fields).unwrap(), json!({"title": "Chair"}));
}

#[tokio::test]
async fn request_carries_prompt_and_inline_image() {
    let server = MockServer::start_async().await;
    let image = jpeg();
    let encoded = general_purpose::STANDARD.encode(&image.bytes);
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(generate_path())
                .body_contains(encoded.as_str())
                .body_contains("\"mime_type\":\"image/jpeg\"")
                .body_contains("estimated_price");
            then.status(200).json_body(candidate_text(
                r#"{"title":"Dell Inspiron 15","category":"Electronics","description":"Laptop with charger","estimated_price":32000,"price_reasoning":"Two years old"}"#,
            ));
        })
        .await;

    let fields = extractor(&server, Duration::from_secs(5))
        .extract_listing_from_image(image)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(fields.title.as_deref(), Some("Dell Inspiron 15"));
    assert_eq!(fields.category, Some(ListingCategory::Electronics));
    assert_eq!(fields.estimated_price.and_then(|p| p.as_u64()), Some(32000));
}

#[tokio::test]
async fn server_error_is_an_upstream_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(generate_path());
            then.status(500).body("internal");
        })
        .await;

    let result = extractor(&server, Duration::from_secs(5))
        .extract_listing_from_image(jpeg())
        .await;
    assert!(matches!(result, Err(ExtractionError::Upstream(_))));
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(generate_path());
            then.status(200)
                .delay(Duration::from_secs(3))
                .json_body(candidate_text("{\"title\":\"Late\"}"));
        })
        .await;

    let result = extractor(&server, Duration::from_millis(200))
        .extract_listing_from_image(jpeg())
        .await;
    assert!(matches!(result, Err(ExtractionError::Timeout)));
}

#[tokio::test]
async fn missing_candidates_are_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(generate_path());
            then.status(200).json_body(json!({ "candidates": [] }));
        })
        .await;

    let result = extractor(&server, Duration::from_secs(5))
        .extract_listing_from_image(jpeg())
        .await;
    assert!(matches!(result, Err(ExtractionError::Malformed(_))));
}

#[tokio::test]
async fn non_json_answer_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(generate_path());
            then.status(200)
                .json_body(candidate_text("I think this is a chair worth about 500 rupees."));
        })
        .await;

    let result = extractor(&server, Duration::from_secs(5))
        .extract_listing_from_image(jpeg())
        .await;
    assert!(matches!(result, Err(ExtractionError::Malformed(_))));
}

#[tokio::test]
async fn out_of_set_category_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(generate_path());
            then.status(200).json_body(candidate_text(
                r#"{"title":"Cricket bat","category":"Sports","estimated_price":800}"#,
            ));
        })
        .await;

    let result = extractor(&server, Duration::from_secs(5))
        .extract_listing_from_image(jpeg())
        .await;
    assert!(matches!(result, Err(ExtractionError::Malformed(_))));
}

#[tokio::test]
async fn html_error_page_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(generate_path());
            then.status(200).header("Content-Type", "text/html").body("<html>oops</html>");
        })
        .await;

    let result = extractor(&server, Duration::from_secs(5))
        .extract_listing_from_image(jpeg())
        .await;
    assert!(matches!(result, Err(ExtractionError::Malformed(_))));
}

#[tokio::test]
async fn unreachable_upstream_is_an_upstream_failure() {
    let extractor = GeminiExtractor::new(GeminiConfig {
        api_key: API_KEY.to_string(),
        model: MODEL.to_string(),
        // Nothing listens on the discard port.
        base_url: "http://127.0.0.1:9".to_string(),
        timeout: Duration::from_secs(2),
    })
    .unwrap();

    let result = extractor.extract_listing_from_image(jpeg()).await;
    match result {
        Err(e @ ExtractionError::Upstream(_)) | Err(e @ ExtractionError::Timeout) => {
            assert!(!e.to_string().contains(API_KEY));
        }
        other => panic!("expected upstream failure, got {:?}", other),
    }
}

#[tokio::test]
async fn model_refusal_is_malformed() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(generate_path());
            then.status(200)
                .json_body(candidate_text("{\"error\":\"No product visible in the image\"}"));
        })
        .await;

    let result = extractor(&server, Duration::from_secs(5))
        .extract_listing_from_image(jpeg())
        .await;
    assert!(matches!(result, Err(ExtractionError::Malformed(_))));
}
