use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
};
use image::ImageFormat;
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::{
    config::{AppConfig, MAX_BRIEF_CHARS, MIN_BRIEF_CHARS},
    content::{self, GenerationInput, GenerationResult, ParseOutcome, TextBriefRequest},
    error::ServiceError,
    gemini::CaptionModel,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub model: Arc<dyn CaptionModel>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
}

pub fn build_router(config: Arc<AppConfig>, model: Arc<dyn CaptionModel>) -> Router {
    // Slack on top of the upload ceiling for multipart framing; the exact
    // ceiling is enforced per-field in the handler.
    let body_limit = config.max_upload_bytes + 8 * 1024;
    let state = AppState { config, model };

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/generate/image", post(generate_from_image))
        .route("/generate/text", post(generate_from_text))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "caption service is running",
    })
}

async fn generate_from_text(
    State(state): State<AppState>,
    Json(request): Json<TextBriefRequest>,
) -> Result<Json<GenerationResult>, ServiceError> {
    let brief = request.text_brief.trim();
    let length = brief.chars().count();
    if length < MIN_BRIEF_CHARS {
        return Err(ServiceError::BadRequest(format!(
            "text brief must be at least {MIN_BRIEF_CHARS} characters"
        )));
    }
    if length > MAX_BRIEF_CHARS {
        return Err(ServiceError::BadRequest(format!(
            "text brief must be at most {MAX_BRIEF_CHARS} characters"
        )));
    }

    let prompt = content::text_prompt(brief);
    let input = GenerationInput::TextBrief(brief.to_string());
    run_generation(&state, input, prompt).await
}

async fn generate_from_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<GenerationResult>, ServiceError> {
    let data = loop {
        let field = multipart.next_field().await.map_err(map_multipart_error)?;
        let Some(field) = field else {
            return Err(ServiceError::BadRequest(
                "no file field in upload".to_string(),
            ));
        };
        if field.name() == Some("file") {
            break field.bytes().await.map_err(map_multipart_error)?;
        }
    };

    if data.is_empty() {
        return Err(ServiceError::BadRequest(
            "uploaded file is empty".to_string(),
        ));
    }
    if data.len() > state.config.max_upload_bytes {
        return Err(ServiceError::PayloadTooLarge(format!(
            "file exceeds the {} byte limit",
            state.config.max_upload_bytes
        )));
    }

    let mime_type = sniff_image_mime(&data)?;
    // Full decode catches truncated or corrupted files that still carry a
    // valid magic number.
    image::load_from_memory(&data)
        .map_err(|_| ServiceError::BadRequest("invalid or corrupted image file".to_string()))?;

    let prompt = content::image_prompt();
    let input = GenerationInput::Image {
        bytes: data.to_vec(),
        mime_type,
    };
    run_generation(&state, input, prompt).await
}

fn sniff_image_mime(data: &[u8]) -> Result<String, ServiceError> {
    let format = image::guess_format(data).map_err(|_| {
        ServiceError::BadRequest("file is not a recognized image format".to_string())
    })?;
    match format {
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif => {
            Ok(format.to_mime_type().to_string())
        }
        other => Err(ServiceError::BadRequest(format!(
            "unsupported image format {other:?}, use jpeg, png, webp or gif"
        ))),
    }
}

fn map_multipart_error(err: axum::extract::multipart::MultipartError) -> ServiceError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServiceError::PayloadTooLarge("uploaded file is too large".to_string())
    } else {
        ServiceError::BadRequest(format!("could not read upload: {}", err.body_text()))
    }
}

async fn run_generation(
    state: &AppState,
    input: GenerationInput,
    prompt: String,
) -> Result<Json<GenerationResult>, ServiceError> {
    let raw = state.model.generate(&input, &prompt).await?;

    match content::parse(&raw)? {
        ParseOutcome::Clean(result) => Ok(Json(result)),
        ParseOutcome::Recovered(result, warnings) => {
            for warning in &warnings {
                warn!(%warning, "repaired malformed model output");
            }
            Ok(Json(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, header::CONTENT_TYPE};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    const WELL_FORMED_REPLY: &str = r##"{
        "captions": [
            {"caption": "Sip sustainably this summer 🌱", "tone": "Casual"},
            {"caption": "Hydration, engineered responsibly.", "tone": "Professional"},
            {"caption": "Your thirst called, the planet answered! 💧", "tone": "Playful"}
        ],
        "hashtag_sets": [
            {"hashtags": ["#EcoFriendly", "#Sustainable"], "category": "Trending"},
            {"hashtags": ["#WaterBottle", "#ZeroWaste"], "category": "Niche"},
            {"hashtags": ["#OurBrand", "#DrinkGreen"], "category": "Branded"}
        ],
        "posting_time": {
            "time": "7:00 AM - 9:00 AM",
            "day": "Tuesday",
            "reason": "Morning commute scrolling peaks engagement"
        },
        "content_type": "Product - Eco/Lifestyle"
    }"##;

    /// Canned model: counts calls and replies with a fixed string, or fails
    /// upstream when no reply is configured.
    struct FakeModel {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl FakeModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CaptionModel for FakeModel {
        async fn generate(
            &self,
            _input: &GenerationInput,
            _prompt: &str,
        ) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(reply) => Ok(reply.clone()),
                None => Err(ServiceError::Upstream("connection refused".to_string())),
            }
        }
    }

    fn test_router(model: Arc<dyn CaptionModel>) -> Router {
        let config = Arc::new(AppConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            gemini_api_key: "test-key".to_string(),
            gemini_base_url: "http://localhost".to_string(),
            gemini_model: "test-model".to_string(),
            upstream_timeout: Duration::from_secs(1),
            max_upload_bytes: 64 * 1024,
        });
        build_router(config, model)
    }

    fn text_request(brief: &str) -> Request<Body> {
        let body = serde_json::json!({ "text_brief": brief }).to_string();
        Request::builder()
            .method("POST")
            .uri("/generate/text")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn multipart_request(field_name: &str, bytes: &[u8]) -> Request<Body> {
        let boundary = "caption-service-test";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{field_name}\"; \
                 filename=\"upload.png\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/generate/image")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn tiny_png() -> Vec<u8> {
        let pixel = image::RgbImage::from_pixel(1, 1, image::Rgb([120, 200, 80]));
        let mut bytes = Vec::new();
        pixel
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        bytes
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).expect("response body should be JSON")
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let router = test_router(FakeModel::failing());
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
    }

    #[tokio::test]
    async fn valid_brief_yields_full_result() {
        let router = test_router(FakeModel::replying(WELL_FORMED_REPLY));
        let response = router
            .oneshot(text_request(
                "Launching our new eco-friendly water bottle this summer!",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        let captions = json["captions"].as_array().unwrap();
        assert_eq!(captions.len(), 3);
        for caption in captions {
            assert!(!caption["caption"].as_str().unwrap().is_empty());
            assert!(!caption["tone"].as_str().unwrap().is_empty());
        }
        let sets = json["hashtag_sets"].as_array().unwrap();
        assert_eq!(sets.len(), 3);
        for set in sets {
            assert!(!set["category"].as_str().unwrap().is_empty());
            assert!(!set["hashtags"].as_array().unwrap().is_empty());
        }
        for field in ["time", "day", "reason"] {
            assert!(!json["posting_time"][field].as_str().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn short_brief_is_rejected_without_model_call() {
        let model = FakeModel::replying(WELL_FORMED_REPLY);
        let router = test_router(model.clone());
        let response = router.oneshot(text_request("too short")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(!json["error"].as_str().unwrap().is_empty());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn overlong_brief_is_rejected() {
        let router = test_router(FakeModel::replying(WELL_FORMED_REPLY));
        let brief = "x".repeat(MAX_BRIEF_CHARS + 1);
        let response = router.oneshot(text_request(&brief)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sparse_model_output_is_padded_not_failed() {
        let sparse = r##"{"captions": [{"caption": "only one", "tone": "Casual"}]}"##;
        let router = test_router(FakeModel::replying(sparse));
        let response = router
            .oneshot(text_request("a perfectly valid product brief"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["captions"].as_array().unwrap().len(), 3);
        assert_eq!(json["hashtag_sets"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_bad_gateway() {
        let router = test_router(FakeModel::failing());
        let response = router
            .oneshot(text_request("a perfectly valid product brief"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(response).await;
        assert!(!json["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unparseable_model_output_is_internal_error() {
        let router = test_router(FakeModel::replying("I refuse to answer in JSON."));
        let response = router
            .oneshot(text_request("a perfectly valid product brief"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn png_upload_yields_full_result() {
        let router = test_router(FakeModel::replying(WELL_FORMED_REPLY));
        let response = router
            .oneshot(multipart_request("file", &tiny_png()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["captions"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn non_image_upload_is_rejected_without_model_call() {
        let model = FakeModel::replying(WELL_FORMED_REPLY);
        let router = test_router(model.clone());
        let response = router
            .oneshot(multipart_request("file", b"this is not an image"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_upload_is_rejected_without_model_call() {
        let model = FakeModel::replying(WELL_FORMED_REPLY);
        let router = test_router(model.clone());
        let response = router
            .oneshot(multipart_request("file", b""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("empty"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_with_413() {
        let model = FakeModel::replying(WELL_FORMED_REPLY);
        let router = test_router(model.clone());
        // Over the 64KiB test ceiling but within the multipart framing slack,
        // so the handler's own byte check produces the response.
        let oversized = vec![0u8; 70 * 1024];
        let response = router
            .oneshot(multipart_request("file", &oversized))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json = body_json(response).await;
        assert!(!json["error"].as_str().unwrap().is_empty());
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let router = test_router(FakeModel::replying(WELL_FORMED_REPLY));
        let response = router
            .oneshot(multipart_request("attachment", &tiny_png()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
