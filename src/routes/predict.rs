use crate::{
    classifier::{ClassifierError, PredictionEntry},
    server::SharedState,
};
use axum::{
    extract::{
        multipart::MultipartError,
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Missing or empty `file` field in multipart body")]
    MissingFile,
    #[error("Malformed multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

// Internal detail (paths, stderr, io errors) stays in the logs; clients only
// ever see a generic message.
impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            PredictError::MissingFile => (StatusCode::BAD_REQUEST, "no file uploaded"),
            PredictError::Multipart(_) => (StatusCode::BAD_REQUEST, "malformed upload"),
            PredictError::Classifier(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "prediction failed")
            }
        };
        tracing::error!(error = %self, "predict request failed");

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Serialize)]
struct PredictResponse {
    prediction: Vec<PredictionEntry>,
}

struct Upload {
    bytes: Bytes,
    mime_type: Option<String>,
}

#[instrument(skip(state, multipart))]
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Response, PredictError> {
    state.metrics.record_request("/predict");

    let upload = extract_upload(multipart).await?;

    let started = Instant::now();
    match state
        .classifier
        .classify(upload.bytes, upload.mime_type.as_deref())
        .await
    {
        Ok(prediction) => {
            state
                .metrics
                .record_classification_duration(started.elapsed().as_millis() as u64);
            Ok(Json(PredictResponse { prediction }).into_response())
        }
        Err(err) => {
            state.metrics.record_classification_failure(err.kind());
            Err(err.into())
        }
    }
}

async fn extract_upload(mut multipart: Multipart) -> Result<Upload, PredictError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let mime_type = field.content_type().map(str::to_owned);
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            break;
        }
        return Ok(Upload { bytes, mime_type });
    }
    Err(PredictError::MissingFile)
}

#[cfg(test)]
mod tests {
    use crate::classifier::ClassifierService;
    use crate::config::ClassifierConfig;
    use crate::routes::api_routes;
    use crate::server::SharedState;
    use crate::telemetry::Metrics;
    use axum::{
        body::Body,
        http::{header::CONTENT_TYPE, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use tower::ServiceExt;

    async fn stub_router(script: &str, scratch_dir: &Path) -> Router {
        let config = ClassifierConfig {
            command: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
            scratch_dir: scratch_dir.to_path_buf(),
            timeout_ms: 5_000,
        };
        let classifier = Arc::new(ClassifierService::new(&config).await.unwrap());
        let metrics = Arc::new(Metrics::new(5_000));
        api_routes().with_state(SharedState {
            classifier,
            metrics,
        })
    }

    fn multipart_request(field_name: &str, payload: &str) -> Request<Body> {
        let boundary = "test-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"{field_name}\"; filename=\"dog.jpg\"\r\n\
             Content-Type: image/jpeg\r\n\r\n\
             {payload}\r\n\
             --{boundary}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/predict")
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn scratch_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn predict_returns_sorted_prediction_list() {
        let dir = tempdir().unwrap();
        let script = r#"echo '[{"breed":"n02085620-papillon","confidence":0.05},{"breed":"n02085782-Chihuahua","confidence":0.91}]'"#;
        let router = stub_router(script, dir.path()).await;

        let response = router
            .oneshot(multipart_request("file", "fake image bytes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let prediction = body["prediction"].as_array().unwrap();
        assert_eq!(prediction.len(), 2);
        assert_eq!(prediction[0]["breed"], "n02085782-Chihuahua");
        assert_eq!(prediction[0]["label"], "Chihuahua");
        assert_eq!(prediction[0]["confidence"], 0.91);
        assert!(scratch_is_empty(&dir));
    }

    #[tokio::test]
    async fn missing_file_field_is_a_bad_request() {
        let dir = tempdir().unwrap();
        let script = r#"echo '[{"breed":"pug","confidence":0.9}]'"#;
        let router = stub_router(script, dir.path()).await;

        let response = router
            .oneshot(multipart_request("avatar", "fake image bytes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "no file uploaded");
        assert!(scratch_is_empty(&dir));
    }

    #[tokio::test]
    async fn classifier_failure_is_a_generic_server_error() {
        let dir = tempdir().unwrap();
        let router = stub_router("echo 'model exploded' >&2; exit 1", dir.path()).await;

        let response = router
            .oneshot(multipart_request("file", "fake image bytes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"], "prediction failed");
        assert!(body.get("prediction").is_none());
        assert!(scratch_is_empty(&dir));
    }

    #[tokio::test]
    async fn healthcheck_is_available() {
        let dir = tempdir().unwrap();
        let router = stub_router("true", dir.path()).await;

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/healthcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "Available");
    }
}
