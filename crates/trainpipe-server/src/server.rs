//! HTTP server implementation using Axum.

use crate::handlers::{base_models, handle_health, models, training};
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use trainpipe_core::config::UploadConfig;
use trainpipe_core::TrainpipeApi;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub api: Arc<TrainpipeApi>,
}

/// Build the router over `api`.
pub fn create_router(api: Arc<TrainpipeApi>) -> Router {
    let artifacts = Router::new()
        .nest_service("/data/model", ServeDir::new(&api.paths().artifact_root))
        .layer(middleware::from_fn(hide_dotfiles));
    let state = AppState { api };

    // Configure CORS for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/projects/:id/nn-models",
            get(models::list_project_models).post(models::create_project_model),
        )
        .route("/api/projects/:id/nn-models/train", post(training::train))
        .route(
            "/api/nn-models/base-models",
            get(base_models::list_installed),
        )
        .route(
            "/api/nn-models/:id",
            get(models::get_model)
                .patch(models::update_model)
                .delete(models::delete_model),
        )
        .route(
            "/api/nn-models/:id/upload",
            post(models::upload_model).layer(DefaultBodyLimit::max(UploadConfig::MAX_BYTES)),
        )
        .merge(artifacts)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Artifacts being published are hidden `.<name>.part` files; never serve them.
async fn hide_dotfiles(request: Request, next: Next) -> Response {
    let hidden = request.uri().path().split('/').any(|segment| {
        segment.starts_with('.') || segment.to_ascii_lowercase().starts_with("%2e")
    });
    if hidden {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// Start the HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    api: Arc<TrainpipeApi>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = create_router(api);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use trainpipe_core::export::onnx::{
        data_type, encode_model, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
        ValueInfoProto,
    };
    use trainpipe_core::training::{EpochCallback, TrainingRun};
    use trainpipe_core::{
        BlobCompiler, CancellationToken, CheckpointExporter, Device, EpochReport, Resolution,
        Result, TrainingBackend, UploadConverter, UploadSources,
    };

    struct StubTrainer;

    #[async_trait]
    impl TrainingBackend for StubTrainer {
        async fn train(
            &self,
            run: &TrainingRun,
            on_epoch: EpochCallback<'_>,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf> {
            for epoch in 1..=run.epochs {
                on_epoch(EpochReport {
                    epoch,
                    metrics: Default::default(),
                });
            }
            let best = run.project_dir.join("weights").join("best.pt");
            std::fs::create_dir_all(best.parent().unwrap())?;
            std::fs::write(&best, "w")?;
            Ok(best)
        }
    }

    struct StubOnnx;

    #[async_trait]
    impl CheckpointExporter for StubOnnx {
        async fn export_onnx(
            &self,
            _checkpoint: &Path,
            _resolution: Resolution,
            out_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf> {
            let model = ModelProto {
                opset_import: vec![OperatorSetIdProto {
                    domain: Some(String::new()),
                    version: Some(13),
                }],
                graph: Some(GraphProto {
                    node: vec![NodeProto {
                        input: vec!["images".into()],
                        output: vec!["out".into()],
                        op_type: Some("Identity".into()),
                        ..Default::default()
                    }],
                    input: vec![ValueInfoProto::tensor(
                        "images",
                        data_type::FLOAT,
                        &[1, 3, 640, 640],
                    )],
                    ..Default::default()
                }),
                ..Default::default()
            };
            let path = out_dir.join("m.onnx");
            std::fs::write(&path, encode_model(&model))?;
            Ok(path)
        }
    }

    struct StubCompiler;

    #[async_trait]
    impl BlobCompiler for StubCompiler {
        async fn compile(
            &self,
            onnx: &Path,
            out_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf> {
            let blob = out_dir.join("m.blob");
            std::fs::copy(onnx, &blob)?;
            Ok(blob)
        }
    }

    /// Writes the uploaded weights as the blob.
    struct StubUploads;

    #[async_trait]
    impl UploadConverter for StubUploads {
        async fn convert(
            &self,
            sources: &UploadSources<'_>,
            out_dir: &Path,
            _cancel: &CancellationToken,
        ) -> Result<PathBuf> {
            let blob = out_dir.join("head.blob");
            std::fs::copy(sources.weights, &blob)?;
            Ok(blob)
        }
    }

    async fn app() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let project = root.join("projects").join("1");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(
            project.join("label_config.json"),
            json!({
                "box": {
                    "type": "RectangleLabels",
                    "inputs": [{"type": "Image", "value": "image"}],
                    "labels": ["a"]
                }
            })
                .to_string(),
        )
        .unwrap();
        let uploads = root.join("media").join("upload").join("1");
        std::fs::create_dir_all(&uploads).unwrap();
        let mut tasks = Vec::new();
        for i in 0..4 {
            std::fs::write(uploads.join(format!("p{i}.jpg")), b"jpg").unwrap();
            tasks.push(json!({
                "id": i,
                "data": {"image": format!("/data/upload/1/p{i}.jpg")},
                "annotations": [{"result": [{
                    "type": "rectanglelabels",
                    "value": {"x": 1, "y": 1, "width": 5, "height": 5, "rectanglelabels": ["a"]}
                }]}]
            }));
        }
        std::fs::write(project.join("tasks.json"), Value::Array(tasks).to_string()).unwrap();

        let base = root.join("models").join("yolov8n");
        std::fs::create_dir_all(&base).unwrap();
        std::fs::write(base.join("model.pt"), b"base").unwrap();
        std::fs::write(
            base.join("config.json"),
            json!({"task": "detection", "downloads": [{"filename": "model.pt", "local": true}]})
                .to_string(),
        )
        .unwrap();

        let classifier = root.join("models").join("mobilenet");
        std::fs::create_dir_all(&classifier).unwrap();
        std::fs::write(
            classifier.join("config.json"),
            json!({
                "task": "classification",
                "input_shape": [null, 224, 224, 3],
                "downloads": [{"filename": "tf", "static": true, "local": true}]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::create_dir_all(root.join("static").join("models").join("mobilenet").join("tf"))
            .unwrap();

        let api = TrainpipeApi::builder(root)
            .auto_create_dirs(true)
            .with_device(Device::Cpu)
            .with_training_backend(Arc::new(StubTrainer))
            .with_checkpoint_exporter(Arc::new(StubOnnx))
            .with_blob_compiler(Arc::new(StubCompiler))
            .with_upload_converter(Arc::new(StubUploads))
            .build()
            .await
            .unwrap();
        (dir, create_router(Arc::new(api)))
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn train_request(body: Value) -> Request<Body> {
        Request::post("/api/projects/1/nn-models/train")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    const BOUNDARY: &str = "trainpipe-boundary";

    fn upload_request(id: i64, parts: &[(&str, &str)]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, content) in parts {
            body.extend(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; \
                     filename=\"{name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .into_bytes(),
            );
            body.extend_from_slice(content.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend(format!("--{BOUNDARY}--\r\n").into_bytes());

        Request::post(format!("/api/nn-models/{id}/upload"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    /// JSON payloads of every `data:` line of an SSE body.
    fn sse_events(body: &str) -> Vec<Value> {
        body.lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, app) = app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn test_train_streams_events_then_serves_artifact() {
        let (_dir, app) = app().await;

        let response = app
            .clone()
            .oneshot(train_request(json!({"name": "parts", "epochs": 2})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let events = sse_events(&body_text(response).await);
        assert_eq!(events[0], json!({"log": "preparing dataset", "status_type": "loading"}));
        let epochs: Vec<_> = events
            .iter()
            .filter_map(|e| e["data"]["epoch"].as_u64())
            .collect();
        assert_eq!(epochs, vec![1, 2]);
        let result = &events.last().unwrap()["result"];
        assert_eq!(result["model_path"], "parts.blob");
        let id = result["id"].as_i64().unwrap();

        let listed = app
            .clone()
            .oneshot(Request::get("/api/projects/1/nn-models").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed: Value = serde_json::from_str(&body_text(listed).await).unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let ranged = app
            .clone()
            .oneshot(
                Request::get("/data/model/parts.blob")
                    .header(header::RANGE, "bytes=0-3")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ranged.status(), StatusCode::PARTIAL_CONTENT);
        let bytes = to_bytes(ranged.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.len(), 4);

        let deleted = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/nn-models/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let gone = app
            .oneshot(Request::get("/data/model/parts.blob").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_hidden_artifacts_are_not_served() {
        let (dir, app) = app().await;
        let artifacts = dir.path().join("artifacts");
        std::fs::create_dir_all(&artifacts).unwrap();
        std::fs::write(artifacts.join(".parts.blob.part"), b"half").unwrap();
        std::fs::write(artifacts.join("parts.blob"), b"whole").unwrap();

        for uri in ["/data/model/.parts.blob.part", "/data/model/%2Eparts.blob.part"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }

        let response = app
            .oneshot(Request::get("/data/model/parts.blob").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "whole");
    }

    #[tokio::test]
    async fn test_train_rejects_bad_resolution() {
        let (_dir, app) = app().await;
        let response = app
            .oneshot(train_request(json!({"name": "x", "resolution": "300x300"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_train_unknown_project_is_404() {
        let (_dir, app) = app().await;
        let response = app
            .oneshot(
                Request::post("/api/projects/77/nn-models/train")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"name": "x"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_base_model_catalog() {
        let (_dir, app) = app().await;
        let response = app
            .clone()
            .oneshot(
                Request::get("/api/nn-models/base-models?task=detection")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"["yolov8n"]"#);

        let response = app
            .oneshot(
                Request::get("/api/nn-models/base-models?task=classification")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_text(response).await, r#"["mobilenet"]"#);
    }

    #[tokio::test]
    async fn test_model_crud_errors() {
        let (_dir, app) = app().await;
        let missing = app
            .clone()
            .oneshot(Request::get("/api/nn-models/5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let patch = app
            .oneshot(
                Request::patch("/api/nn-models/5")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"name": "../bad"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(patch.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_then_upload_head() {
        let (_dir, app) = app().await;

        let created = app
            .clone()
            .oneshot(
                Request::post("/api/projects/1/nn-models")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({"name": "head", "model_type": "Generic", "base_model": "mobilenet"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);
        let created: Value = serde_json::from_str(&body_text(created).await).unwrap();
        assert_eq!(created["project"], 1);
        assert_eq!(created["model_path"], "");
        let id = created["id"].as_i64().unwrap();

        let partial = app
            .clone()
            .oneshot(upload_request(id, &[("model.json", "{}")]))
            .await
            .unwrap();
        assert_eq!(partial.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(partial)
            .await
            .contains("model.json or model.weights.bin not uploaded"));

        let empty = app.clone().oneshot(upload_request(id, &[])).await.unwrap();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(empty).await.contains("No files uploaded"));

        let uploaded = app
            .clone()
            .oneshot(upload_request(
                id,
                &[("model.json", "{}"), ("model.weights.bin", "weights")],
            ))
            .await
            .unwrap();
        assert_eq!(uploaded.status(), StatusCode::OK);
        let uploaded: Value = serde_json::from_str(&body_text(uploaded).await).unwrap();
        assert_eq!(uploaded["model_path"], "head.blob");

        let artifact = app
            .oneshot(Request::get("/data/model/head.blob").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(artifact.status(), StatusCode::OK);
        assert_eq!(body_text(artifact).await, "weights");
    }

    #[tokio::test]
    async fn test_create_model_errors() {
        let (_dir, app) = app().await;
        let create = |project: i64, body: &str| {
            Request::post(format!("/api/projects/{project}/nn-models"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap()
        };

        let unknown_project = app
            .clone()
            .oneshot(create(
                9,
                r#"{"name": "a", "model_type": "YOLO", "base_model": "yolov8n"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(unknown_project.status(), StatusCode::NOT_FOUND);

        let no_type = app
            .clone()
            .oneshot(create(1, r#"{"name": "a", "base_model": "yolov8n"}"#))
            .await
            .unwrap();
        assert_eq!(no_type.status(), StatusCode::BAD_REQUEST);

        let upload_unknown = app
            .oneshot(upload_request(
                404,
                &[("model.json", "{}"), ("model.weights.bin", "w")],
            ))
            .await
            .unwrap();
        assert_eq!(upload_unknown.status(), StatusCode::NOT_FOUND);
    }
}
