//! HTTP surface: multipart register/recognize endpoints plus a health
//! probe. Responses are JSON throughout; expected domain failures map to
//! 400 with a `detail` message, everything else to 500.

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::engine::{EngineError, EngineHandle, Outcome, Recognition};

/// Upload cap for multipart bodies; camera stills fit comfortably.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/recognize", post(recognize))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut image = None;
    let mut name = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => match field.name().map(str::to_owned).as_deref() {
                Some("image") => match field.bytes().await {
                    Ok(bytes) => image = Some(bytes.to_vec()),
                    Err(err) => return bad_multipart(err),
                },
                Some("name") => match field.text().await {
                    Ok(text) => name = Some(text),
                    Err(err) => return bad_multipart(err),
                },
                _ => {}
            },
            Ok(None) => break,
            Err(err) => return bad_multipart(err),
        }
    }

    let Some(image) = image else {
        return missing_field("image");
    };
    let Some(name) = name else {
        return missing_field("name");
    };

    match state.engine.register(name, image).await {
        Ok(name) => (
            StatusCode::OK,
            Json(json!({ "message": format!("{name} registered") })),
        ),
        Err(err) => error_response(err),
    }
}

async fn recognize(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> (StatusCode, Json<Value>) {
    let mut image = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("image") {
                    match field.bytes().await {
                        Ok(bytes) => image = Some(bytes.to_vec()),
                        Err(err) => return bad_multipart(err),
                    }
                }
            }
            Ok(None) => break,
            Err(err) => return bad_multipart(err),
        }
    }

    let Some(image) = image else {
        return missing_field("image");
    };

    match state.engine.recognize(image).await {
        Ok(recognition) => (StatusCode::OK, Json(recognition_body(recognition))),
        Err(err) => error_response(err),
    }
}

/// Flatten a recognition result into the response object: detection
/// fields always present, outcome fields per classification.
fn recognition_body(recognition: Recognition) -> Value {
    let mut body = json!({ "face_detected": recognition.detection.face_detected });
    if let Some(location) = recognition.detection.face_location {
        body["face_location"] = json!(location);
    }

    match recognition.outcome {
        Outcome::NoFace => {
            body["recognized"] = json!(false);
            body["message"] = json!("no face found");
        }
        Outcome::NotRecognized { confidence } => {
            body["recognized"] = json!(false);
            body["confidence"] = json!(confidence);
            body["message"] = json!("face not registered");
        }
        Outcome::Recognized {
            name,
            confidence,
            num_landmarks,
        } => {
            body["recognized"] = json!(true);
            body["confidence"] = json!(confidence);
            body["num_landmarks"] = json!(num_landmarks);
            body["message"] = json!(format!("recognized as {name}"));
            body["name"] = json!(name);
        }
    }

    body
}

fn error_response(err: EngineError) -> (StatusCode, Json<Value>) {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        tracing::error!(error = %err, "request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "detail": err.to_string() })))
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "detail": format!("invalid multipart request: {err}") })),
    )
}

fn missing_field(field: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "detail": format!("missing multipart field \"{field}\"") })),
    )
}
