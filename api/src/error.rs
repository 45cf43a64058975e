use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    NotFound(String),
    Unhandled(eyre::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    msg: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status_code, error_response) = match self {
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    code: "BAD_REQUEST".into(),
                    msg: Some(msg),
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    code: "NOT_FOUND".into(),
                    msg: Some(msg),
                },
            ),
            AppError::Unhandled(e) => {
                tracing::error!(?e, "Unhandled error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    #[cfg(debug_assertions)]
                    ErrorResponse {
                        code: "SVR_ERR".into(),
                        msg: Some(format!("{e:#}")),
                    },
                    #[cfg(not(debug_assertions))]
                    ErrorResponse {
                        code: "SVR_ERR".into(),
                        msg: Some("Internal server error".into()),
                    },
                )
            }
        };

        (status_code, Json(error_response)).into_response()
    }
}

impl From<eyre::Error> for AppError {
    fn from(e: eyre::Error) -> Self {
        AppError::Unhandled(e)
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(e: diesel::result::Error) -> Self {
        AppError::Unhandled(e.into())
    }
}

impl From<(String, StatusCode)> for AppError {
    fn from((msg, _status): (String, StatusCode)) -> Self {
        AppError::BadRequest(msg)
    }
}
