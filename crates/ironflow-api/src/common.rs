// Shared app state and error mapping for HTTP handlers

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ironflow_contracts::ErrorResponse;
use ironflow_core::Error;
use ironflow_storage::Database;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Engine error carried out of a handler.
///
/// Maps the error taxonomy onto canonical status codes. Database and
/// internal failures are logged with their cause but surface as a generic
/// message so internals never leak to clients.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::Parse { .. } | Error::Render { .. } | Error::InvalidArgument(_) => {
                (StatusCode::BAD_REQUEST, self.0.to_string())
            }
            Error::NotFound(_) => (StatusCode::NOT_FOUND, self.0.to_string()),
            Error::AlreadyExists(_)
            | Error::OutOfOrder { .. }
            | Error::AlreadyTerminal(_)
            | Error::VersionConflict { .. } => (StatusCode::CONFLICT, self.0.to_string()),
            Error::Database(_) | Error::Internal(_) => {
                tracing::error!(error = %self.0, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status_of(err: Error) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn taxonomy_maps_to_canonical_status_codes() {
        assert_eq!(status_of(Error::parse("name", "empty")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(Error::render(Uuid::nil(), "missing key")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(Error::not_found("workflow x")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(Error::already_exists("template y")), StatusCode::CONFLICT);
        assert_eq!(
            status_of(Error::VersionConflict { expected: 0, actual: 1 }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(Error::database("connection reset")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
