use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use melanoma_serve::ServiceError;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),

    /// The multipart body could not be read.
    Multipart { status: StatusCode, message: String },

    /// No `file` field in the form.
    MissingFile,
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::Service(err)
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Multipart {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl ApiError {
    fn status_and_detail(&self) -> (StatusCode, String) {
        match self {
            ApiError::Service(err) => match err {
                ServiceError::UnsupportedMediaType(_) | ServiceError::BadImage(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                ServiceError::PayloadTooLarge { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, err.to_string())
                }
                ServiceError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "Prediction not found".to_string())
                }
                ServiceError::Processing(_) | ServiceError::Inference(_) => {
                    error!("Prediction failed: {}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "An error occurred while processing the request".to_string(),
                    )
                }
                ServiceError::Store(e) => {
                    error!("Store error: {}", e);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Error while retrieving data".to_string(),
                    )
                }
            },
            ApiError::Multipart { status, message } => {
                if *status == StatusCode::PAYLOAD_TOO_LARGE {
                    (*status, "File size exceeds the 16MB limit".to_string())
                } else {
                    (*status, message.clone())
                }
            }
            ApiError::MissingFile => (
                StatusCode::BAD_REQUEST,
                "Missing multipart field 'file'".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = self.status_and_detail();
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use melanoma_serve::StoreError;

    fn status_of(err: ServiceError) -> StatusCode {
        ApiError::from(err).status_and_detail().0
    }

    #[test]
    fn service_errors_map_to_status_codes() {
        assert_eq!(
            status_of(ServiceError::UnsupportedMediaType("text/plain".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ServiceError::BadImage("truncated".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ServiceError::PayloadTooLarge { size: 2, limit: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_of(ServiceError::Processing("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ServiceError::Inference("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(ServiceError::NotFound("id".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ServiceError::Store(StoreError::Unavailable("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let (_, detail) =
            ApiError::from(ServiceError::Store(StoreError::Unavailable("10.0.0.5:27017".into())))
                .status_and_detail();
        assert!(!detail.contains("10.0.0.5"));
    }
}
