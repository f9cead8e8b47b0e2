use axum::{
    extract::{FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};

use crate::error::ArenaError;
use crate::handlers::ApiError;

/// `Json` whose rejections use the API's `{message, status}` error body.
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                tracing::warn!(error = %rejection, "Rejected JSON body");
                let err = ArenaError::validation(format!(
                    "Failed to parse JSON request body: {}",
                    rejection.body_text()
                ));
                Err(ApiError(err).into_response())
            }
        }
    }
}
