use axum::http::request::Parts;

use crate::error::AppError;

/// Header the authenticating front-end forwards after its OAuth gate. The
/// engine itself never sees credentials, only the stable user identity.
pub const USER_HEADER: &str = "x-user-email";

#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    #[error("Missing `{USER_HEADER}` header, the gateway must forward the signed-in user's email.")]
    NoHeader,

    #[error("Header `{USER_HEADER}` is empty or not valid UTF-8.")]
    Invalid,
}

/// The per-request user identity every engine operation is scoped to.
pub struct UserId(pub String);

impl<S> axum::extract::FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(USER_HEADER) else {
            return Err(AppError::BadRequest(IdentityError::NoHeader.to_string()));
        };

        let user_id = raw
            .to_str()
            .map_err(|_| AppError::BadRequest(IdentityError::Invalid.to_string()))?
            .trim();

        if user_id.is_empty() {
            return Err(AppError::BadRequest(IdentityError::Invalid.to_string()));
        }

        Ok(UserId(user_id.to_string()))
    }
}

#[cfg(test)]
mod test {
    use axum::extract::FromRequestParts;
    use axum::http::Request;

    use super::*;

    async fn extract(req: Request<()>) -> Result<UserId, AppError> {
        let (mut parts, _) = req.into_parts();
        UserId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn extracts_trimmed_email() {
        let req = Request::builder()
            .header(USER_HEADER, " reader@example.com ")
            .body(())
            .unwrap();
        let Ok(UserId(user)) = extract(req).await else {
            panic!("header should be accepted");
        };
        assert_eq!(user, "reader@example.com");
    }

    #[tokio::test]
    async fn rejects_missing_header() {
        let req = Request::builder().body(()).unwrap();
        assert!(extract(req).await.is_err());
    }

    #[tokio::test]
    async fn rejects_empty_header() {
        let req = Request::builder().header(USER_HEADER, "  ").body(()).unwrap();
        assert!(extract(req).await.is_err());
    }
}
