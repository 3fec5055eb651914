use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use shared::{
    domain::{Identity, RoleKind, SubjectId},
    error::{ApiError, ErrorCode},
};

/// Headers injected by the auth gateway after bearer-token validation.
/// The engine never sees a raw token, only the resolved claims.
pub const SUBJECT_HEADER: &str = "x-auth-subject";
pub const ROLES_HEADER: &str = "x-auth-roles";
pub const NAME_HEADER: &str = "x-auth-name";
pub const EMAIL_HEADER: &str = "x-auth-email";

/// Extractor wrapping the resolved caller identity.
pub struct Caller(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiError>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(subject) = header_value(parts, SUBJECT_HEADER) else {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(ApiError::new(ErrorCode::Unauthorized, "not authenticated")),
            ));
        };

        let roles = header_value(parts, ROLES_HEADER).unwrap_or_default();
        let Some(role) = RoleKind::resolve(roles.split(',')) else {
            return Err((
                StatusCode::FORBIDDEN,
                Json(ApiError::new(ErrorCode::Forbidden, "no recognized role")),
            ));
        };

        Ok(Caller(Identity {
            subject: SubjectId(subject),
            role,
            full_name: header_value(parts, NAME_HEADER),
            email: header_value(parts, EMAIL_HEADER),
        }))
    }
}

fn header_value(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
