use super::AppState;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
};
use rules_hub_core::auth::TokenVerifier;

/// Identity the access gate evaluates for one request. `None` means an
/// anonymous caller, for which access control is not applied.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    pub user_id: Option<String>,
}

/// Resolve the caller from request headers.
///
/// A bearer token wins over `X-User-Id`. A bearer token that cannot be
/// verified, or one sent while no verifier is configured, is rejected rather
/// than silently downgraded to anonymous.
pub async fn extract_auth_context(
    headers: &HeaderMap,
    verifier: Option<&dyn TokenVerifier>,
) -> Result<AuthContext, StatusCode> {
    if let Some(auth) = headers.get("Authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            let claims = match verifier {
                Some(verifier) => verifier.verify(token).await,
                None => None,
            };
            return match claims {
                Some(claims) => Ok(AuthContext {
                    user_id: Some(claims.sub),
                }),
                None => {
                    tracing::debug!("rejected bearer token");
                    Err(StatusCode::UNAUTHORIZED)
                }
            };
        }
    }

    let user_id = headers
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    Ok(AuthContext { user_id })
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        extract_auth_context(&parts.headers, state.verifier.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rules_hub_core::auth::Hs256Verifier;

    #[tokio::test]
    async fn header_fallbacks() {
        let mut headers = HeaderMap::new();
        assert!(extract_auth_context(&headers, None).await.unwrap().user_id.is_none());

        headers.insert("X-User-Id", HeaderValue::from_static("alice"));
        let ctx = extract_auth_context(&headers, None).await.unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("alice"));

        headers.insert("Authorization", HeaderValue::from_static("Bearer junk"));
        assert_eq!(
            extract_auth_context(&headers, None).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
        let verifier = Hs256Verifier::new("secret".to_string());
        assert_eq!(
            extract_auth_context(&headers, Some(&verifier)).await.unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
    }
}
