use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, models::actor::Actor, state::AppState, utils::jwt};

/// Verifies the bearer token and attaches the [`Actor`] to the request.
pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let actor = authenticate(auth_header, &state.config.jwt_secret)?;
    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

fn authenticate(auth_header: Option<&str>, secret: &str) -> Result<Actor, AppError> {
    let token = auth_header
        .and_then(parse_bearer_token)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
    let claims = jwt::verify_access_token(token, secret).map_err(|err| {
        tracing::debug!(error = %err, "Rejected actor token");
        AppError::Unauthorized("Invalid or expired token".to_string())
    })?;
    if claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized("Token has no subject".to_string()));
    }
    Ok(claims.actor())
}

fn parse_bearer_token(header: &str) -> Option<&str> {
    if let Some(rest) = header.strip_prefix("Bearer ") {
        return Some(rest);
    }
    if let Some(rest) = header.strip_prefix("bearer ") {
        return Some(rest);
    }
    if let Some(space_idx) = header.find(' ') {
        let (scheme, rest) = header.split_at(space_idx);
        if scheme.eq_ignore_ascii_case("bearer") {
            return Some(rest.trim_start());
        }
    }
    None
}
