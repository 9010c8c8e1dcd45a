//! Management surface (spec §6): account listing/creation/deletion for
//! the dynamic identity backend, and the catch-all page returned for
//! anything that isn't a WebSocket upgrade. Out of the tunnel's
//! compatibility surface; this module is thin glue around
//! [`crate::identity::IdentityStore`].

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use vlwg_common::Identifier;

use super::AppState;

#[derive(Serialize)]
pub(crate) struct AccountsResponse {
    dynamic_backend: bool,
}

#[derive(Deserialize)]
pub struct CreateAccountRequest {
    pub uuid: String,
}

#[derive(Deserialize)]
pub struct DeleteAccountRequest {
    pub uuid: String,
}

#[derive(Serialize)]
struct ActionResponse {
    ok: bool,
    error: Option<String>,
}

/// `GET /api/accounts` — whether a dynamic backend is configured at all.
/// The backend itself (Redis) is the source of truth for which
/// identifiers it holds; this surface does not mirror its contents.
pub async fn list_accounts(State(state): State<AppState>) -> Json<AccountsResponse> {
    Json(AccountsResponse {
        dynamic_backend: state.identity.has_dynamic_backend(),
    })
}

/// `POST /api/create` — insert an identity into the dynamic backend.
pub async fn create_account(
    State(state): State<AppState>,
    Json(body): Json<CreateAccountRequest>,
) -> Response {
    let identifier = match Identifier::from_canonical(&body.uuid) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ActionResponse {
                    ok: false,
                    error: Some("uuid is not a valid identifier".to_string()),
                }),
            )
                .into_response();
        }
    };

    match state.identity.insert_dynamic(&identifier).await {
        Ok(()) => Json(ActionResponse { ok: true, error: None }).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ActionResponse {
                ok: false,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

/// `POST /api/delete` — remove an identity from the dynamic backend.
pub async fn delete_account(
    State(state): State<AppState>,
    Json(body): Json<DeleteAccountRequest>,
) -> Response {
    let identifier = match Identifier::from_canonical(&body.uuid) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ActionResponse {
                    ok: false,
                    error: Some("uuid is not a valid identifier".to_string()),
                }),
            )
                .into_response();
        }
    };

    match state.identity.remove_dynamic(&identifier).await {
        Ok(()) => Json(ActionResponse { ok: true, error: None }).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ActionResponse {
                ok: false,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

/// Catch-all for any request that isn't a WebSocket upgrade or a
/// management API call — the opaque UI page (spec §6).
pub async fn catch_all() -> Html<&'static str> {
    Html(
        r#"<!doctype html>
<html>
<head><title>vlwg</title></head>
<body>
<h1>VLESS-over-WebSocket gateway</h1>
<p>This host terminates WebSocket tunnels; there is no browsable UI here.</p>
</body>
</html>"#,
    )
}
