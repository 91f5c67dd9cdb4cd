//! HTTP and WebSocket entry points.
//!
//! - `POST /game/create` - HTTP Basic credentials; creates an account and
//!   sets the auth cookie.
//! - `POST /game/login` - same for existing accounts.
//! - `POST /game/logout` - clears the cookie.
//! - `GET /game/auth` - validates the cookie.
//! - `GET /game/session` - upgrades to a WebSocket bound to the account's
//!   resident avatar.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use thornvale_domain::avatar::AvatarRecord;
use thornvale_domain::ids::AccountId;
use thornvale_shared::UsernameResponse;

use crate::session::auth::{AuthKeys, COOKIE_NAME};
use crate::store::{Store, StoreError};
use crate::world::tick::WorldMessage;

/// Longest accepted inbound WebSocket text frame.
const FRAME_CAP: usize = 1024;

/// State shared by the API handlers.
pub struct ApiState {
    pub store: Arc<dyn Store>,
    pub world_tx: mpsc::UnboundedSender<WorldMessage>,
    pub auth: AuthKeys,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/game/create", post(create))
        .route("/game/login", post(login))
        .route("/game/logout", post(logout))
        .route("/game/auth", get(auth_check))
        .route("/game/session", get(session))
        .with_state(state)
}

/// Parse `Authorization: Basic base64(user:pass)`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(BASE64.decode(encoded).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn cookie_value(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name == COOKIE_NAME).then(|| value.to_string())
    })
}

fn set_cookie(keys: &AuthKeys, account: AccountId, username: &str) -> [(header::HeaderName, String); 1] {
    let value = keys.sign(account, username);
    [(
        header::SET_COOKIE,
        format!("{COOKIE_NAME}={value}; Path=/; HttpOnly; SameSite=Strict"),
    )]
}

fn authed(state: &ApiState, headers: &HeaderMap) -> Option<(AccountId, String)> {
    state.auth.verify(&cookie_value(headers)?)
}

async fn create(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let Some((username, password)) = basic_credentials(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let initial = AvatarRecord {
        level: 1,
        tutorials_on: true,
        ..AvatarRecord::default()
    };
    match state.store.create_account(&username, &password, &initial).await {
        Ok(Some(account)) => (
            set_cookie(&state.auth, account, &username),
            Json(UsernameResponse { username }),
        )
            .into_response(),
        Ok(None) => (StatusCode::CONFLICT, "username is taken").into_response(),
        Err(e @ (StoreError::InvalidUsername | StoreError::InvalidPassword)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "account creation failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn login(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    let Some((username, password)) = basic_credentials(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    match state.store.authenticate(&username, &password).await {
        Ok(Some(account)) => (
            set_cookie(&state.auth, account, &username),
            Json(UsernameResponse { username }),
        )
            .into_response(),
        Ok(None) => StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "login failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn logout() -> Response {
    (
        [(
            header::SET_COOKIE,
            format!("{COOKIE_NAME}=; Path=/; HttpOnly; Max-Age=0"),
        )],
        StatusCode::OK,
    )
        .into_response()
}

async fn auth_check(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    match authed(&state, &headers) {
        Some((_, username)) => Json(UsernameResponse { username }).into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn session(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some((account, username)) = authed(&state, &headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    // Load the stored avatar before binding; the world task never touches
    // the store on the login path.
    let record = match state.store.load_avatar(account).await {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(%account, error = %e, "avatar load failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, account, username, record))
}

/// Bridge one WebSocket to the world task: a forwarding task drains the
/// session's outbound channel; inbound text frames become commands.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<ApiState>,
    account: AccountId,
    username: String,
    record: Option<AvatarRecord>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    if state
        .world_tx
        .send(WorldMessage::SessionOpen {
            account,
            username: username.clone(),
            record,
            tx,
        })
        .is_err()
    {
        tracing::error!("world task is gone; dropping connection");
        return;
    }
    tracing::info!(%account, username, "websocket session established");

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if text.len() > FRAME_CAP {
                    tracing::debug!(%account, len = text.len(), "dropping oversized frame");
                    continue;
                }
                let _ = state.world_tx.send(WorldMessage::Command {
                    account,
                    text: text.to_string(),
                });
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // binary, ping, pong: ignored
            Err(e) => {
                tracing::warn!(%account, error = %e, "websocket error");
                break;
            }
        }
    }

    let _ = state.world_tx.send(WorldMessage::SessionClose { account });
    send_task.abort();
    tracing::info!(%account, "websocket session ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_credentials_parse() {
        let mut headers = HeaderMap::new();
        let encoded = BASE64.encode("kara:hunter2 hunter2");
        headers.insert(
            header::AUTHORIZATION,
            format!("Basic {encoded}").parse().unwrap(),
        );
        assert_eq!(
            basic_credentials(&headers),
            Some(("kara".to_string(), "hunter2 hunter2".to_string()))
        );
        headers.insert(header::AUTHORIZATION, "Bearer xyz".parse().unwrap());
        assert_eq!(basic_credentials(&headers), None);
    }

    #[test]
    fn cookie_extraction_finds_ours() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            format!("other=1; {COOKIE_NAME}=abc123; theme=dark")
                .parse()
                .unwrap(),
        );
        assert_eq!(cookie_value(&headers), Some("abc123".to_string()));
        headers.insert(header::COOKIE, "other=1".parse().unwrap());
        assert_eq!(cookie_value(&headers), None);
    }
}
