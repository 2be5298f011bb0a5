use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::server::AppContext;
use crate::session::SessionController;

use std::collections::HashMap;
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;

use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::net::TcpListener;

use tokio_tungstenite::{ accept_hdr_async, WebSocketStream };
use tokio_tungstenite::tungstenite::handshake::server::{ ErrorResponse, Request, Response };
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;

use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use lazy_static::lazy_static;

use chrono::Utc;
use hmac::{ Hmac, Mac };
use sha2::Sha256;
use url::form_urlencoded;

use futures::{ Sink, SinkExt, StreamExt };
use log::{ debug, error, info, warn };

type HmacSha256 = Hmac<Sha256>;

const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
const SIGNATURE_WINDOW_SECS: i64 = 300;
const CONNECTIONS_PER_SECOND: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => panic!("connection rate must be non-zero"),
};

lazy_static! {
    static ref CONNECTION_LIMITER: RateLimiter<NotKeyed, InMemoryState, DefaultClock> =
        RateLimiter::direct(Quota::per_second(CONNECTIONS_PER_SECOND));
}

/// Checks the `ts`/`sig` pair a client puts on the upgrade URL: `sig` is the
/// hex HMAC-SHA256 of `ts` under the shared secret, and `ts` must be within
/// five minutes of `now`.
pub fn verify_signature(
    secret: &str,
    params: &HashMap<String, String>,
    now: i64
) -> Result<(), &'static str> {
    let (Some(ts), Some(sig)) = (params.get("ts"), params.get("sig")) else {
        return Err("missing ts/sig");
    };
    let ts_secs: i64 = ts.parse().map_err(|_| "bad timestamp")?;
    if (now - ts_secs).abs() > SIGNATURE_WINDOW_SECS {
        return Err("timestamp out of range");
    }
    let sig_bytes = hex::decode(sig).map_err(|_| "bad signature")?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| "bad secret")?;
    mac.update(ts.as_bytes());
    mac.verify_slice(&sig_bytes).map_err(|_| "bad signature")
}

/// Hex signature for `ts`, as a client would compute it.
pub fn sign_timestamp(secret: &str, ts: i64) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(ts.to_string().as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn unauthorized(reason: &str) -> ErrorResponse {
    let mut res = ErrorResponse::new(Some(reason.to_string()));
    *res.status_mut() = StatusCode::UNAUTHORIZED;
    res
}

pub async fn start_ws_server(
    addr: &str,
    context: Arc<AppContext>,
    api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    info!("WS server listening on: {}", addr);
    if api_key.is_some() {
        info!("Connection signatures required.");
    }
    serve(listener, context, api_key).await
}

/// Accept loop. Every connection becomes one session.
pub async fn serve(
    listener: TcpListener,
    context: Arc<AppContext>,
    api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                continue;
            }
        };

        if CONNECTION_LIMITER.check().is_err() {
            warn!("Global connection rate limit exceeded for {}. Dropping connection.", peer);
            continue;
        }

        debug!("Incoming connection from: {}", peer);
        let context = Arc::clone(&context);
        let required_api_key = api_key.clone();
        tokio::spawn(async move {
            if let Err(e) = process_connection(peer, stream, context, required_api_key).await {
                error!("Failed to process connection for {}: {}", peer, e);
            }
        });
    }
}

async fn process_connection<S>(
    peer: SocketAddr,
    stream: S,
    context: Arc<AppContext>,
    required_api_key: Option<String>
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin
{
    let auth_callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let Some(secret) = required_api_key.as_deref() else {
            return Ok(response);
        };
        let qs = req.uri().query().unwrap_or("");
        let params: HashMap<String, String> = form_urlencoded
            ::parse(qs.as_bytes())
            .into_owned()
            .collect();

        match verify_signature(secret, &params, Utc::now().timestamp()) {
            Ok(()) => Ok(response),
            Err(reason) => {
                warn!("Rejected connection from {}: {}", peer, reason);
                Err(unauthorized(reason))
            }
        }
    };

    let ws = accept_hdr_async(stream, auth_callback).await?;
    handle_connection(peer, ws, context.new_session()).await;
    Ok(())
}

async fn send_json<W>(tx: &mut W, message: &ServerMessage<'_>) -> Result<(), Box<dyn Error + Send + Sync>>
    where W: Sink<Message, Error = WsError> + Unpin
{
    let json = serde_json::to_string(message)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

async fn send_state<W>(tx: &mut W, session: &SessionController) -> Result<(), Box<dyn Error + Send + Sync>>
    where W: Sink<Message, Error = WsError> + Unpin
{
    send_json(tx, &(ServerMessage::State {
        session_id: session.id(),
        state: session.state(),
    })).await
}

fn dispatch(session: &mut SessionController, message: ClientMessage) {
    match message {
        ClientMessage::Navigate { section } => session.navigate(section),
        ClientMessage::ToggleSidebar => session.toggle_sidebar(),
        ClientMessage::SetInput { text } => session.set_input(text),
        ClientMessage::Send { content: Some(text) } => {
            session.send_message(&text);
        }
        ClientMessage::Send { content: None } => {
            session.send_input();
        }
        ClientMessage::LoadHistory => session.load_history(),
        ClientMessage::LoadChat { id } => session.load_chat(id),
        ClientMessage::Save => {
            session.save_current_chat();
        }
        ClientMessage::NewChat => session.start_new_chat(),
        ClientMessage::DismissNotice { id } => {
            session.dismiss_notice(id);
        }
    }
}

/// Runs one session until the peer goes away. UI intents and background
/// results are interleaved on this task; a fresh snapshot follows each one.
pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    mut session: SessionController
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("Session {} opened for {}", session.id(), peer);
    let (mut tx, mut rx) = websocket.split();

    session.load_history();
    if let Err(e) = send_state(&mut tx, &session).await {
        error!("Error sending initial state to {}: {}", peer, e);
        return;
    }

    loop {
        tokio::select! {
            incoming = rx.next() => {
                let Some(incoming) = incoming else {
                    break;
                };
                let message = match incoming {
                    Ok(message) => message,
                    Err(WsError::ConnectionClosed | WsError::Protocol(_) | WsError::Utf8) => {
                        info!("WebSocket connection closed or protocol error for {}", peer);
                        break;
                    }
                    Err(e) => {
                        error!("Error receiving message from {}: {}", peer, e);
                        break;
                    }
                };

                if message.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Message from {} exceeds size limit ({} > {})",
                        peer,
                        message.len(),
                        MAX_MESSAGE_SIZE
                    );
                    let reply = ServerMessage::Error { message: "Message too large".to_string() };
                    if let Err(e) = send_json(&mut tx, &reply).await {
                        error!("Failed to send size limit error to {}: {}", peer, e);
                    }
                    break;
                }

                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_message) => dispatch(&mut session, client_message),
                            Err(e) => {
                                warn!("Failed to parse message from {}: {}", peer, e);
                                let reply = ServerMessage::Error {
                                    message: format!("Failed to parse message: {}", e),
                                };
                                if let Err(e) = send_json(&mut tx, &reply).await {
                                    error!("Error sending parse error to {}: {}", peer, e);
                                    break;
                                }
                                continue;
                            }
                        }
                    }
                    Message::Close(_) => {
                        info!("Received close frame from {}", peer);
                        break;
                    }
                    Message::Ping(data) => {
                        if tx.send(Message::Pong(data)).await.is_err() {
                            error!("Failed to send pong to {}", peer);
                            break;
                        }
                        continue;
                    }
                    Message::Binary(_) => {
                        warn!("Ignoring binary message from {}", peer);
                        continue;
                    }
                    Message::Pong(_) | Message::Frame(_) => continue,
                }
            }
            Some(event) = session.next_event() => {
                session.apply(event);
            }
        }

        if let Err(e) = send_state(&mut tx, &session).await {
            error!("Error sending state to {}: {}", peer, e);
            break;
        }
    }

    info!("Session {} closed for {}", session.id(), peer);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(ts: &str, sig: &str) -> HashMap<String, String> {
        HashMap::from([
            ("ts".to_string(), ts.to_string()),
            ("sig".to_string(), sig.to_string()),
        ])
    }

    #[test]
    fn accepts_fresh_valid_signature() {
        let sig = sign_timestamp("secret", 1_700_000_000).unwrap();
        assert_eq!(verify_signature("secret", &params("1700000000", &sig), 1_700_000_100), Ok(()));
    }

    #[test]
    fn rejects_wrong_key_and_stale_timestamp() {
        let sig = sign_timestamp("other", 1_700_000_000).unwrap();
        assert_eq!(
            verify_signature("secret", &params("1700000000", &sig), 1_700_000_000),
            Err("bad signature")
        );

        let sig = sign_timestamp("secret", 1_700_000_000).unwrap();
        assert_eq!(
            verify_signature("secret", &params("1700000000", &sig), 1_700_000_301),
            Err("timestamp out of range")
        );
    }

    #[test]
    fn rejects_missing_parameters() {
        assert_eq!(verify_signature("secret", &HashMap::new(), 0), Err("missing ts/sig"));
        assert_eq!(verify_signature("secret", &params("abc", "00"), 0), Err("bad timestamp"));
    }
}
