//! WebSocket transport for streamed edits
//!
//! Each connection carries exactly one request: `connected` frame, one client
//! message, progress frames, one final frame, close. The edit itself runs in a
//! spawned task, so a client that disconnects mid-edit only stops the frame
//! stream.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::edit::{
    parse_extraction_params, run_edit, run_feature_extraction, EditFrame, EditKind, EditRequest,
};
use crate::AppState;

/// Frames buffered between the edit task and the socket
const FRAME_BUFFER: usize = 32;

/// WS /ws/speed
pub async fn speed_channel(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| edit_socket(socket, state, EditKind::Speed))
}

/// WS /ws/pitch
pub async fn pitch_channel(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| edit_socket(socket, state, EditKind::Pitch))
}

/// WS /ws/feature_extraction
pub async fn feature_extraction_channel(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| extraction_socket(socket, state))
}

async fn send_frame(socket: &mut WebSocket, frame: &EditFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => socket.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize frame: {}", e);
            false
        }
    }
}

/// Wait for the single request message; `None` if the client went away
async fn read_request(socket: &mut WebSocket) -> Option<String> {
    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Binary(bytes)) => return Some(String::from_utf8_lossy(&bytes).into_owned()),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => return None,
            Err(e) => {
                debug!("WebSocket receive error: {}", e);
                return None;
            }
        }
    }
    None
}

/// Greet the client and read its request
async fn open_channel(socket: &mut WebSocket, channel: &str) -> Option<String> {
    if !send_frame(socket, &EditFrame::connected()).await {
        return None;
    }
    let message = read_request(socket).await;
    if message.is_none() {
        debug!(channel, "Client disconnected before sending a request");
    }
    message
}

async fn reject(mut socket: WebSocket, channel: &str, message: String) {
    warn!(channel, %message, "Rejected channel request");
    send_frame(&mut socket, &EditFrame::Error { message }).await;
    let _ = socket.send(Message::Close(None)).await;
}

/// Relay frames until the final one, then close
async fn stream_frames(
    mut socket: WebSocket,
    mut frames: mpsc::Receiver<EditFrame>,
    channel: &str,
) {
    while let Some(frame) = frames.recv().await {
        let last = frame.is_final();
        if !send_frame(&mut socket, &frame).await {
            debug!(channel, "Client disconnected, operation continues without streaming");
            return;
        }
        if last {
            break;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn edit_socket(mut socket: WebSocket, state: AppState, kind: EditKind) {
    let channel = kind.as_str();
    let Some(message) = open_channel(&mut socket, channel).await else {
        return;
    };

    let request = match EditRequest::parse(kind, &message) {
        Ok(request) => request,
        Err(err) => return reject(socket, channel, err.to_string()).await,
    };

    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let session = state.session.clone();
    tokio::spawn(async move {
        run_edit(&session, request, tx).await;
    });

    stream_frames(socket, rx, channel).await;
}

async fn extraction_socket(mut socket: WebSocket, state: AppState) {
    let channel = "feature_extraction";
    let Some(message) = open_channel(&mut socket, channel).await else {
        return;
    };

    let params = match parse_extraction_params(&message) {
        Ok(params) => params,
        Err(err) => return reject(socket, channel, err.to_string()).await,
    };

    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let extractor = state.collaborators.extractor.clone();
    let limit = state.config.timeouts.dataset();
    tokio::spawn(async move {
        run_feature_extraction(extractor, params, limit, tx).await;
    });

    stream_frames(socket, rx, channel).await;
}

pub fn channel_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/speed", get(speed_channel))
        .route("/ws/pitch", get(pitch_channel))
        .route("/ws/feature_extraction", get(feature_extraction_channel))
}
