use crate::actor::RegistryHandle;
use crate::bridge::{self, SharedBridge};
use crate::registry::SessionUpdate;
use juggler_core::hook_events::{
    decode_hook_payload, decode_kitty_event, map_event, HookAction, HookPayload, KittyEventKind,
};
use juggler_core::http_frame::{HttpRequest, HttpResponse, RequestAccumulator};
use juggler_core::TerminalKind;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const READ_CHUNK_BYTES: usize = 64 * 1024;
const BODY_LOG_PREFIX: usize = 200;

pub struct ListenerContext {
    pub registry: RegistryHandle,
    pub bridge: SharedBridge,
    pub max_request_bytes: usize,
}

pub async fn run(
    listener: TcpListener,
    ctx: Arc<ListenerContext>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let local = listener.local_addr()?;
    info!(event = "listener_start", addr = %local);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, peer)) => {
                        debug!(event = "hook_connection", peer = %peer);
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, ctx).await;
                        });
                    }
                    Err(err) => {
                        warn!(event = "listener_accept_error", error = %err);
                    }
                }
            }
        }
    }

    info!(event = "listener_stop", addr = %local);
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, ctx: Arc<ListenerContext>) {
    let Some(request) = read_request(&mut stream, ctx.max_request_bytes).await else {
        return;
    };
    let response = route(&request, &ctx).await;
    if let Err(err) = stream.write_all(&response.serialize()).await {
        debug!(event = "hook_write_error", error = %err);
        return;
    }
    let _ = stream.shutdown().await;
}

/// Reads until a full request is buffered. Framing failures drop the
/// connection without a response.
async fn read_request(stream: &mut TcpStream, max_bytes: usize) -> Option<HttpRequest> {
    let mut accumulator = RequestAccumulator::new(max_bytes);
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    loop {
        let read = match stream.read(&mut chunk).await {
            Ok(read) => read,
            Err(err) => {
                debug!(event = "hook_read_error", error = %err);
                return None;
            }
        };
        if read == 0 {
            return match accumulator.finish() {
                Ok(request) => Some(request),
                Err(err) => {
                    debug!(event = "hook_frame_dropped", error = %err);
                    None
                }
            };
        }
        match accumulator.push_chunk(&chunk[..read]) {
            Ok(Some(request)) => return Some(request),
            Ok(None) => continue,
            Err(err) => {
                warn!(event = "hook_frame_dropped", error = %err);
                return None;
            }
        }
    }
}

async fn route(request: &HttpRequest, ctx: &Arc<ListenerContext>) -> HttpResponse {
    if request.method != "POST" {
        return HttpResponse::method_not_allowed();
    }
    match request.path.as_str() {
        "/hook" => handle_hook(&request.body, ctx).await,
        "/kitty-event" => handle_kitty_event(&request.body, ctx).await,
        _ => HttpResponse::not_found(),
    }
}

fn body_prefix(body: &str) -> String {
    body.chars().take(BODY_LOG_PREFIX).collect()
}

async fn handle_hook(body: &str, ctx: &Arc<ListenerContext>) -> HttpResponse {
    match decode_hook_payload(body) {
        Ok(payload) => {
            dispatch_hook(payload, ctx).await;
            HttpResponse::ok()
        }
        Err(err) => {
            warn!(
                event = "hook_decode_error",
                error = %err,
                body = %body_prefix(body)
            );
            HttpResponse::bad_request("Invalid JSON")
        }
    }
}

async fn dispatch_hook(payload: HookPayload, ctx: &Arc<ListenerContext>) {
    let action = map_event(&payload.event, &payload.agent);
    debug!(
        event = "hook_received",
        agent = %payload.agent,
        hook_event = %payload.event,
        session = %payload.session_key(),
        action = ?action
    );
    match action {
        HookAction::UpdateState(state) => {
            ctx.registry
                .add_or_update_session(SessionUpdate::from_hook(&payload, state))
                .await;
            let terminal_id = payload.terminal_id();
            if !terminal_id.is_empty() {
                spawn_enrichment(ctx, payload.terminal_kind(), terminal_id.to_string());
            }
        }
        HookAction::RemoveSession => {
            ctx.registry
                .remove_session(payload.session_key().to_string())
                .await;
        }
        HookAction::Ignore => {}
    }
}

/// Fetches tab and pane details off the request path and hands them back to
/// the registry, which drops them if the session is gone by then.
fn spawn_enrichment(ctx: &Arc<ListenerContext>, kind: TerminalKind, terminal_id: String) {
    let registry = ctx.registry.clone();
    let bridge = ctx.bridge.clone();
    tokio::spawn(async move {
        match bridge::fetch_session_info(bridge, kind, terminal_id.clone()).await {
            Ok(Some(info)) => {
                registry
                    .update_session_terminal_info(terminal_id, info)
                    .await;
            }
            Ok(None) => {
                debug!(event = "terminal_info_missing", terminal = %terminal_id);
            }
            Err(err) => {
                debug!(event = "terminal_info_error", terminal = %terminal_id, error = %err);
            }
        }
    });
}

async fn handle_kitty_event(body: &str, ctx: &Arc<ListenerContext>) -> HttpResponse {
    let event = match decode_kitty_event(body) {
        Ok(event) => event,
        Err(err) => {
            warn!(
                event = "kitty_event_decode_error",
                error = %err,
                body = %body_prefix(body)
            );
            return HttpResponse::bad_request("Invalid JSON");
        }
    };
    match event.kind() {
        KittyEventKind::FocusChanged => {
            ctx.registry
                .update_focused_session(Some(event.window_id))
                .await;
        }
        KittyEventKind::SessionTerminated => {
            ctx.registry
                .remove_sessions_by_terminal_id(event.window_id)
                .await;
        }
        KittyEventKind::Other => {
            debug!(event = "kitty_event_ignored", kitty_event = %event.event);
        }
    }
    HttpResponse::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor;
    use crate::bridge::UnconfiguredBridge;
    use crate::registry::{RegistrySettings, SessionRegistry};
    use juggler_core::http_frame::DEFAULT_MAX_REQUEST_BYTES;
    use juggler_core::SessionState;
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn launch(
        max_request_bytes: usize,
    ) -> (
        SocketAddr,
        RegistryHandle,
        watch::Sender<bool>,
        tokio::task::JoinHandle<io::Result<()>>,
    ) {
        let (registry, _task) = actor::spawn(SessionRegistry::new(RegistrySettings::default()), 32);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let ctx = Arc::new(ListenerContext {
            registry: registry.clone(),
            bridge: Arc::new(UnconfiguredBridge),
            max_request_bytes,
        });
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(listener, ctx, rx));
        (addr, registry, tx, handle)
    }

    async fn exchange(addr: SocketAddr, chunks: &[&[u8]]) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        for chunk in chunks {
            stream.write_all(chunk).await.expect("write");
            stream.flush().await.expect("flush");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let mut response = Vec::new();
        // A dropped connection may surface as a reset; whatever arrived counts.
        let _ = tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut response))
            .await
            .expect("read timeout");
        String::from_utf8(response).expect("utf8")
    }

    fn post(path: &str, body: &str) -> Vec<u8> {
        format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        )
        .into_bytes()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hook_event_creates_session() {
        let (addr, registry, shutdown, handle) = launch(DEFAULT_MAX_REQUEST_BYTES).await;
        let body = r#"{"agent":"claude-code","event":"Stop","terminal":{"sessionId":"w0t0p0:abc","cwd":"/work/api"},"tmux":{"pane":"%1"}}"#;
        let response = exchange(addr, &[&post("/hook", body)]).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with(r#"{"status":"ok"}"#));

        let snapshot = registry.fetch_snapshot().await;
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].id(), "w0t0p0:abc:%1");
        assert_eq!(snapshot.sessions[0].state, SessionState::Idle);

        let _ = shutdown.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn body_split_across_writes_is_reassembled() {
        let (addr, registry, shutdown, _handle) = launch(DEFAULT_MAX_REQUEST_BYTES).await;
        let request = post(
            "/hook",
            r#"{"agent":"opencode","event":"session.status.busy","terminal":{"sessionId":"t1"}}"#,
        );
        let (head, tail) = request.split_at(request.len() - 10);
        let response = exchange(addr, &[head, tail]).await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        let snapshot = registry.fetch_snapshot().await;
        assert_eq!(snapshot.sessions[0].state, SessionState::Working);
        let _ = shutdown.send(true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bad_json_is_rejected_without_touching_registry() {
        let (addr, registry, shutdown, _handle) = launch(DEFAULT_MAX_REQUEST_BYTES).await;
        let response = exchange(addr, &[&post("/hook", r#"{"agent":"claude-code"}"#)]).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.ends_with(r#"{"status":"error","message":"Invalid JSON"}"#));
        assert!(registry.fetch_snapshot().await.sessions.is_empty());
        let _ = shutdown.send(true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wrong_method_and_unknown_path() {
        let (addr, _registry, shutdown, _handle) = launch(DEFAULT_MAX_REQUEST_BYTES).await;
        let response = exchange(addr, &[b"GET /hook HTTP/1.1\r\nHost: x\r\n\r\n"]).await;
        assert!(response.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(response.contains("Content-Length: 49\r\n"));

        let response = exchange(addr, &[&post("/status", "{}")]).await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(response.ends_with(r#"{"status":"error","message":"Not found"}"#));
        let _ = shutdown.send(true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn framing_errors_close_without_response() {
        let (addr, _registry, shutdown, _handle) = launch(64).await;
        let response = exchange(addr, &[b"GARBAGE\r\n\r\n"]).await;
        assert!(response.is_empty());

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(b"POST /hook HTTP/1.1\r\nContent-Length: 50\r\n\r\n{")
            .await
            .expect("write");
        stream.shutdown().await.expect("half close");
        let mut response = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(3), stream.read_to_end(&mut response))
            .await
            .expect("read timeout");
        assert!(response.is_empty());

        let oversized = post("/hook", &"x".repeat(128));
        assert!(exchange(addr, &[&oversized]).await.is_empty());
        let _ = shutdown.send(true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn kitty_events_drive_focus_and_removal() {
        let (addr, registry, shutdown, _handle) = launch(DEFAULT_MAX_REQUEST_BYTES).await;
        for window in ["7", "8"] {
            let body = serde_json::json!({
                "agent": "claude-code",
                "event": "SessionStart",
                "terminal": {"sessionId": window, "terminalType": "kitty"},
            })
            .to_string();
            exchange(addr, &[&post("/hook", &body)]).await;
        }
        let response = exchange(
            addr,
            &[&post("/kitty-event", r#"{"event":"focus_changed","window_id":"8"}"#)],
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        let snapshot = registry.fetch_snapshot().await;
        assert_eq!(snapshot.focused_id.as_deref(), Some("8"));
        assert_eq!(snapshot.cycling.current_index, 1);

        exchange(
            addr,
            &[&post("/kitty-event", r#"{"event":"session_terminated","window_id":"7"}"#)],
        )
        .await;
        let snapshot = registry.fetch_snapshot().await;
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].id(), "8");

        let response = exchange(addr, &[&post("/kitty-event", r#"{"window_id":"8"}"#)]).await;
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        let _ = shutdown.send(true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_end_removes_session() {
        let (addr, registry, shutdown, _handle) = launch(DEFAULT_MAX_REQUEST_BYTES).await;
        let start =
            r#"{"agent":"claude-code","event":"SessionStart","terminal":{"sessionId":"t5"}}"#;
        let end = r#"{"agent":"claude-code","event":"SessionEnd","terminal":{"sessionId":"t5"}}"#;
        exchange(addr, &[&post("/hook", start)]).await;
        assert_eq!(registry.fetch_snapshot().await.sessions.len(), 1);
        exchange(addr, &[&post("/hook", end)]).await;
        assert!(registry.fetch_snapshot().await.sessions.is_empty());
        let _ = shutdown.send(true);
    }
}
