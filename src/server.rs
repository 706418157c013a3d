//! TCP accept loop and per-connection worker.
//!
//! One `tokio::spawn`ed worker per connection, a dedicated outbound-drain
//! task per connection so writes from the handler's own replies and from
//! group broadcasts never interleave, and a `broadcast` shutdown channel so
//! every live worker gets a chance to close its socket cleanly.

use crate::error::AppError;
use crate::protocol::{self, ConnContext};
use crate::session::ConnId;
use crate::state::AppState;
use futures::FutureExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use tracing::Instrument;

/// Lines longer than this are a protocol violation, not a retryable error:
/// a line that can never complete would otherwise stall the connection
/// forever waiting for a `\n` that isn't coming.
const MAX_LINE_BYTES: usize = 4096;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

pub async fn run(state: AppState, addr: &str) -> Result<(), AppError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::StartServer(format!("bind {addr}: {e}")))?;
    tracing::info!(addr, "groupchat-server listening");
    serve(state, listener).await;
    Ok(())
}

/// Runs the accept loop against an already-bound listener. Split out from
/// [`run`] so integration tests can bind to `127.0.0.1:0` and hand the
/// listener here directly instead of going through `TcpListener::bind`.
pub async fn serve(state: AppState, listener: TcpListener) {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let connection_limit = Arc::new(Semaphore::new(state.config.max_connections));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let Ok(permit) = connection_limit.clone().try_acquire_owned() else {
                    tracing::warn!(%peer, "connection limit reached, rejecting");
                    drop(socket);
                    continue;
                };

                let state = state.clone();
                let shutdown_rx = shutdown_tx.subscribe();
                tokio::spawn(async move {
                    let _permit = permit;
                    handle_connection(state, socket, peer, shutdown_rx).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received, closing listener");
                let _ = shutdown_tx.send(());
                break;
            }
        }
    }
}

async fn handle_connection(
    state: AppState,
    socket: TcpStream,
    peer: std::net::SocketAddr,
    server_shutdown: broadcast::Receiver<()>,
) {
    let conn_id = ConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
    let span = tracing::info_span!("connection", conn_id = conn_id.0);
    connection_loop(state, socket, peer, server_shutdown, conn_id)
        .instrument(span)
        .await;
}

async fn connection_loop(
    state: AppState,
    socket: TcpStream,
    peer: std::net::SocketAddr,
    mut server_shutdown: broadcast::Receiver<()>,
    conn_id: ConnId,
) {
    tracing::info!(%peer, "connection accepted");

    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let ctx = ConnContext {
        id: conn_id,
        outbound: outbound_tx,
        shutdown: Arc::new(Notify::new()),
    };

    let writer_task = tokio::spawn(async move {
        while let Some(mut line) = outbound_rx.recv().await {
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = writer.shutdown().await;
    });

    loop {
        let mut buf = Vec::new();
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => {
                match read {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        if buf.len() > MAX_LINE_BYTES {
                            ctx.send_error(&AppError::InvalidCommand("line too long".into()));
                            break;
                        }
                        let line = match std::str::from_utf8(&buf) {
                            Ok(s) => s.trim_end_matches(['\n', '\r']),
                            Err(_) => {
                                ctx.send_error(&AppError::InvalidCommand("invalid UTF-8".into()));
                                continue;
                            }
                        };
                        if line.is_empty() {
                            continue;
                        }
                        dispatch_guarded(&state, &ctx, line).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "read error");
                        break;
                    }
                }
            }
            _ = ctx.shutdown.notified() => {
                tracing::info!("closing, session taken over by a new connection");
                break;
            }
            _ = server_shutdown.recv() => {
                tracing::info!("closing for server shutdown");
                break;
            }
        }
    }

    state.sessions.disconnect(conn_id).await;
    drop(ctx);
    let _ = writer_task.await;
    tracing::info!("connection closed");
}

/// Runs the dispatcher with a panic guard: a bug in one handler must never
/// take down the accept loop or any other connection.
async fn dispatch_guarded(state: &AppState, ctx: &ConnContext, line: &str) {
    let result = std::panic::AssertUnwindSafe(protocol::dispatch(state, ctx, line))
        .catch_unwind()
        .await;
    if let Err(panic) = result {
        tracing::error!(panic = ?panic, "handler panicked");
        ctx.send_error(&AppError::Internal("handler panic".into()));
    }
}
