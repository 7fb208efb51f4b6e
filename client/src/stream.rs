use std::time::{Duration, Instant};

use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use shared::types::MinerKey;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc},
};
use tokio_tungstenite::{
    tungstenite::{self, Message},
    MaybeTlsStream,
    WebSocketStream,
};
use tracing::*;
use url::Url;

use crate::{
    restful::PoolApi,
    session::Session,
    thread::{Launcher, WorkerUpdate},
};

type StreamWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// `http(s)://host/...` -> `ws(s)://host/...?timestamp=..&pubkey=..`
pub fn socket_url(server: &Url, timestamp: u64, pubkey: &MinerKey) -> anyhow::Result<Url> {
    let scheme = match server.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => anyhow::bail!("unsupported server scheme: {other}"),
    };
    let mut url = server.clone();
    url.set_scheme(scheme).map_err(|_| anyhow::anyhow!("cannot switch {server} to {scheme}"))?;
    url.query_pairs_mut()
        .clear()
        .append_pair("timestamp", &timestamp.to_string())
        .append_pair("pubkey", &pubkey.to_string());
    Ok(url)
}

/// Drive `session` until it is stopped by `shutdown` or gives up reconnecting.
pub async fn run<L: Launcher>(
    session: &mut Session<L>,
    updates: &mut mpsc::UnboundedReceiver<WorkerUpdate>,
    api: &PoolApi,
    report_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    session.start();
    let mut report = tokio::time::interval(report_interval);

    'main: loop {
        let fetched = tokio::select! {
            _ = shutdown.recv() => break 'main,
            res = api.timestamp() => res,
        };
        let timestamp = match fetched {
            Ok(timestamp) => timestamp,
            Err(err) => {
                warn!("fail to fetch server timestamp, use local clock: {err:#}");
                shared::timestamp()
            }
        };
        let url = socket_url(api.base(), timestamp, session.pubkey())?;
        info!("connect: [{url}]");

        let connected = tokio::select! {
            _ = shutdown.recv() => break 'main,
            res = tokio_tungstenite::connect_async(url.as_str()) => res,
        };

        let stream = match connected {
            Ok((stream, _)) => stream,
            Err(err) => {
                error!("fail to connect to server: {err:#}");
                if wait_reconnect(session, updates, &mut shutdown).await? {
                    continue;
                }
                break 'main;
            }
        };

        info!("ws connect to the server");

        let (mut write, mut read) = stream.split();

        let Some(handshake) = session.on_open(timestamp) else {
            break 'main;
        };
        let sent = tokio::select! {
            _ = shutdown.recv() => break 'main,
            res = write.send(Message::Binary(handshake.into())) => res,
        };
        if let Err(err) = sent {
            error!("fail to send handshake: {err:#}");
        } else {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        session.stop();
                        write.send(Message::Close(None)).await.ok();
                        break 'main;
                    }
                    Some(update) = updates.recv() => session.on_worker_update(update),
                    _ = report.tick() => {
                        let stats = session.tick(Instant::now());
                        if session.is_hashing() {
                            match session.current_best() {
                                Some(best) => info!("{stats}, challenge best: {} @ {}", best.best_difficulty, best.best_nonce),
                                None => info!("{stats}"),
                            }
                        }
                    }
                    res = read.next() => {
                        if let Err(err) = stream_read(res, session, &mut write).await {
                            error!("{err:#}");
                            break;
                        }
                    }
                }
            }
        }

        if !wait_reconnect(session, updates, &mut shutdown).await? {
            break 'main;
        }
    }

    session.stop();
    debug!("[stream] shutdown");
    Ok(())
}

/// Sleep out the backoff delay while still folding in worker results.
/// Returns `false` when the session should not reconnect.
async fn wait_reconnect<L: Launcher>(
    session: &mut Session<L>,
    updates: &mut mpsc::UnboundedReceiver<WorkerUpdate>,
    shutdown: &mut broadcast::Receiver<()>,
) -> anyhow::Result<bool> {
    let Some(delay) = session.on_disconnect()? else {
        return Ok(false);
    };

    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                session.stop();
                return Ok(false);
            }
            Some(update) = updates.recv() => session.on_worker_update(update),
            _ = &mut sleep => return Ok(true),
        }
    }
}

/// read one message from the stream and hand it to the session
async fn stream_read<L: Launcher>(
    data: Option<Result<Message, tungstenite::Error>>,
    session: &mut Session<L>,
    write: &mut StreamWriter,
) -> anyhow::Result<()> {
    match data {
        None => anyhow::bail!("ws disconnection"),
        Some(Err(err)) => anyhow::bail!("fail to read from server: {err}"),
        Some(Ok(message)) => {
            match message {
                Message::Binary(bin) => session.on_frame(&bin),
                Message::Ping(ping) => {
                    debug!("ping arrived");
                    if let Err(err) = write.send(Message::Pong(ping)).await {
                        anyhow::bail!("fail to send pong: {err:?}");
                    }
                }
                Message::Close(reason) => anyhow::bail!("server closed the connection: {reason:?}"),
                Message::Text(text) => warn!("unexpected text frame ({} bytes)", text.len()),
                _ => {}
            }
        }
    }
    Ok(())
}
