use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use common::{
    ClientState, ConditionClient, ConditionInfo, Credentials, Error, Result, SessionProvider,
};

use super::protocol::{
    InboundFrame, OutboundFrame, ResponseKey, TRNM_CONDITION_LIST, TRNM_LOGIN,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Client for the Kiwoom condition-search websocket channel.
///
/// One connection is shared by every caller. Requests are correlated to
/// responses by [`ResponseKey`]; callers waiting on the same key are served
/// in FIFO order. Concurrent `run_query` calls on distinct condition ids
/// therefore interleave freely.
///
/// Replies carry no request id, only the echoed `seq`. A caller that gives up
/// after its request went out leaves its slot in the queue as a tombstone, so
/// the late reply is discarded instead of answering the next request for the
/// same condition. If the gateway never answers such a request, its tombstone
/// lingers until the connection is re-established.
///
/// State machine: `Disconnected -> Connecting -> Connected -> Authenticated`,
/// `Error` on any transport failure, `Disconnected` again after `close()`.
pub struct KiwoomClient {
    url: String,
    session: Arc<dyn SessionProvider>,
    request_timeout: Duration,
    shared: Arc<Shared>,
    next_tag: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// State shared with the reader task.
struct Shared {
    state: Mutex<ClientState>,
    pending: Mutex<Pending>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
}

struct Waiter {
    tag: u64,
    /// `None` once the caller abandoned a request that was already sent.
    tx: Option<oneshot::Sender<InboundFrame>>,
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<ResponseKey, VecDeque<Waiter>>,
}

impl Pending {
    fn register(&mut self, key: ResponseKey, tag: u64) -> oneshot::Receiver<InboundFrame> {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(key).or_default().push_back(Waiter { tag, tx: Some(tx) });
        rx
    }

    fn take_next(&mut self, key: &ResponseKey) -> Option<Waiter> {
        let queue = self.waiters.get_mut(key)?;
        let waiter = queue.pop_front();
        if queue.is_empty() {
            self.waiters.remove(key);
        }
        waiter
    }

    /// Withdraw the waiter tagged `tag`. When its request reached the wire
    /// the slot stays queued as a tombstone to absorb the late reply.
    fn cancel(&mut self, key: &ResponseKey, tag: u64, sent: bool) {
        let Some(queue) = self.waiters.get_mut(key) else { return };
        if sent {
            if let Some(waiter) = queue.iter_mut().find(|w| w.tag == tag) {
                waiter.tx = None;
            }
        } else {
            queue.retain(|w| w.tag != tag);
        }
        if queue.is_empty() {
            self.waiters.remove(key);
        }
    }

    /// Dropping the senders wakes every live waiter with a closed-channel
    /// error. Tombstones go too; the new connection owes them nothing.
    fn fail_all(&mut self) -> usize {
        let count = self
            .waiters
            .values()
            .flatten()
            .filter(|w| w.tx.is_some())
            .count();
        self.waiters.clear();
        count
    }
}

/// Removes an unanswered waiter when its request future finishes or is dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    key: ResponseKey,
    tag: u64,
    sent: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.shared.pending).cancel(&self.key, self.tag, self.sent);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> ClientState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ClientState) {
        *lock(&self.state) = state;
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        let sink = sink
            .as_mut()
            .ok_or_else(|| Error::Connection("not connected".into()))?;
        if let Err(e) = sink.send(Message::Text(text)).await {
            self.set_state(ClientState::Error);
            return Err(Error::Connection(e.to_string()));
        }
        Ok(())
    }

    async fn dispatch(&self, text: String) {
        let frame = match InboundFrame::parse(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping unparsable frame");
                return;
            }
        };

        if frame.is_ping() {
            // The server drops sessions that do not echo PING verbatim.
            if let Err(e) = self.send_text(text).await {
                warn!(error = %e, "Failed to echo PING");
            }
            return;
        }

        let Some(key) = frame.key() else {
            debug!(trnm = %frame.trnm, "Ignoring unsolicited frame");
            return;
        };

        let waiter = lock(&self.pending).take_next(&key);
        match waiter.map(|w| w.tx) {
            Some(Some(tx)) => {
                // Receiver gone means the caller timed out in the meantime.
                let _ = tx.send(frame);
            }
            Some(None) => debug!(?key, "Discarding reply to an abandoned request"),
            None => debug!(?key, "Response with no pending request"),
        }
    }

    /// Transport is gone: refuse new sends and wake every waiter.
    async fn mark_broken(&self) {
        self.set_state(ClientState::Error);
        self.sink.lock().await.take();
        let failed = lock(&self.pending).fail_all();
        if failed > 0 {
            warn!(failed, "Connection lost with requests in flight");
        }
    }
}

async fn read_loop(shared: Arc<Shared>, mut source: WsSource) {
    while let Some(msg) = source.next().await {
        match msg {
            Ok(Message::Text(text)) => shared.dispatch(text).await,
            Ok(Message::Close(frame)) => {
                info!(?frame, "Condition channel closed by server");
                break;
            }
            Ok(_) => {} // binary frames and transport-level ping/pong
            Err(e) => {
                warn!(error = %e, "Condition channel read failed");
                break;
            }
        }
    }
    shared.mark_broken().await;
}

impl KiwoomClient {
    pub fn new(
        url: &str,
        session: Arc<dyn SessionProvider>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let parsed = Url::parse(url).map_err(|e| Error::Config(format!("bad websocket url '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(Error::Config(format!("websocket url must be ws:// or wss://, got '{url}'")));
        }

        Ok(Self {
            url: parsed.to_string(),
            session,
            request_timeout,
            shared: Arc::new(Shared {
                state: Mutex::new(ClientState::Disconnected),
                pending: Mutex::new(Pending::default()),
                sink: tokio::sync::Mutex::new(None),
            }),
            next_tag: AtomicU64::new(1),
            reader: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    fn require(&self, operation: &'static str, expected: &[ClientState]) -> Result<()> {
        let state = self.state();
        if expected.contains(&state) {
            Ok(())
        } else {
            Err(Error::InvalidState { operation, state })
        }
    }

    /// Open the websocket. Valid from `Disconnected` or `Error`.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = lock(&self.shared.state);
            match *state {
                ClientState::Disconnected | ClientState::Error => *state = ClientState::Connecting,
                other => {
                    return Err(Error::InvalidState {
                        operation: "connect",
                        state: other,
                    })
                }
            }
        }

        info!(url = %self.url, "Connecting to condition-search channel");
        let (ws, _) = match connect_async(self.url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                self.shared.set_state(ClientState::Error);
                return Err(Error::Connection(e.to_string()));
            }
        };

        let (sink, source) = ws.split();
        *self.shared.sink.lock().await = Some(sink);
        let handle = tokio::spawn(read_loop(self.shared.clone(), source));
        if let Some(stale) = lock(&self.reader).replace(handle) {
            stale.abort();
        }

        self.shared.set_state(ClientState::Connected);
        Ok(())
    }

    /// Send LOGIN. Valid from `Connected`; a rejected login stays `Connected`.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        self.require("authenticate", &[ClientState::Connected])?;

        let frame = self
            .exchange(
                ResponseKey::Login,
                OutboundFrame::Login {
                    token: &credentials.token,
                },
                self.request_timeout,
            )
            .await?
            .ok_or_else(|| {
                self.shared.set_state(ClientState::Error);
                Error::Connection(format!("no {TRNM_LOGIN} response within {:?}", self.request_timeout))
            })?;

        if !frame.is_success() {
            warn!(code = frame.return_code, msg = %frame.message(), "Login rejected");
            return Err(Error::Auth {
                code: frame.return_code,
                message: frame.message(),
            });
        }

        self.shared.set_state(ClientState::Authenticated);
        info!("Authenticated on condition-search channel");
        Ok(())
    }

    /// Connect and authenticate with fresh credentials from the session.
    pub async fn establish(&self) -> Result<()> {
        self.connect().await?;
        let credentials = self.session.ensure_valid().await?;
        self.authenticate(&credentials).await
    }

    /// Close the socket, stop the reader and fail any waiters.
    pub async fn close(&self) {
        let reader = lock(&self.reader).take();
        if let Some(handle) = reader {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(mut sink) = self.shared.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        }
        lock(&self.shared.pending).fail_all();
        self.shared.set_state(ClientState::Disconnected);
        debug!("Condition-search channel closed");
    }

    /// Register a waiter for `key`, send `frame`, and wait for the answer.
    /// `Ok(None)` means no answer arrived within `timeout`.
    async fn exchange(
        &self,
        key: ResponseKey,
        frame: OutboundFrame<'_>,
        timeout: Duration,
    ) -> Result<Option<InboundFrame>> {
        let text = frame.to_text()?;
        let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);

        // Register before sending so a fast reply cannot overtake us.
        let rx = lock(&self.shared.pending).register(key.clone(), tag);
        let mut guard = PendingGuard {
            shared: &self.shared,
            key,
            tag,
            sent: false,
        };

        self.shared.send_text(text).await?;
        guard.sent = true;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(_)) => Err(Error::Connection(
                "connection closed while awaiting response".into(),
            )),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for KiwoomClient {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.reader).take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl ConditionClient for KiwoomClient {
    async fn run_query(&self, condition_id: &str, timeout: Duration) -> Result<Vec<String>> {
        self.require("run a condition query", &[ClientState::Authenticated])?;

        debug!(condition_id, "Executing condition query");
        let frame = self
            .exchange(
                ResponseKey::Query(condition_id.to_string()),
                OutboundFrame::execute(condition_id),
                timeout,
            )
            .await?
            .ok_or_else(|| Error::QueryTimeout {
                condition_id: condition_id.to_string(),
            })?;

        if !frame.is_success() {
            return Err(Error::Query {
                condition_id: condition_id.to_string(),
                code: frame.return_code,
                message: frame.message(),
            });
        }
        frame.symbols()
    }

    async fn list_conditions(&self) -> Result<Vec<ConditionInfo>> {
        self.require("list conditions", &[ClientState::Authenticated])?;

        let frame = self
            .exchange(
                ResponseKey::ConditionList,
                OutboundFrame::ConditionList,
                self.request_timeout,
            )
            .await?
            .ok_or_else(|| Error::QueryTimeout {
                condition_id: TRNM_CONDITION_LIST.to_string(),
            })?;

        if !frame.is_success() {
            return Err(Error::Query {
                condition_id: TRNM_CONDITION_LIST.to_string(),
                code: frame.return_code,
                message: frame.message(),
            });
        }
        frame.conditions()
    }

    async fn reconnect(&self) -> Result<()> {
        warn!(state = %self.state(), "Re-establishing condition-search channel");
        self.close().await;
        self.establish().await
    }
}
