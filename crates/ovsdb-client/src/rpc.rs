use crate::codec::JsonCodec;
use crate::monitor::MonitorHandle;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

/// `RpcSink` receives server-initiated methods. Deliveries are serialized:
/// the session task dispatches one notification at a time, in arrival order.
pub trait RpcSink: Send + Sync {
    /// A `update` notification: the monitor context (a json-value) and the
    /// raw table-updates payload.
    fn update(&self, context: Value, updates: Value);
    fn locked(&self, lock: String);
    fn stolen(&self, lock: String);
}

type Reply = oneshot::Sender<Result<Value>>;
type SharedSink = Arc<Mutex<Option<Weak<dyn RpcSink>>>>;

enum Command {
    Call {
        method: &'static str,
        params: Value,
        reply: Reply,
    },
    Shutdown,
}

/// `Rpc` is the caller-side handle of one JSON-RPC session. Handles are
/// cheap to clone; the session task owns the socket and correlates
/// responses to requests by id.
#[derive(Clone)]
pub struct Rpc {
    tx: mpsc::UnboundedSender<Command>,
    sink: SharedSink,
}

impl Rpc {
    /// Spawn the session task over an established stream and return its
    /// handle.
    pub fn start<S>(io: S) -> Rpc
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink: SharedSink = Arc::new(Mutex::new(None));
        tokio::spawn(serve(Framed::new(io, JsonCodec), rx, sink.clone()));
        Rpc { tx, sink }
    }

    pub async fn list_dbs(&self) -> Result<Vec<String>> {
        let result = self.call("list_dbs", json!([]), None).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn get_schema(&self, database: &str) -> Result<Value> {
        self.call("get_schema", json!([database]), None).await
    }

    pub async fn transact(&self, params: Value) -> Result<Value> {
        self.call("transact", params, None).await
    }

    /// Send a `monitor` request. The params thunk runs immediately before
    /// the request is handed to the session, deferring serialization.
    pub async fn monitor(
        &self,
        params: impl FnOnce() -> Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.call("monitor", params(), timeout).await
    }

    pub async fn monitor_cancel(
        &self,
        handle: &MonitorHandle,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.call("monitor_cancel", json!([handle]), timeout).await
    }

    pub async fn echo(&self) -> Result<Vec<String>> {
        let result = self.call("echo", json!([]), None).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn lock(&self, lock: &str) -> Result<Value> {
        self.call("lock", json!([lock]), None).await
    }

    pub async fn steal(&self, lock: &str) -> Result<Value> {
        self.call("steal", json!([lock]), None).await
    }

    pub async fn unlock(&self, lock: &str) -> Result<Value> {
        self.call("unlock", json!([lock]), None).await
    }

    /// Register the sink receiving server-initiated methods. The session
    /// holds it weakly: dropping the owning Arc severs delivery.
    pub fn register_callback(&self, sink: Weak<dyn RpcSink>) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    /// Ask the session task to stop. Pending requests complete with
    /// `ConnectionClosed`. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    async fn call(
        &self,
        method: &'static str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Call {
                method,
                params,
                reply: reply_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        match timeout {
            None => reply_rx.await.map_err(|_| Error::ConnectionClosed)?,
            Some(limit) => match tokio::time::timeout(limit, reply_rx).await {
                Ok(completed) => completed.map_err(|_| Error::ConnectionClosed)?,
                Err(_) => Err(Error::Timeout),
            },
        }
    }
}

async fn serve<S>(
    mut framed: Framed<S, JsonCodec>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    sink: SharedSink,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
{
    let mut next_id: u64 = 0;
    let mut pending: HashMap<u64, Reply> = HashMap::new();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                None | Some(Command::Shutdown) => break,
                Some(Command::Call { method, params, reply }) => {
                    let id = next_id;
                    next_id += 1;

                    let frame = json!({"id": id, "method": method, "params": params});
                    tracing::trace!(id, method, "sending request");
                    if let Err(err) = framed.send(frame).await {
                        tracing::warn!(id, method, ?err, "failed to write request");
                        let _ = reply.send(Err(err));
                        break;
                    }
                    pending.insert(id, reply);
                }
            },
            frame = framed.next() => match frame {
                None => {
                    tracing::debug!("peer closed the connection");
                    break;
                }
                Some(Err(err)) => {
                    tracing::warn!(?err, "failed to decode inbound message");
                    break;
                }
                Some(Ok(message)) => {
                    if let Some(response) = dispatch(message, &mut pending, &sink) {
                        if let Err(err) = framed.send(response).await {
                            tracing::warn!(?err, "failed to answer server request");
                            break;
                        }
                    }
                }
            },
        }
    }

    // The session is over: fail every outstanding promise exactly once and
    // sever the sink.
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(Error::ConnectionClosed));
    }
    *sink.lock().unwrap() = None;
}

// Route one inbound message. Returns a frame to write back, for
// server-initiated methods that require an answer.
fn dispatch(message: Value, pending: &mut HashMap<u64, Reply>, sink: &SharedSink) -> Option<Value> {
    let mut message = match message {
        Value::Object(object) => object,
        other => {
            tracing::warn!(%other, "inbound message is not an object");
            return None;
        }
    };

    match message.get("method").and_then(Value::as_str) {
        Some("echo") => {
            let id = message.get("id").cloned().unwrap_or(Value::Null);
            let params = message.remove("params").unwrap_or_else(|| json!([]));
            Some(json!({"id": id, "result": params, "error": Value::Null}))
        }
        Some("update") => {
            let mut params = match message.remove("params") {
                Some(Value::Array(params)) if params.len() == 2 => params,
                other => {
                    tracing::warn!(?other, "malformed update notification");
                    return None;
                }
            };
            let updates = params.pop().expect("params has two elements");
            let context = params.pop().expect("params has one element");
            match sink.lock().unwrap().as_ref().and_then(Weak::upgrade) {
                Some(sink) => sink.update(context, updates),
                None => tracing::trace!("dropping update: no registered sink"),
            }
            None
        }
        Some(method @ ("locked" | "stolen")) => {
            let lock = message
                .get("params")
                .and_then(Value::as_array)
                .and_then(|params| params.first())
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            match sink.lock().unwrap().as_ref().and_then(Weak::upgrade) {
                Some(sink) if method == "locked" => sink.locked(lock),
                Some(sink) => sink.stolen(lock),
                None => tracing::trace!(method, "dropping notification: no registered sink"),
            }
            None
        }
        Some(method) => {
            tracing::warn!(method, "dropping unknown server method");
            None
        }
        None => {
            // A response: correlate it with its pending promise.
            let Some(id) = message.get("id").and_then(Value::as_u64) else {
                tracing::warn!("dropping response without a usable id");
                return None;
            };
            let Some(reply) = pending.remove(&id) else {
                tracing::debug!(id, "response for an unknown or abandoned request");
                return None;
            };
            let error = message.get("error").cloned().unwrap_or(Value::Null);
            let outcome = if error.is_null() {
                Ok(message.remove("result").unwrap_or(Value::Null))
            } else {
                Err(Error::OperationFailed(error))
            };
            let _ = reply.send(outcome);
            None
        }
    }
}
