use futures::{SinkExt, StreamExt};
use ovsdb::{DatabaseSchema, TableUpdates};
use ovsdb_client::{
    Client, Error, JsonCodec, MonitorCallback, MonitorRequest, Operation, Options,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

type ServerIo = Framed<DuplexStream, JsonCodec>;

fn start_client(options: Options) -> (Client, ServerIo) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let client = Client::new(client_io, options, None, None);
    (client, Framed::new(server_io, JsonCodec))
}

// Read the next request frame and return (id, method, params).
async fn read_request(server: &mut ServerIo) -> (Value, String, Vec<Value>) {
    let frame = server.next().await.expect("a request frame").unwrap();
    let id = frame.get("id").cloned().unwrap();
    let method = frame.get("method").and_then(Value::as_str).unwrap().to_string();
    let params = frame.get("params").and_then(Value::as_array).cloned().unwrap();
    (id, method, params)
}

async fn respond(server: &mut ServerIo, id: Value, result: Value) {
    server
        .send(json!({"id": id, "result": result, "error": Value::Null}))
        .await
        .unwrap();
}

fn vtep_schema_json() -> Value {
    json!({
        "name": "hardware_vtep",
        "version": "1.8.0",
        "tables": {
            "Logical_Switch": {
                "columns": {
                    "name": {"type": "string"},
                    "tunnel_key": {"type": {"key": "integer", "min": 0, "max": 1}},
                }
            },
        }
    })
}

struct Recorder {
    tx: tokio::sync::mpsc::UnboundedSender<TableUpdates>,
}

impl MonitorCallback for Recorder {
    fn update(&self, updates: TableUpdates, _schema: &DatabaseSchema) {
        let _ = self.tx.send(updates);
    }
}

#[tokio::test]
async fn list_databases_and_schema_cache() {
    let (client, mut server) = start_client(Options::default());

    let server_task = tokio::spawn(async move {
        let (id, method, _) = read_request(&mut server).await;
        assert_eq!(method, "list_dbs");
        respond(&mut server, id, json!(["hardware_vtep"])).await;

        let (id, method, params) = read_request(&mut server).await;
        assert_eq!(method, "get_schema");
        assert_eq!(params, vec![json!("hardware_vtep")]);
        respond(&mut server, id, vtep_schema_json()).await;
        server
    });

    assert_eq!(client.list_databases().await.unwrap(), ["hardware_vtep"]);
    assert!(!client.is_ready(Duration::ZERO).await);

    let schema = client.get_schema("hardware_vtep").await.unwrap();
    assert_eq!(schema.version, "1.8.0");
    // The client fills in the internally generated columns.
    assert!(schema.table("Logical_Switch").unwrap().column("_uuid").is_some());

    // A second fetch is served from the cache: the server sees no request.
    let cached = client.get_schema("hardware_vtep").await.unwrap();
    assert!(Arc::ptr_eq(&schema, &cached));
    assert!(client.is_ready(Duration::ZERO).await);

    server_task.await.unwrap();
}

#[tokio::test]
async fn monitor_snapshot_pushed_updates_and_cancel() {
    let (client, mut server) = start_client(Options::default());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let server_task = tokio::spawn(async move {
        let (id, method, _) = read_request(&mut server).await;
        assert_eq!(method, "get_schema");
        respond(&mut server, id, vtep_schema_json()).await;

        let (id, method, params) = read_request(&mut server).await;
        assert_eq!(method, "monitor");
        assert_eq!(params[0], json!("hardware_vtep"));
        let handle = params[1].as_str().unwrap().to_string();
        assert_eq!(
            params[2],
            json!({"Logical_Switch": {"columns": ["name", "tunnel_key"]}}),
        );

        // Initial snapshot: one existing row.
        respond(
            &mut server,
            id,
            json!({
                "Logical_Switch": {
                    "10000000-0000-0000-0000-000000000001": {"new": {"name": "ls0"}},
                }
            }),
        )
        .await;

        // A pushed update for the same monitor.
        server
            .send(json!({
                "id": Value::Null,
                "method": "update",
                "params": [handle, {
                    "Logical_Switch": {
                        "10000000-0000-0000-0000-000000000002": {"new": {"name": "ls1"}},
                    }
                }],
            }))
            .await
            .unwrap();

        let (id, method, _) = read_request(&mut server).await;
        assert_eq!(method, "monitor_cancel");
        respond(&mut server, id, json!({})).await;
        server
    });

    let schema = client.get_schema("hardware_vtep").await.unwrap();
    let requests = BTreeMap::from([(
        "Logical_Switch".to_string(),
        MonitorRequest::with_columns(["name", "tunnel_key"]),
    )]);

    let (handle, initial) = client
        .monitor(&schema, requests, Arc::new(Recorder { tx }))
        .await
        .unwrap();

    let row_one: uuid::Uuid = "10000000-0000-0000-0000-000000000001".parse().unwrap();
    assert!(initial
        .table("Logical_Switch")
        .unwrap()
        .row(&row_one)
        .unwrap()
        .is_insert());

    // The pushed notification reaches the callback, decoded by the schema.
    let pushed = rx.recv().await.unwrap();
    let row_two: uuid::Uuid = "10000000-0000-0000-0000-000000000002".parse().unwrap();
    let update = pushed.table("Logical_Switch").unwrap().row(&row_two).unwrap();
    assert_eq!(
        update.new.as_ref().unwrap().get("name").unwrap(),
        &ovsdb::Datum::Atom(ovsdb::Atom::from("ls1")),
    );

    client.cancel_monitor(&handle).await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn transact_round_trip() {
    let (client, mut server) = start_client(Options::default());

    let server_task = tokio::spawn(async move {
        let (id, method, _) = read_request(&mut server).await;
        assert_eq!(method, "get_schema");
        respond(&mut server, id, vtep_schema_json()).await;

        let (id, method, params) = read_request(&mut server).await;
        assert_eq!(method, "transact");
        assert_eq!(params[0], json!("hardware_vtep"));
        assert_eq!(params[1]["op"], json!("insert"));
        assert_eq!(params[2]["op"], json!("select"));
        assert_eq!(params[3]["op"], json!("commit"));

        respond(
            &mut server,
            id,
            json!([
                {"uuid": ["uuid", "36bef046-7da7-43a5-905a-f17899216de7"]},
                {"rows": [{"name": "ls0"}]},
                {},
            ]),
        )
        .await;
    });

    let schema = client.get_schema("hardware_vtep").await.unwrap();

    let mut row = ovsdb::Row::new();
    row.insert("name", ovsdb::Atom::from("ls0"));
    let results = client
        .transact(
            &schema,
            vec![
                Operation::insert("Logical_Switch", &row),
                Operation::select(
                    "Logical_Switch",
                    vec![ovsdb_client::Condition::equals("name", ovsdb::Atom::from("ls0"))],
                ),
                Operation::commit(true),
            ],
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(
        results[0].uuid.unwrap().to_string(),
        "36bef046-7da7-43a5-905a-f17899216de7",
    );
    assert_eq!(results[1].rows, Some(vec![json!({"name": "ls0"})]));
    assert!(results.iter().all(|result| !result.is_error()));

    server_task.await.unwrap();
}

#[tokio::test]
async fn server_echo_is_answered_in_place() {
    let (client, mut server) = start_client(Options::default());

    server
        .send(json!({"id": 42, "method": "echo", "params": ["ping"]}))
        .await
        .unwrap();

    let reply = server.next().await.unwrap().unwrap();
    assert_eq!(
        reply,
        json!({"id": 42, "result": ["ping"], "error": Value::Null}),
    );
    drop(client);
}

#[tokio::test(start_paused = true)]
async fn monitor_times_out_against_a_silent_server() {
    let (client, mut server) = start_client(Options {
        monitor_timeout: Some(Duration::from_millis(200)),
        ..Options::default()
    });

    let server_task = tokio::spawn(async move {
        let (id, method, _) = read_request(&mut server).await;
        assert_eq!(method, "get_schema");
        respond(&mut server, id, vtep_schema_json()).await;

        // Swallow the monitor request without answering.
        let (_, method, _) = read_request(&mut server).await;
        assert_eq!(method, "monitor");
        server
    });

    let schema = client.get_schema("hardware_vtep").await.unwrap();
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let err = client
        .monitor(&schema, BTreeMap::new(), Arc::new(Recorder { tx }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout));

    server_task.await.unwrap();
}

#[tokio::test]
async fn disconnect_fails_pending_requests_and_is_idempotent() {
    let (client, server) = start_client(Options::default());

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.list_databases().await })
    };
    // Let the request reach the session task before tearing down.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(client.is_active());
    client.disconnect();
    client.disconnect();
    assert!(!client.is_active());

    let outcome = pending.await.unwrap();
    assert!(matches!(outcome, Err(Error::ConnectionClosed)));

    // New requests fail immediately once the session is gone.
    assert!(matches!(
        client.list_databases().await,
        Err(Error::ConnectionClosed),
    ));
    drop(server);
}

#[tokio::test]
async fn peer_close_fails_pending_requests() {
    let (client, server) = start_client(Options::default());

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.echo().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Dropping the server half closes the stream under the client.
    drop(server);

    let outcome = pending.await.unwrap();
    assert!(matches!(outcome, Err(Error::ConnectionClosed)));
}
