use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use pretty_assertions::assert_eq;

use super::*;
use crate::player_config::PlayerConfig;
use crate::store::{DataStore, Shared};

fn test_ctx() -> Context {
    Context {
        store: Shared::new(DataStore::new(PlayerConfig::default())),
        conffile: Utf8PathBuf::from("/nonexistent/moosic-test/config"),
    }
}

#[test]
fn respond_answers_no_op() {
    let registry = Registry::new();
    let ctx = test_ctx();
    let reply = respond(&registry, &ctx, r#"{"method": "no_op"}"#);
    assert_eq!(reply, Response::Result(crate::wire::Value::Bool(true)));
}

#[test]
fn respond_turns_garbage_into_parse_faults() {
    let registry = Registry::new();
    let ctx = test_ctx();
    let Response::Fault(fault) = respond(&registry, &ctx, "!! not json") else {
        panic!("expected a fault");
    };
    assert_eq!(fault.code, crate::wire::PARSE_ERROR);
}

#[test]
fn respond_reports_dispatch_misses() {
    let registry = Registry::new();
    let ctx = test_ctx();
    let Response::Fault(fault) = respond(&registry, &ctx, r#"{"method": "bogus"}"#) else {
        panic!("expected a fault");
    };
    assert_eq!(fault.code, crate::wire::NO_SUCH_METHOD_ERROR);
}

#[tokio::test]
async fn connection_round_trips_requests() {
    let (client, server) = tokio::io::duplex(4096);
    let registry = Arc::new(Registry::new());
    let ctx = test_ctx();
    let inflight = Arc::new(AtomicUsize::new(0));
    tokio::spawn(handle_connection(server, registry, ctx.clone(), inflight));

    let (reader, mut writer) = tokio::io::split(client);
    let mut lines = BufReader::new(reader).lines();

    writer
        .write_all(b"{\"method\":\"append\",\"params\":[[{\"b64\":\"YQ==\"}]]}\n")
        .await
        .unwrap();
    assert_eq!(
        lines.next_line().await.unwrap().unwrap(),
        r#"{"result":true}"#
    );

    writer
        .write_all(b"{\"method\":\"queue_length\"}\n")
        .await
        .unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"result":1}"#);

    // a bad line faults but does not kill the connection
    writer.write_all(b"not json\n").await.unwrap();
    let reply = lines.next_line().await.unwrap().unwrap();
    assert!(reply.contains("-503"));

    writer.write_all(b"{\"method\":\"no_op\"}\n").await.unwrap();
    assert_eq!(
        lines.next_line().await.unwrap().unwrap(),
        r#"{"result":true}"#
    );
}

#[test]
fn concurrent_appends_all_land() {
    let registry = Arc::new(Registry::new());
    let ctx = test_ctx();
    let mut workers = Vec::new();
    for worker in 0..2 {
        let registry = Arc::clone(&registry);
        let ctx = ctx.clone();
        workers.push(std::thread::spawn(move || {
            for i in 0..1000 {
                let song = format!("/w{worker}/{i}.mp3");
                let line = format!(
                    r#"{{"method":"append","params":[[{{"b64":"{}"}}]]}}"#,
                    B64.encode(&song)
                );
                let Response::Result(_) = respond(&registry, &ctx, &line) else {
                    panic!("append failed");
                };
            }
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let store = ctx.store.lock();
    assert_eq!(store.queue.len(), 2000);
    // each client's own stream keeps its order even though the interleaving
    // between the two is unspecified
    for worker in 0..2 {
        let prefix = format!("/w{worker}/");
        let ours: Vec<_> = store
            .queue
            .iter()
            .filter(|item| item.starts_with(prefix.as_bytes()))
            .collect();
        assert_eq!(ours.len(), 1000);
        for (i, item) in ours.iter().enumerate() {
            assert_eq!(**item, format!("{prefix}{i}.mp3").into_bytes());
        }
    }
}
