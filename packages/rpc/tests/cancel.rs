use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use birpc::{
    mock::{MemCodec, MemTransport},
    CancelArgs, ClientConnector, Connection, Context, MethodError, MethodResult, MethodSet, PendingRequests, PendingTable, Receiver, Request, Server, ServerConfig,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct WaitArgs {
    timeout_ms: u64,
}

struct Sleeper;

impl Sleeper {
    fn wait(&self, ctx: Context, _client: ClientConnector, args: &WaitArgs, reply: &mut String) -> MethodResult {
        if ctx.wait(Duration::from_millis(args.timeout_ms)) {
            return Err(MethodError::from("canceled"));
        }
        *reply = "timeout".to_string();
        Ok(())
    }
}

impl Receiver for Sleeper {
    fn methods(set: &mut MethodSet<Self>) {
        set.add("Wait", Sleeper::wait);
    }
}

/// Pending table that counts cancel requests per sequence number.
#[derive(Default)]
struct CountingTable {
    inner: PendingTable,
    cancels: Mutex<HashMap<u64, usize>>,
}

impl PendingRequests for CountingTable {
    fn start(&self, seq: u64) -> Context {
        self.inner.start(seq)
    }

    fn cancel(&self, seq: u64) {
        *self.cancels.lock().entry(seq).or_default() += 1;
        self.inner.cancel(seq);
    }
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[async_std::test]
async fn cancel_in_flight_call() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = Server::new(ServerConfig::default());
    server.register(Sleeper).unwrap();
    let table = Arc::new(CountingTable::default());
    let transport = Arc::new(MemTransport::new());
    let conn = Connection::with_pending(transport.clone(), Arc::new(MemCodec), table.clone());

    let body = bincode::serialize(&WaitArgs { timeout_ms: 10_000 }).unwrap();
    let waiting = conn
        .serve(&server, None, Request { service_method: "Sleeper.Wait".to_string(), seq: 1 }, &body, ClientConnector::none())
        .expect("Should dispatch");
    assert!(wait_until(Duration::from_secs(5), || table.inner.contains(1)));

    let body = bincode::serialize(&CancelArgs::new(1)).unwrap();
    let canceling = conn
        .serve(&server, None, Request { service_method: "_goRPC_.Cancel".to_string(), seq: 2 }, &body, ClientConnector::none())
        .expect("Should dispatch");

    canceling.await;
    waiting.await;

    let mut frames = transport.frames().unwrap();
    frames.sort_by_key(|f| f.seq);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].seq, 1);
    assert_eq!(frames[0].error, "canceled");
    assert_eq!(frames[1].seq, 2);
    assert_eq!(frames[1].error, "");
    assert!(bincode::deserialize::<bool>(&frames[1].body).unwrap());

    // seq 1 is canceled once by the meta-service and once by its own release, the second is a no-op
    let cancels = table.cancels.lock().clone();
    assert_eq!(cancels.get(&1), Some(&2));
    assert_eq!(cancels.get(&2), Some(&1));
    assert!(table.inner.is_empty());

    let mut freed = transport.freed();
    freed.sort();
    assert_eq!(freed, vec![1, 2]);
}

#[async_std::test]
async fn cancel_reaches_call_behind_many_blocked_calls() {
    const BLOCKED: u64 = 600;

    let server = Server::default();
    server.register(Sleeper).unwrap();
    let table = Arc::new(PendingTable::new());
    let transport = Arc::new(MemTransport::new());
    let conn = Connection::with_pending(transport.clone(), Arc::new(MemCodec), table.clone());

    let body = bincode::serialize(&WaitArgs { timeout_ms: 30_000 }).unwrap();
    let mut waiting = vec![];
    for seq in 1..=BLOCKED {
        let handle = conn
            .serve(&server, None, Request { service_method: "Sleeper.Wait".to_string(), seq }, &body, ClientConnector::none())
            .expect("Should dispatch");
        waiting.push(handle);
    }
    assert!(wait_until(Duration::from_secs(10), || table.len() == BLOCKED as usize));

    let started = Instant::now();
    let body = bincode::serialize(&CancelArgs::new(1)).unwrap();
    conn.serve(&server, None, Request { service_method: "_goRPC_.Cancel".to_string(), seq: BLOCKED + 1 }, &body, ClientConnector::none())
        .expect("Should dispatch")
        .await;
    assert!(started.elapsed() < Duration::from_secs(2), "cancel took {:?}", started.elapsed());

    waiting.remove(0).await;
    let frames = transport.frames().unwrap();
    let first = frames.iter().find(|f| f.seq == 1).expect("Should answer seq 1");
    assert_eq!(first.error, "canceled");

    for seq in 2..=BLOCKED {
        table.cancel(seq);
    }
    for handle in waiting {
        handle.await;
    }
    assert_eq!(transport.frames().unwrap().len(), BLOCKED as usize + 1);
    assert!(table.is_empty());
}

#[async_std::test]
async fn cancel_unknown_seq_is_harmless() {
    let _ = env_logger::builder().is_test(true).try_init();

    let server = Server::default();
    let table = Arc::new(PendingTable::new());
    let transport = Arc::new(MemTransport::new());
    let conn = Connection::with_pending(transport.clone(), Arc::new(MemCodec), table.clone());

    let body = bincode::serialize(&CancelArgs::new(99)).unwrap();
    let handle = conn
        .serve(&server, None, Request { service_method: "_goRPC_.Cancel".to_string(), seq: 5 }, &body, ClientConnector::none())
        .expect("Should dispatch");
    handle.await;

    let frames = transport.frames().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].error, "");
    assert!(table.is_empty());
}

#[async_std::test]
async fn uncanceled_call_times_out_normally() {
    let server = Server::default();
    server.register(Sleeper).unwrap();
    let transport = Arc::new(MemTransport::new());
    let conn = Connection::new(transport.clone(), Arc::new(MemCodec));

    let body = bincode::serialize(&WaitArgs { timeout_ms: 10 }).unwrap();
    let handle = conn
        .serve(&server, None, Request { service_method: "Sleeper.Wait".to_string(), seq: 1 }, &body, ClientConnector::none())
        .expect("Should dispatch");
    handle.await;

    let frames = transport.frames().unwrap();
    assert_eq!(frames[0].error, "");
    assert_eq!(bincode::deserialize::<String>(&frames[0].body).unwrap(), "timeout");
}
