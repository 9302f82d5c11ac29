use std::{sync::Arc, time::Duration};

use async_std::channel::{unbounded, Sender};
use birpc::{
    mock::{MemCodec, MemTransport},
    CancelArgs, Canceled, ClientConnector, Connection, Context, InboundRequest, MethodError, MethodResult, MethodSet, Receiver, Request, Server, ServerConfig, CANCEL_SERVICE,
};
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Registers an Arith service and drives calls through an in-memory transport
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of concurrent Arith.Mul calls
    #[arg(env, long, default_value_t = 8)]
    calls: u64,

    /// Cancel the long running Arith.Wait call after this delay
    #[arg(env, long, default_value_t = 100)]
    cancel_after_ms: u64,

    /// Simulated work inside each Arith.Mul call
    #[arg(env, long, default_value_t = 10)]
    workers_delay_ms: u64,

    /// Log every method the catalog rejects
    #[arg(env, long)]
    report_invalid_methods: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Operands {
    a: i64,
    b: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WaitArgs {
    timeout_ms: u64,
}

struct Arith {
    delay: Duration,
}

impl Arith {
    fn add(&self, _ctx: Context, _client: ClientConnector, args: &Operands, reply: &mut i64) -> MethodResult {
        *reply = args.a + args.b;
        Ok(())
    }

    fn mul(&self, ctx: Context, client: ClientConnector, args: Operands, reply: &mut i64) -> MethodResult {
        if ctx.wait(self.delay) {
            return Err(MethodError::from("canceled"));
        }
        *reply = args.a * args.b;
        // report progress back to the caller over the reverse channel
        if let Some(progress) = client.downcast_ref::<Sender<String>>() {
            if progress.try_send(format!("{} * {} = {}", args.a, args.b, *reply)).is_err() {
                log::warn!("[Arith] progress channel closed");
            }
        }
        Ok(())
    }

    fn wait(&self, ctx: Context, _client: ClientConnector, args: &WaitArgs, reply: &mut String) -> MethodResult {
        if ctx.wait(Duration::from_millis(args.timeout_ms)) {
            return Err(Canceled.into());
        }
        *reply = "finished".to_string();
        Ok(())
    }
}

impl Receiver for Arith {
    fn methods(set: &mut MethodSet<Self>) {
        set.add("Add", Arith::add).add_value("Mul", Arith::mul).add("Wait", Arith::wait);
    }
}

fn inbound<T: Serialize>(service_method: &str, seq: u64, args: &T, client: ClientConnector) -> Result<InboundRequest, bincode::Error> {
    Ok(InboundRequest {
        request: Request {
            service_method: service_method.to_string(),
            seq,
        },
        body: bincode::serialize(args)?,
        client,
    })
}

#[async_std::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder().format_timestamp_millis().init();
    let args: Args = Args::parse();

    let server = Server::new(ServerConfig {
        report_invalid_methods: args.report_invalid_methods,
        ..Default::default()
    });
    server.register(Arith {
        delay: Duration::from_millis(args.workers_delay_ms),
    })?;
    log::info!("services {:?}", server.services());

    let transport = Arc::new(MemTransport::new());
    let conn = Connection::new(transport.clone(), Arc::new(MemCodec));
    let (requests_tx, requests_rx) = unbounded();
    let (progress_tx, progress_rx) = unbounded::<String>();

    let serving = {
        let conn = conn.clone();
        async_std::task::spawn(async move { conn.serve_requests(&server, requests_rx).await })
    };

    requests_tx.send(inbound("Arith.Wait", 1, &WaitArgs { timeout_ms: 60_000 }, ClientConnector::none())?).await?;
    requests_tx.send(inbound("Arith.Add", 2, &Operands { a: 2, b: 3 }, ClientConnector::none())?).await?;
    for i in 0..args.calls {
        let seq = 10 + i;
        let operands = Operands { a: i as i64, b: 7 };
        requests_tx.send(inbound("Arith.Mul", seq, &operands, ClientConnector::new(progress_tx.clone()))?).await?;
    }
    requests_tx.send(inbound("Arith.Missing", 3, &Operands::default(), ClientConnector::none())?).await?;

    async_std::task::sleep(Duration::from_millis(args.cancel_after_ms)).await;
    let cancel = format!("{}.Cancel", CANCEL_SERVICE);
    requests_tx.send(inbound(&cancel, 4, &CancelArgs::new(1), ClientConnector::none())?).await?;
    drop(requests_tx);
    drop(progress_tx);

    serving.await;

    while let Ok(progress) = progress_rx.try_recv() {
        log::info!("progress: {}", progress);
    }

    let mut frames = transport.frames()?;
    frames.sort_by_key(|frame| frame.seq);
    for frame in frames {
        if frame.error.is_empty() {
            log::info!("seq {} {} ok, {} bytes", frame.seq, frame.service_method, frame.body.len());
        } else {
            log::info!("seq {} {} error: {}", frame.seq, frame.service_method, frame.error);
        }
    }
    Ok(())
}
