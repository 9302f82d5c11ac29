use birpc::{ClientConnector, Context, MethodResult, MethodSet, Receiver, Server, ServerConfig};
use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::{const_mutex, Mutex};
use serde::{Deserialize, Serialize};

static WARNINGS: Mutex<Vec<String>> = const_mutex(Vec::new());

/// Keeps every warning so the test can look at what registration reported.
struct WarnCollector;

impl Log for WarnCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record) {
        if record.level() == Level::Warn {
            WARNINGS.lock().push(record.args().to_string());
        }
    }

    fn flush(&self) {}
}

fn take_register_warnings() -> Vec<String> {
    WARNINGS.lock().drain(..).filter(|line| line.contains("rpc.Register")).collect()
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Entry {
    amount: i64,
}

struct Ledger;

impl Ledger {
    fn balance(&self, _ctx: Context, _client: ClientConnector, args: &Entry, reply: &mut i64) -> MethodResult {
        *reply = args.amount;
        Ok(())
    }

    fn no_ctx(&self, _ctx: u32, _client: ClientConnector, _args: &Entry, _reply: &mut i64) -> MethodResult {
        Ok(())
    }

    fn wrong_result(&self, _ctx: Context, _client: ClientConnector, _args: &Entry, _reply: &mut i64) -> Result<(), String> {
        Ok(())
    }
}

impl Receiver for Ledger {
    fn methods(set: &mut MethodSet<Self>) {
        set.add("Balance", Ledger::balance)
            .add("balance", Ledger::balance)
            .add("NoCtx", Ledger::no_ctx)
            .add("WrongResult", Ledger::wrong_result);
    }
}

fn server(report_invalid_methods: bool) -> Server {
    Server::new(ServerConfig {
        report_invalid_methods,
        register_cancel_service: false,
    })
}

// one test per binary: the logger is process wide
#[test]
fn excluded_methods_are_reported_only_when_enabled() {
    log::set_boxed_logger(Box::new(WarnCollector)).expect("Should install logger");
    log::set_max_level(LevelFilter::Warn);

    server(true).register(Ledger).expect("Should register");
    let warnings = take_register_warnings();
    assert_eq!(warnings.len(), 2, "{:?}", warnings);
    assert!(warnings.iter().any(|line| line.contains("\"NoCtx\"")));
    assert!(warnings.iter().any(|line| line.contains("\"WrongResult\"")));
    assert!(!warnings.iter().any(|line| line.contains("\"balance\"")));

    server(false).register(Ledger).expect("Should register");
    assert_eq!(take_register_warnings(), Vec::<String>::new());
}
