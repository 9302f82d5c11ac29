#![no_main]

use std::sync::Arc;

use birpc::{
    mock::{MemCodec, MemTransport},
    ClientConnector, Connection, Request, Server,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let server = Server::default();
    let transport = Arc::new(MemTransport::new());
    let conn = Connection::new(transport.clone(), Arc::new(MemCodec));
    let request = Request {
        service_method: "_goRPC_.Cancel".to_string(),
        seq: 1,
    };
    if let Some(handle) = conn.serve(&server, None, request, data, ClientConnector::none()) {
        async_std::task::block_on(handle);
    }
    assert_eq!(transport.freed(), vec![1]);
});
