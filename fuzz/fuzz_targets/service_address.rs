#![no_main]

use birpc::Server;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(service_method) = std::str::from_utf8(data) {
        let server = Server::default();
        let _ = server.resolve(service_method);
    }
});
