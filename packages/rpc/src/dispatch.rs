use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    thread,
};

use async_std::{
    channel::{bounded, Receiver},
    task::JoinHandle,
};
use birpc_context::{PendingRequests, PendingTable, WaitGroup, WaitGuard};
use parking_lot::{Mutex, MutexGuard};

use crate::{Argument, CallError, ClientConnector, Reply, Server, ServiceDispatch, CANCEL_SERVICE};

/// Transport side identity of one inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub service_method: String,
    pub seq: u64,
}

/// Response side of a transport.
pub trait ServerTransport: Send + Sync + 'static {
    type Codec: Send + Sync + 'static;

    /// Writes one response. Called with the connection's write lock held.
    fn send_response(&self, sending: &MutexGuard<'_, ()>, req: &Request, reply: &Reply, codec: &Self::Codec, errmsg: &str);
    /// Releases transport bookkeeping for `req` once its response is out.
    fn free_request(&self, req: Request);
}

/// A request as read from the wire, body still encoded.
#[derive(Debug)]
pub struct InboundRequest {
    pub request: Request,
    pub body: Vec<u8>,
    pub client: ClientConnector,
}

/// A request resolved to a method with its holders ready.
pub struct PreparedCall {
    pub service: Arc<dyn ServiceDispatch>,
    pub method: String,
    pub request: Request,
    pub argument: Argument,
    pub reply: Reply,
    pub client: ClientConnector,
}

/// Cancels the request's token when dropped, whatever way the call ends.
struct PendingRelease<'a> {
    pending: &'a dyn PendingRequests,
    seq: u64,
}

impl Drop for PendingRelease<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.seq);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Server side of one transport: dispatches requests and writes their responses.
pub struct Connection<T: ServerTransport> {
    transport: Arc<T>,
    codec: Arc<T::Codec>,
    sending: Arc<Mutex<()>>,
    pending: Arc<dyn PendingRequests>,
}

impl<T: ServerTransport> Clone for Connection<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            codec: self.codec.clone(),
            sending: self.sending.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<T: ServerTransport> Connection<T> {
    pub fn new(transport: Arc<T>, codec: Arc<T::Codec>) -> Self {
        Self::with_pending(transport, codec, Arc::new(PendingTable::new()))
    }

    pub fn with_pending(transport: Arc<T>, codec: Arc<T::Codec>, pending: Arc<dyn PendingRequests>) -> Self {
        Self {
            transport,
            codec,
            sending: Arc::new(Mutex::new(())),
            pending,
        }
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Resolves, decodes and dispatches one request read from the wire. Requests that cannot be
    /// routed are answered with an error response right away and `None` is returned.
    pub fn serve(&self, server: &Server, wg: Option<WaitGuard>, request: Request, body: &[u8], client: ClientConnector) -> Option<JoinHandle<()>> {
        match self.prepare(server, &request, body) {
            Ok((service, method, argument, reply)) => Some(self.dispatch(
                PreparedCall {
                    service,
                    method,
                    request,
                    argument,
                    reply,
                    client,
                },
                wg,
            )),
            Err(err) => {
                log::warn!("[Connection] reject seq {}: {}", request.seq, err);
                self.reject(request, &err.to_string());
                None
            }
        }
    }

    /// Serves requests until the channel closes, then waits for every call still running.
    pub async fn serve_requests(&self, server: &Server, requests: Receiver<InboundRequest>) {
        let wg = WaitGroup::new();
        while let Ok(InboundRequest { request, body, client }) = requests.recv().await {
            self.serve(server, Some(wg.add()), request, &body, client);
        }
        log::info!("[Connection] request channel closed, waiting {} calls", wg.count());
        async_std::task::spawn_blocking(move || wg.wait()).await;
    }

    fn prepare(&self, server: &Server, request: &Request, body: &[u8]) -> Result<(Arc<dyn ServiceDispatch>, String, Argument, Reply), CallError> {
        let (service, method) = server.resolve(&request.service_method)?;
        let (mut argument, _) = service.make_argument(&method)?;
        argument.decode(body)?;
        let reply = service.make_reply(&method)?;
        Ok((service, method, argument, reply))
    }

    /// Answers `request` with an error and no reply value.
    pub fn reject(&self, request: Request, errmsg: &str) {
        self.respond(&request, &Reply::empty(), errmsg);
        self.transport.free_request(request);
    }

    /// Runs the call on a thread of its own, detached from the receiving loop. Calls never queue
    /// behind each other, so a cancel request reaches the calls it targets however many are blocked.
    ///
    /// The returned handle completes once the call's response is out.
    pub fn dispatch(&self, call: PreparedCall, wg: Option<WaitGuard>) -> JoinHandle<()> {
        let (done_tx, done_rx) = bounded::<()>(1);
        let request = call.request.clone();
        let conn = self.clone();
        let spawned = thread::Builder::new().name(format!("birpc-call-{}", request.seq)).spawn(move || {
            let _done = done_tx;
            conn.serve_call(call, wg);
        });
        if let Err(err) = spawned {
            log::error!("[Connection] cannot start call {} seq {}: {}", request.service_method, request.seq, err);
            self.reject(request, &format!("rpc: cannot start call: {}", err));
        }
        // the sender is dropped when the call thread exits, which closes the channel
        async_std::task::spawn(async move {
            let _ = done_rx.recv().await;
        })
    }

    /// Runs one call to completion on the current thread and sends its response.
    ///
    /// The sequence number is registered before the method runs and canceled when it returns,
    /// including when it panics. A panic becomes an error response.
    pub fn serve_call(&self, call: PreparedCall, wg: Option<WaitGuard>) {
        let _done = wg;
        let PreparedCall {
            service,
            method,
            request,
            mut argument,
            mut reply,
            client,
        } = call;

        let ctx = self.pending.start(request.seq);
        let release = PendingRelease {
            pending: self.pending.as_ref(),
            seq: request.seq,
        };

        if service.name() == CANCEL_SERVICE {
            if let Some(target) = argument.accepts_pending() {
                target.set_pending(self.pending.clone());
            }
        }

        log::debug!("[Connection] call {} seq {}", request.service_method, request.seq);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| service.invoke(&method, ctx, client, &mut argument, &mut reply)));
        drop(release);

        let errmsg = match outcome {
            Ok(Ok(())) => String::new(),
            Ok(Err(err)) => err.to_string(),
            Err(payload) => {
                let errmsg = format!("rpc: method {} panicked: {}", request.service_method, panic_message(&*payload));
                log::error!("[Connection] {}", errmsg);
                errmsg
            }
        };
        log::debug!("[Connection] done {} seq {} error {:?}", request.service_method, request.seq, errmsg);

        self.respond(&request, &reply, &errmsg);
        self.transport.free_request(request);
    }

    fn respond(&self, request: &Request, reply: &Reply, errmsg: &str) {
        let sending = self.sending.lock();
        self.transport.send_response(&sending, request, reply, self.codec.as_ref(), errmsg);
    }
}
