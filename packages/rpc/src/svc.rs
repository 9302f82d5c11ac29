use std::{fmt::Debug, sync::Arc};

use birpc_context::{Context, PendingRequests};
use serde::{Deserialize, Serialize};

use crate::{ClientConnector, MethodResult, MethodSet, Receiver};

/// Reserved name of the cancellation service.
pub const CANCEL_SERVICE: &str = "_goRPC_";

/// Implemented by arguments that may be handed the live pending table before their method runs.
pub trait AcceptsPending {
    fn set_pending(&mut self, pending: Arc<dyn PendingRequests>);
}

#[derive(Default, Serialize, Deserialize)]
pub struct CancelArgs {
    pub seq: u64,
    #[serde(skip)]
    pending: Option<Arc<dyn PendingRequests>>,
}

impl CancelArgs {
    pub fn new(seq: u64) -> Self {
        Self { seq, pending: None }
    }
}

impl AcceptsPending for CancelArgs {
    fn set_pending(&mut self, pending: Arc<dyn PendingRequests>) {
        self.pending = Some(pending);
    }
}

impl Debug for CancelArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelArgs").field("seq", &self.seq).field("pending", &self.pending.is_some()).finish()
    }
}

/// Receiver of the cancellation service.
#[derive(Debug, Default)]
pub struct GoRpc;

impl GoRpc {
    fn cancel(&self, _ctx: Context, _client: ClientConnector, args: &CancelArgs, reply: &mut bool) -> MethodResult {
        match &args.pending {
            Some(pending) => {
                log::info!("[GoRpc] cancel seq {}", args.seq);
                pending.cancel(args.seq);
                *reply = true;
            }
            None => {
                log::warn!("[GoRpc] cancel seq {} without pending table", args.seq);
                *reply = false;
            }
        }
        Ok(())
    }
}

impl Receiver for GoRpc {
    fn methods(set: &mut MethodSet<Self>) {
        set.add_privileged("Cancel", GoRpc::cancel);
    }
}
