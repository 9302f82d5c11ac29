use std::collections::HashMap;

use parking_lot::Mutex;

use crate::Context;

/// Table of in-flight calls keyed by transport sequence number.
///
/// Implementations are shared by every concurrently dispatched call and must synchronize internally.
#[mockall::automock]
pub trait PendingRequests: Send + Sync {
    /// Registers `seq` and returns its token. Registering a sequence number that is still pending
    /// returns the live token.
    fn start(&self, seq: u64) -> Context;
    /// Cancels and forgets `seq`. Unknown or already canceled sequence numbers are ignored.
    fn cancel(&self, seq: u64);
}

#[derive(Default)]
pub struct PendingTable {
    cancel: Mutex<HashMap<u64, Context>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cancel.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cancel.lock().is_empty()
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.cancel.lock().contains_key(&seq)
    }
}

impl PendingRequests for PendingTable {
    fn start(&self, seq: u64) -> Context {
        let mut cancel = self.cancel.lock();
        if let Some(ctx) = cancel.get(&seq) {
            log::warn!("[PendingTable] seq {} already pending, reuse its context", seq);
            return ctx.clone();
        }
        let ctx = Context::new();
        cancel.insert(seq, ctx.clone());
        ctx
    }

    fn cancel(&self, seq: u64) {
        // token is canceled outside the table lock
        let ctx = self.cancel.lock().remove(&seq);
        match ctx {
            Some(ctx) => {
                ctx.cancel();
            }
            None => {
                log::debug!("[PendingTable] cancel unknown seq {}", seq);
            }
        }
    }
}
