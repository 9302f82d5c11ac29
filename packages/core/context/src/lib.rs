mod context;
mod pending;
mod wait_group;

pub use context::{Canceled, Context};
pub use pending::{MockPendingRequests, PendingRequests, PendingTable};
pub use wait_group::{WaitGroup, WaitGuard};
