mod capability;
mod client;
mod dispatch;
mod error;
mod method;
pub mod mock;
mod server;
mod service;
mod svc;
mod value;

pub use birpc_context::{Canceled, Context, PendingRequests, PendingTable, WaitGroup, WaitGuard};
pub use capability::{capabilities, is_exported, is_exported_or_builtin, short_name, Capabilities, Shape, TypeInfo};
pub use client::ClientConnector;
pub use dispatch::{Connection, InboundRequest, PreparedCall, Request, ServerTransport};
pub use error::{AddressError, CallError, Exclusion, HolderError, MethodError, MethodResult, RegisterError};
pub use method::{check, Candidate, ExclusiveInvoke, Invoker, MethodSet, MethodType, Receiver, ReceiverKind, SharedInvoke, Signature};
pub use server::{Server, ServerConfig};
pub use service::{split_address, Service, ServiceDispatch};
pub use svc::{AcceptsPending, CancelArgs, GoRpc, CANCEL_SERVICE};
pub use value::{Argument, Factory, Message, Reply};
