use thiserror::Error;

/// Error kind every RPC method returns.
pub type MethodError = Box<dyn std::error::Error + Send + Sync>;
pub type MethodResult = Result<(), MethodError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    #[error("rpc.Register: no service name for type {0}")]
    NoServiceName(String),
    #[error("rpc.Register: type {0} is not exported")]
    NotExported(String),
    #[error("rpc.Register: type {name} has no exported methods of suitable type{}", hint_suffix(.hint))]
    NoSuitableMethods { name: String, hint: bool },
    #[error("rpc: service already defined: {0}")]
    AlreadyDefined(String),
}

fn hint_suffix(hint: &bool) -> &'static str {
    if *hint {
        " (hint: wrap the receiver in a Mutex to expose its &mut self methods)"
    } else {
        ""
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("rpc: service/method request ill-formed: {0}")]
    IllFormed(String),
    #[error("rpc: can't find service {0}")]
    UnknownService(String),
    #[error("rpc: can't find method {0}")]
    UnknownMethod(String),
}

/// Failures around argument and reply holders.
#[derive(Error, Debug)]
pub enum HolderError {
    #[error("rpc: method {method} expects argument of type {expected}")]
    ArgumentType { method: String, expected: &'static str },
    #[error("rpc: method {method} expects reply of type {expected}")]
    ReplyType { method: String, expected: &'static str },
    #[error("rpc: method {0} does not follow the calling convention")]
    Convention(String),
    #[error("rpc: cannot decode {expected}: {source}")]
    Decode { expected: &'static str, source: bincode::Error },
    #[error("rpc: cannot encode {expected}: {source}")]
    Encode { expected: &'static str, source: bincode::Error },
}

#[derive(Error, Debug)]
pub enum CallError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Holder(#[from] HolderError),
    /// The method's own error, untouched.
    #[error("{0}")]
    Method(MethodError),
}

impl CallError {
    pub fn into_method_error(self) -> Option<MethodError> {
        match self {
            CallError::Method(err) => Some(err),
            _ => None,
        }
    }
}

/// Reason a candidate method was left out of a service's catalog.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Exclusion {
    #[error("method {0:?} is not exported")]
    NotExported(String),
    #[error("method {method:?} has {count} input parameters; needs exactly five")]
    ParamCount { method: String, count: usize },
    #[error("context type of method {method:?} is {found:?}, must be Context")]
    ContextType { method: String, found: &'static str },
    #[error("client type of method {method:?} is {found:?}, must be ClientConnector")]
    ClientType { method: String, found: &'static str },
    #[error("argument type of method {method:?} is not exported: {found:?}")]
    ArgNotExported { method: String, found: &'static str },
    #[error("reply type of method {method:?} is not a pointer: {found:?}")]
    ReplyNotPointer { method: String, found: &'static str },
    #[error("reply type of method {method:?} is not exported: {found:?}")]
    ReplyNotExported { method: String, found: &'static str },
    #[error("method {method:?} has {count} output parameters; needs exactly one")]
    ResultCount { method: String, count: usize },
    #[error("return type of method {method:?} is {found:?}, must be MethodResult")]
    ResultType { method: String, found: &'static str },
    #[error("method {0:?} is declared without implementation")]
    NotImplemented(String),
}

impl Exclusion {
    /// Unexported methods are skipped without a diagnostic.
    pub fn is_reported(&self) -> bool {
        !matches!(self, Exclusion::NotExported(_))
    }
}
