use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use birpc_context::Context;
use parking_lot::Mutex;

use crate::{
    capability::{capabilities, is_exported, is_exported_or_builtin, short_name, Shape, TypeInfo},
    AcceptsPending, Argument, ClientConnector, Exclusion, Factory, HolderError, Message, MethodResult, Reply,
};

pub type SharedInvoke<R> = Arc<dyn Fn(&R, Context, ClientConnector, &mut Argument, &mut Reply) -> Result<MethodResult, HolderError> + Send + Sync>;
pub type ExclusiveInvoke<R> = Arc<dyn Fn(&mut R, Context, ClientConnector, &mut Argument, &mut Reply) -> Result<MethodResult, HolderError> + Send + Sync>;

/// A type whose methods can be served over RPC.
pub trait Receiver: Sized + Send + Sync + 'static {
    /// Default service name.
    fn type_name() -> &'static str {
        short_name(type_name::<Self>())
    }

    /// Lists every candidate method; the catalog keeps the ones that follow the calling convention.
    fn methods(set: &mut MethodSet<Self>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverKind {
    /// `&self`, callable on a value receiver.
    Shared,
    /// `&mut self`, only reachable through a `Mutex` receiver.
    Exclusive,
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub receiver: ReceiverKind,
    /// Receiver first, then context, client, argument and reply.
    pub inputs: Vec<TypeInfo>,
    pub outputs: Vec<TypeInfo>,
}

impl Signature {
    fn of<R: 'static, X1: 'static, X2: 'static, Ret: 'static>(receiver: ReceiverKind, argument: TypeInfo, reply: TypeInfo) -> Self {
        let outputs = if TypeId::of::<Ret>() == TypeId::of::<()>() {
            vec![]
        } else {
            vec![TypeInfo::value::<Ret>()]
        };
        Self {
            receiver,
            inputs: vec![TypeInfo::pointer::<R>(), TypeInfo::value::<X1>(), TypeInfo::value::<X2>(), argument, reply],
            outputs,
        }
    }
}

pub enum Invoker<R> {
    Shared(SharedInvoke<R>),
    Exclusive(ExclusiveInvoke<R>),
    Declared,
}

impl<R> Clone for Invoker<R> {
    fn clone(&self) -> Self {
        match self {
            Invoker::Shared(f) => Invoker::Shared(f.clone()),
            Invoker::Exclusive(f) => Invoker::Exclusive(f.clone()),
            Invoker::Declared => Invoker::Declared,
        }
    }
}

pub struct Candidate<R> {
    pub name: String,
    pub signature: Signature,
    pub invoker: Invoker<R>,
    factory: Option<Factory>,
}

impl<R: Send + Sync + 'static> Candidate<R> {
    fn lift(self) -> Candidate<Mutex<R>> {
        let invoker = match self.invoker {
            Invoker::Shared(f) => {
                let lifted: SharedInvoke<Mutex<R>> = Arc::new(move |rcvr: &Mutex<R>, ctx: Context, client: ClientConnector, arg: &mut Argument, reply: &mut Reply| f(&*rcvr.lock(), ctx, client, arg, reply));
                Invoker::Shared(lifted)
            }
            Invoker::Exclusive(f) => {
                let lifted: SharedInvoke<Mutex<R>> = Arc::new(move |rcvr: &Mutex<R>, ctx: Context, client: ClientConnector, arg: &mut Argument, reply: &mut Reply| f(&mut *rcvr.lock(), ctx, client, arg, reply));
                Invoker::Shared(lifted)
            }
            Invoker::Declared => Invoker::Declared,
        };
        let mut signature = self.signature;
        signature.receiver = ReceiverKind::Shared;
        Candidate {
            name: self.name,
            signature,
            invoker,
            factory: self.factory,
        }
    }
}

fn cast<T: 'static>(value: impl Any) -> Option<T> {
    let boxed: Box<dyn Any> = Box::new(value);
    boxed.downcast::<T>().ok().map(|value| *value)
}

fn special_params<X1: 'static, X2: 'static>(method: &str, ctx: Context, client: ClientConnector) -> Result<(X1, X2), HolderError> {
    match (cast::<X1>(ctx), cast::<X2>(client)) {
        (Some(x1), Some(x2)) => Ok((x1, x2)),
        _ => Err(HolderError::Convention(method.to_string())),
    }
}

fn method_result<Ret: 'static>(method: &str, ret: Ret) -> Result<MethodResult, HolderError> {
    cast::<MethodResult>(ret).ok_or_else(|| HolderError::Convention(method.to_string()))
}

fn argument_ref<'a, A: Any>(method: &str, arg: &'a mut Argument) -> Result<&'a mut A, HolderError> {
    arg.downcast_mut::<A>().ok_or_else(|| HolderError::ArgumentType {
        method: method.to_string(),
        expected: type_name::<A>(),
    })
}

fn reply_ref<'a, P: Any>(method: &str, reply: &'a mut Reply) -> Result<&'a mut P, HolderError> {
    reply.downcast_mut::<P>().ok_or_else(|| HolderError::ReplyType {
        method: method.to_string(),
        expected: type_name::<P>(),
    })
}

/// Candidate methods of a receiver, in declaration order.
///
/// The context, client and return types are free so a receiver may list methods that do not follow
/// the calling convention; those are dropped when the catalog is built.
pub struct MethodSet<R> {
    candidates: Vec<Candidate<R>>,
}

impl<R> Default for MethodSet<R> {
    fn default() -> Self {
        Self { candidates: vec![] }
    }
}

impl<R: Send + Sync + 'static> MethodSet<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candidates(&self) -> &[Candidate<R>] {
        &self.candidates
    }

    /// Method taking its argument by reference.
    pub fn add<X1, X2, A, P, Ret, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        X1: 'static,
        X2: 'static,
        A: Message,
        P: Message,
        Ret: 'static,
        F: Fn(&R, X1, X2, &A, &mut P) -> Ret + Send + Sync + 'static,
    {
        let method = name.to_string();
        self.push_shared::<X1, X2, Ret, _>(name, TypeInfo::pointer::<A>(), TypeInfo::pointer::<P>(), Factory::pointer::<A, P>(), move |rcvr, x1, x2, arg, reply| -> Result<Ret, HolderError> {
            let arg: &A = argument_ref::<A>(&method, arg)?;
            let reply = reply_ref::<P>(&method, reply)?;
            Ok(f(rcvr, x1, x2, arg, reply))
        })
    }

    /// Method taking its argument by value.
    pub fn add_value<X1, X2, A, P, Ret, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        X1: 'static,
        X2: 'static,
        A: Message,
        P: Message,
        Ret: 'static,
        F: Fn(&R, X1, X2, A, &mut P) -> Ret + Send + Sync + 'static,
    {
        let method = name.to_string();
        self.push_shared::<X1, X2, Ret, _>(name, TypeInfo::value::<A>(), TypeInfo::pointer::<P>(), Factory::value::<A, P>(), move |rcvr, x1, x2, arg, reply| -> Result<Ret, HolderError> {
            let arg = std::mem::take(argument_ref::<A>(&method, arg)?);
            let reply = reply_ref::<P>(&method, reply)?;
            Ok(f(rcvr, x1, x2, arg, reply))
        })
    }

    /// Method that needs exclusive access to the receiver.
    pub fn add_mut<X1, X2, A, P, Ret, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        X1: 'static,
        X2: 'static,
        A: Message,
        P: Message,
        Ret: 'static,
        F: Fn(&mut R, X1, X2, &A, &mut P) -> Ret + Send + Sync + 'static,
    {
        let method = name.to_string();
        let invoke: ExclusiveInvoke<R> = Arc::new(move |rcvr: &mut R, ctx: Context, client: ClientConnector, arg: &mut Argument, reply: &mut Reply| -> Result<MethodResult, HolderError> {
            let (x1, x2) = special_params::<X1, X2>(&method, ctx, client)?;
            let arg: &A = argument_ref::<A>(&method, arg)?;
            let reply = reply_ref::<P>(&method, reply)?;
            method_result(&method, f(rcvr, x1, x2, arg, reply))
        });
        self.candidates.push(Candidate {
            name: name.to_string(),
            signature: Signature::of::<R, X1, X2, Ret>(ReceiverKind::Exclusive, TypeInfo::pointer::<A>(), TypeInfo::pointer::<P>()),
            invoker: Invoker::Exclusive(invoke),
            factory: Some(Factory::pointer::<A, P>()),
        });
        self
    }

    /// Method whose argument may receive the pending request table before it runs.
    pub fn add_privileged<X1, X2, A, P, Ret, F>(&mut self, name: &str, f: F) -> &mut Self
    where
        X1: 'static,
        X2: 'static,
        A: Message + AcceptsPending,
        P: Message,
        Ret: 'static,
        F: Fn(&R, X1, X2, &A, &mut P) -> Ret + Send + Sync + 'static,
    {
        let method = name.to_string();
        self.push_shared::<X1, X2, Ret, _>(name, TypeInfo::pointer::<A>(), TypeInfo::pointer::<P>(), Factory::privileged::<A, P>(), move |rcvr, x1, x2, arg, reply| -> Result<Ret, HolderError> {
            let arg: &A = argument_ref::<A>(&method, arg)?;
            let reply = reply_ref::<P>(&method, reply)?;
            Ok(f(rcvr, x1, x2, arg, reply))
        })
    }

    /// Method known only by its signature. It is never dispatchable.
    pub fn declare(&mut self, name: &str, signature: Signature) -> &mut Self {
        self.candidates.push(Candidate {
            name: name.to_string(),
            signature,
            invoker: Invoker::Declared,
            factory: None,
        });
        self
    }

    fn push_shared<X1, X2, Ret, C>(&mut self, name: &str, argument: TypeInfo, reply: TypeInfo, factory: Factory, call: C) -> &mut Self
    where
        X1: 'static,
        X2: 'static,
        Ret: 'static,
        C: Fn(&R, X1, X2, &mut Argument, &mut Reply) -> Result<Ret, HolderError> + Send + Sync + 'static,
    {
        let method = name.to_string();
        let invoke: SharedInvoke<R> = Arc::new(move |rcvr: &R, ctx: Context, client: ClientConnector, arg: &mut Argument, reply: &mut Reply| -> Result<MethodResult, HolderError> {
            let (x1, x2) = special_params::<X1, X2>(&method, ctx, client)?;
            let ret = call(rcvr, x1, x2, arg, reply)?;
            method_result(&method, ret)
        });
        self.candidates.push(Candidate {
            name: name.to_string(),
            signature: Signature::of::<R, X1, X2, Ret>(ReceiverKind::Shared, argument, reply),
            invoker: Invoker::Shared(invoke),
            factory: Some(factory),
        });
        self
    }
}

/// A receiver behind a mutex exposes both its `&self` and `&mut self` methods.
impl<R: Receiver> Receiver for Mutex<R> {
    fn type_name() -> &'static str {
        R::type_name()
    }

    fn methods(set: &mut MethodSet<Self>) {
        let mut inner = MethodSet::<R>::new();
        R::methods(&mut inner);
        set.candidates.extend(inner.candidates.into_iter().map(Candidate::lift));
    }
}

/// Validated method of a service.
pub struct MethodType<R> {
    name: String,
    arg_type: TypeInfo,
    reply_type: TypeInfo,
    invoke: SharedInvoke<R>,
    factory: Factory,
}

impl<R> MethodType<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_type(&self) -> TypeInfo {
        self.arg_type
    }

    pub fn reply_type(&self) -> TypeInfo {
        self.reply_type
    }

    /// Zero argument holder, and whether the method takes it by value.
    pub fn make_argument(&self) -> (Argument, bool) {
        self.factory.make_argument()
    }

    pub fn make_reply(&self) -> Reply {
        self.factory.make_reply()
    }

    pub fn invoke(&self, rcvr: &R, ctx: Context, client: ClientConnector, arg: &mut Argument, reply: &mut Reply) -> Result<MethodResult, HolderError> {
        (self.invoke)(rcvr, ctx, client, arg, reply)
    }
}

/// Checks one candidate against the calling convention.
pub fn check<R>(candidate: &Candidate<R>) -> Result<(), Exclusion> {
    let caps = capabilities();
    let method = &candidate.name;
    let signature = &candidate.signature;
    if !is_exported(method) {
        return Err(Exclusion::NotExported(method.clone()));
    }
    if signature.inputs.len() != 5 {
        return Err(Exclusion::ParamCount {
            method: method.clone(),
            count: signature.inputs.len(),
        });
    }
    let ctx_type = &signature.inputs[1];
    if !ctx_type.is(&caps.context) {
        return Err(Exclusion::ContextType {
            method: method.clone(),
            found: ctx_type.name(),
        });
    }
    let client_type = &signature.inputs[2];
    if !client_type.is(&caps.client) {
        return Err(Exclusion::ClientType {
            method: method.clone(),
            found: client_type.name(),
        });
    }
    let arg_type = &signature.inputs[3];
    if !is_exported_or_builtin(arg_type) {
        return Err(Exclusion::ArgNotExported {
            method: method.clone(),
            found: arg_type.name(),
        });
    }
    let reply_type = &signature.inputs[4];
    if reply_type.shape() != Shape::Pointer {
        return Err(Exclusion::ReplyNotPointer {
            method: method.clone(),
            found: reply_type.name(),
        });
    }
    if !is_exported_or_builtin(reply_type) {
        return Err(Exclusion::ReplyNotExported {
            method: method.clone(),
            found: reply_type.name(),
        });
    }
    if signature.outputs.len() != 1 {
        return Err(Exclusion::ResultCount {
            method: method.clone(),
            count: signature.outputs.len(),
        });
    }
    let return_type = &signature.outputs[0];
    if !return_type.is(&caps.error) {
        return Err(Exclusion::ResultType {
            method: method.clone(),
            found: return_type.name(),
        });
    }
    if matches!(candidate.invoker, Invoker::Declared) || candidate.factory.is_none() {
        return Err(Exclusion::NotImplemented(method.clone()));
    }
    Ok(())
}

/// Builds the method catalog from the `&self` candidates of `set`.
pub fn suitable_methods<R>(set: &MethodSet<R>, report_err: bool) -> HashMap<String, Arc<MethodType<R>>> {
    let mut methods = HashMap::new();
    for candidate in &set.candidates {
        if let Err(reason) = check(candidate) {
            if report_err && reason.is_reported() {
                log::warn!("[Catalog] rpc.Register: {}", reason);
            }
            continue;
        }
        if let (Invoker::Shared(invoke), Some(factory)) = (&candidate.invoker, candidate.factory) {
            let signature = &candidate.signature;
            methods.insert(
                candidate.name.clone(),
                Arc::new(MethodType {
                    name: candidate.name.clone(),
                    arg_type: signature.inputs[3],
                    reply_type: signature.inputs[4],
                    invoke: invoke.clone(),
                    factory,
                }),
            );
        }
    }
    methods
}

/// True if conforming methods exist among the `&mut self` candidates, i.e. the receiver would have
/// methods when registered behind a mutex.
pub fn has_exclusive_methods<R>(set: &MethodSet<R>) -> bool {
    set.candidates.iter().any(|candidate| matches!(candidate.invoker, Invoker::Exclusive(_)) && check(candidate).is_ok())
}
