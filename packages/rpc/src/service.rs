use std::{any::type_name, collections::HashMap, sync::Arc};

use birpc_context::Context;

use crate::{
    capability::is_exported,
    method::{has_exclusive_methods, suitable_methods, MethodType},
    AddressError, Argument, CallError, ClientConnector, Message, MethodSet, Receiver, RegisterError, Reply,
};

/// Splits `Service.Method` on the last dot.
pub fn split_address(service_method: &str) -> Result<(&str, &str), AddressError> {
    service_method.rsplit_once('.').ok_or_else(|| AddressError::IllFormed(service_method.to_string()))
}

/// A registered receiver together with its method catalog.
pub struct Service<R: Receiver> {
    name: String,
    rcvr: R,
    methods: HashMap<String, Arc<MethodType<R>>>,
}

impl<R: Receiver> Service<R> {
    /// Registers `rcvr` under its type name, or under `name` when `use_name` is set.
    pub fn new(rcvr: R, name: &str, use_name: bool) -> Result<Self, RegisterError> {
        Self::build(rcvr, name, use_name, true)
    }

    /// Same as [`Service::new`]; `report_err` controls the diagnostics for excluded methods.
    pub fn build(rcvr: R, name: &str, use_name: bool, report_err: bool) -> Result<Self, RegisterError> {
        let sname = if use_name { name } else { R::type_name() };
        if sname.is_empty() {
            return Err(RegisterError::NoServiceName(type_name::<R>().to_string()));
        }
        if !use_name && !is_exported(sname) {
            return Err(RegisterError::NotExported(sname.to_string()));
        }

        let mut set = MethodSet::new();
        R::methods(&mut set);
        let methods = suitable_methods(&set, report_err);
        if methods.is_empty() {
            return Err(RegisterError::NoSuitableMethods {
                name: sname.to_string(),
                hint: has_exclusive_methods(&set),
            });
        }

        log::info!("[Service] register {} with {} methods", sname, methods.len());
        Ok(Self {
            name: sname.to_string(),
            rcvr,
            methods,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn receiver(&self) -> &R {
        &self.rcvr
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn lookup(&self, service_method: &str) -> Result<&Arc<MethodType<R>>, AddressError> {
        let (service, method) = split_address(service_method)?;
        if service != self.name {
            return Err(AddressError::UnknownService(service_method.to_string()));
        }
        self.methods.get(method).ok_or_else(|| AddressError::UnknownMethod(service_method.to_string()))
    }

    /// Calls a method synchronously on the caller's thread. The method's own error is returned as is,
    /// and the pending table is not involved.
    pub fn call<A: Message, P: Message>(&self, ctx: Context, client: ClientConnector, service_method: &str, args: A, reply: &mut P) -> Result<(), CallError> {
        let mtype = self.lookup(service_method)?;
        let mut argument = Argument::new(args);
        let mut holder = Reply::new(std::mem::take(reply));
        let res = mtype.invoke(&self.rcvr, ctx, client, &mut argument, &mut holder);
        if let Some(value) = holder.take::<P>() {
            *reply = value;
        }
        res?.map_err(CallError::Method)
    }
}

/// Type-erased view of a [`Service`] used by the server map and the dispatcher.
pub trait ServiceDispatch: Send + Sync {
    fn name(&self) -> &str;
    fn method_names(&self) -> Vec<String>;
    fn has_method(&self, method: &str) -> bool;
    fn make_argument(&self, method: &str) -> Result<(Argument, bool), AddressError>;
    fn make_reply(&self, method: &str) -> Result<Reply, AddressError>;
    fn invoke(&self, method: &str, ctx: Context, client: ClientConnector, arg: &mut Argument, reply: &mut Reply) -> Result<(), CallError>;
}

impl<R: Receiver> Service<R> {
    fn method_or_err(&self, method: &str) -> Result<&Arc<MethodType<R>>, AddressError> {
        self.methods.get(method).ok_or_else(|| AddressError::UnknownMethod(format!("{}.{}", self.name, method)))
    }
}

impl<R: Receiver> ServiceDispatch for Service<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn method_names(&self) -> Vec<String> {
        Service::method_names(self)
    }

    fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn make_argument(&self, method: &str) -> Result<(Argument, bool), AddressError> {
        Ok(self.method_or_err(method)?.make_argument())
    }

    fn make_reply(&self, method: &str) -> Result<Reply, AddressError> {
        Ok(self.method_or_err(method)?.make_reply())
    }

    fn invoke(&self, method: &str, ctx: Context, client: ClientConnector, arg: &mut Argument, reply: &mut Reply) -> Result<(), CallError> {
        let mtype = self.method_or_err(method)?;
        mtype.invoke(&self.rcvr, ctx, client, arg, reply)?.map_err(CallError::Method)
    }
}
