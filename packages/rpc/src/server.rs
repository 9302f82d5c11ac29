use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use parking_lot::RwLock;

use crate::{service::split_address, AddressError, GoRpc, Receiver, RegisterError, Service, ServiceDispatch, CANCEL_SERVICE};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Log every method the catalog leaves out.
    pub report_invalid_methods: bool,
    /// Register the reserved cancellation service on construction.
    pub register_cancel_service: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            report_invalid_methods: true,
            register_cancel_service: true,
        }
    }
}

/// Map of registered services, keyed by service name.
pub struct Server {
    config: ServerConfig,
    services: RwLock<HashMap<String, Arc<dyn ServiceDispatch>>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let server = Self {
            config,
            services: RwLock::new(HashMap::new()),
        };
        if server.config.register_cancel_service {
            if let Err(err) = server.register_name(CANCEL_SERVICE, GoRpc) {
                log::error!("[Server] cannot register cancel service: {}", err);
            }
        }
        server
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn register<R: Receiver>(&self, rcvr: R) -> Result<(), RegisterError> {
        self.register_service(rcvr, "", false)
    }

    pub fn register_name<R: Receiver>(&self, name: &str, rcvr: R) -> Result<(), RegisterError> {
        self.register_service(rcvr, name, true)
    }

    fn register_service<R: Receiver>(&self, rcvr: R, name: &str, use_name: bool) -> Result<(), RegisterError> {
        let service = Service::build(rcvr, name, use_name, self.config.report_invalid_methods)?;
        let mut services = self.services.write();
        match services.entry(service.name().to_string()) {
            Entry::Occupied(entry) => Err(RegisterError::AlreadyDefined(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    pub fn service(&self, name: &str) -> Option<Arc<dyn ServiceDispatch>> {
        self.services.read().get(name).cloned()
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Finds the service and method addressed by `Service.Method`.
    pub fn resolve(&self, service_method: &str) -> Result<(Arc<dyn ServiceDispatch>, String), AddressError> {
        let (service_name, method) = split_address(service_method)?;
        let service = self.service(service_name).ok_or_else(|| AddressError::UnknownService(service_method.to_string()))?;
        if !service.has_method(method) {
            return Err(AddressError::UnknownMethod(service_method.to_string()));
        }
        Ok((service, method.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use birpc_context::Context;
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{Argument, CancelArgs, ClientConnector, MethodResult, MethodSet};

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    struct Echo;

    impl Receiver for Echo {
        fn methods(set: &mut MethodSet<Self>) {
            set.add("Ping", |_: &Echo, _ctx: Context, _client: ClientConnector, args: &Ping, reply: &mut u32| -> MethodResult {
                *reply = args.n + 1;
                Ok(())
            });
        }
    }

    #[test]
    fn cancel_service_registered_by_default() {
        let server = Server::default();
        assert_eq!(server.services(), vec![CANCEL_SERVICE.to_string()]);
        let service = server.service(CANCEL_SERVICE).expect("Should have cancel service");
        assert_eq!(service.method_names(), vec!["Cancel".to_string()]);
    }

    #[test]
    fn cancel_service_can_be_disabled() {
        let server = Server::new(ServerConfig {
            register_cancel_service: false,
            ..Default::default()
        });
        assert!(server.services().is_empty());
    }

    #[test]
    fn duplicate_registration() {
        let server = Server::default();
        server.register(Echo).unwrap();
        assert_eq!(server.register(Echo), Err(RegisterError::AlreadyDefined("Echo".to_string())));
        server.register_name("Echo2", Echo).unwrap();
        assert_eq!(server.services(), vec!["Echo".to_string(), "Echo2".to_string(), CANCEL_SERVICE.to_string()]);
    }

    #[test]
    fn resolve_addresses() {
        let server = Server::default();
        server.register(Echo).unwrap();

        let (service, method) = server.resolve("Echo.Ping").unwrap();
        assert_eq!(service.name(), "Echo");
        assert_eq!(method, "Ping");

        let mut arg = Argument::new(Ping { n: 1 });
        let mut reply = service.make_reply(&method).unwrap();
        service.invoke(&method, Context::new(), ClientConnector::none(), &mut arg, &mut reply).unwrap();
        assert_eq!(reply.downcast_ref::<u32>(), Some(&2));

        assert_eq!(server.resolve("EchoPing").err(), Some(AddressError::IllFormed("EchoPing".to_string())));
        assert_eq!(server.resolve("Nope.Ping").err(), Some(AddressError::UnknownService("Nope.Ping".to_string())));
        assert_eq!(server.resolve("Echo.Pong").err(), Some(AddressError::UnknownMethod("Echo.Pong".to_string())));
    }

    #[test]
    fn cancel_argument_is_privileged() {
        let server = Server::default();
        let service = server.service(CANCEL_SERVICE).unwrap();
        let (mut arg, _) = service.make_argument("Cancel").unwrap();
        assert!(arg.downcast_ref::<CancelArgs>().is_some());
        assert!(arg.accepts_pending().is_some());
    }
}
