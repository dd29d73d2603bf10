//! Name to handler-factory registry.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::protocol::command::prepare_params;
use crate::protocol::{Command, Params};

use super::{BaseHandler, BlurdevHandler, Handler, HandlerArgs, HandlerType};
use super::{StdOutputHandler, TreegruntHandler};

pub type HandlerFactory = Arc<dyn Fn(HandlerArgs) -> Box<dyn Handler> + Send + Sync>;

/// One registry entry.
#[derive(Clone)]
pub struct HandlerRegistration {
    name: String,
    evaluate_params: bool,
    factory: HandlerFactory,
}

impl HandlerRegistration {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(HandlerArgs) -> Box<dyn Handler> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            evaluate_params: true,
            factory: Arc::new(factory),
        }
    }

    /// Registration for a statically declared handler type.
    pub fn of<T: HandlerType>() -> Self {
        Self {
            name: T::NAME.to_string(),
            evaluate_params: T::EVALUATE_PARAMS,
            factory: Arc::new(|args| Box::new(T::new(args))),
        }
    }

    /// Hand params to the handler exactly as received.
    pub fn without_param_evaluation(mut self) -> Self {
        self.evaluate_params = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluates_params(&self) -> bool {
        self.evaluate_params
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("name", &self.name)
            .field("evaluate_params", &self.evaluate_params)
            .finish_non_exhaustive()
    }
}

/// Process-wide handler table.
///
/// Registration goes through `&self`, so plugins can add handlers after the
/// registry has been shared.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, HandlerRegistration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in handlers.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register::<TreegruntHandler>();
        registry.register::<BlurdevHandler>();
        registry.register::<StdOutputHandler>();
        registry
    }

    /// Register `T` under its declared name. Returns the entry it replaced.
    pub fn register<T: HandlerType>(&self) -> Option<HandlerRegistration> {
        self.register_factory(HandlerRegistration::of::<T>())
    }

    pub fn register_factory(&self, registration: HandlerRegistration) -> Option<HandlerRegistration> {
        tracing::debug!(
            handler = %registration.name,
            evaluate_params = registration.evaluate_params,
            "Registering handler"
        );
        let previous = self
            .handlers
            .insert(registration.name.clone(), registration);
        if let Some(ref old) = previous {
            tracing::warn!(handler = %old.name, "Replaced existing handler registration");
        }
        previous
    }

    pub fn unregister(&self, name: &str) -> Option<HandlerRegistration> {
        self.handlers.remove(name).map(|(_, registration)| registration)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Build the handler for `name`, or the fallback when nothing is registered.
    pub fn resolve(&self, name: &str, command: &str, params: &Params) -> Box<dyn Handler> {
        // Clone out of the map so the shard lock is not held while constructing.
        let registration = self.handlers.get(name).map(|entry| entry.value().clone());
        match registration {
            Some(registration) => {
                let args = HandlerArgs::new(
                    command,
                    prepare_params(params, registration.evaluate_params),
                );
                (registration.factory)(args)
            }
            None => {
                tracing::debug!(handler = name, command, "No handler registered, using fallback");
                let args = HandlerArgs::new(command, prepare_params(params, true));
                Box::new(BaseHandler::unresolved(name, args))
            }
        }
    }

    pub fn resolve_command(&self, command: &Command) -> Box<dyn Handler> {
        self.resolve(command.handler_name(), command.command(), command.params())
    }
}
