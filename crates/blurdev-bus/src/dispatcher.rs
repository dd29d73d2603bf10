//! Pipe dispatcher: drains the channel and routes payloads to handlers.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::bridge::{Payload, RemoteError};
use crate::handlers::{HandlerError, HandlerRegistry};
use crate::host::Host;
use crate::protocol::{self, Command};
use crate::supervisor::Supervisor;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The other side sent an error; re-raised here.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("handler '{handler}' failed on '{command}': {source}")]
    Handler {
        handler: String,
        command: String,
        #[source]
        source: HandlerError,
    },
}

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    host: Arc<dyn Host>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, host: Arc<dyn Host>) -> Self {
        Self { registry, host }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Route every payload already queued on the supervisor's channel.
    ///
    /// Returns how many payloads were handled. Stops at the first error that
    /// has to propagate; anything still queued waits for the next tick. On
    /// the child side the parent is checked for orphaning first.
    pub fn tick(&self, supervisor: &mut Supervisor) -> Result<usize, DispatchError> {
        if supervisor.is_child() && supervisor.check_orphaned(false) {
            return Ok(0);
        }
        let mut handled = 0;
        while let Some(payload) = supervisor.poll_once() {
            self.dispatch(supervisor, payload)?;
            handled += 1;
        }
        if handled > 0 {
            tracing::trace!(handled, "Dispatch tick");
        }
        Ok(handled)
    }

    /// Route one payload.
    ///
    /// Commands run locally, errors are re-raised, anything else is answered
    /// with an invalid-handler error sent back over the channel.
    pub fn dispatch(
        &self,
        supervisor: &Supervisor,
        payload: serde_json::Value,
    ) -> Result<(), DispatchError> {
        match Payload::classify(payload) {
            Payload::Command(command) => self.run_command(&command),
            Payload::Error(err) => {
                tracing::debug!(kind = %err.kind, "Received remote error");
                Err(DispatchError::Remote(err))
            }
            Payload::Invalid(value) => {
                let err = RemoteError::invalid_handler(&value);
                tracing::error!(error = %err, "Rejecting payload");
                if !supervisor.send_error(&err) {
                    tracing::warn!("No channel to report invalid payload on");
                }
                Ok(())
            }
        }
    }

    /// Resolve and run the handler for `command`.
    pub fn run_command(&self, command: &Command) -> Result<(), DispatchError> {
        let handler = self.registry.resolve_command(command);
        tracing::debug!(
            handler = handler.name(),
            command = command.command(),
            "Running handler"
        );
        handler
            .run(self.host.as_ref())
            .map_err(|source| DispatchError::Handler {
                handler: command.handler_name().to_string(),
                command: command.command().to_string(),
                source,
            })
    }

    /// Parse a protocol URL and run it locally.
    pub fn run_url(&self, url: &str) -> Result<(), DispatchError> {
        let parsed = protocol::parse(url);
        tracing::info!(
            scheme = %parsed.scheme,
            handler = %parsed.handler_name,
            command = %parsed.command,
            "Dispatching URL"
        );
        self.run_command(&parsed.into_command())
    }

    /// Tick every `period` until the supervisor shuts down.
    ///
    /// Errors out of a tick are logged and the loop carries on. A child also
    /// reports handler failures back to its parent.
    pub async fn run(&self, supervisor: &mut Supervisor, period: Duration) {
        let shutdown = supervisor.shutdown_token();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(period = ?period, child = supervisor.is_child(), "Dispatcher running");
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = interval.tick() => {
                    if let Err(e) = self.tick(supervisor) {
                        self.report(supervisor, &e);
                    }
                }
            }
        }
        tracing::debug!("Dispatcher stopped");
    }

    fn report(&self, supervisor: &Supervisor, err: &DispatchError) {
        tracing::error!(error = %err, "Dispatch failed");
        if supervisor.is_child() && matches!(err, DispatchError::Handler { .. }) {
            supervisor.send_error(&RemoteError::handler_failed(err));
        }
    }
}
