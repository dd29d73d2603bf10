//! Protocol handlers.
//!
//! A handler is built per invocation from a command string and its params,
//! then `run()` once against a [`Host`]. Handlers are looked up by name in a
//! [`HandlerRegistry`]; unknown names degrade to [`BaseHandler`].

mod builtin;
mod registry;

use std::io;

use crate::host::Host;
use crate::protocol::ParamMap;

pub use builtin::{BaseHandler, BlurdevHandler, StdOutputHandler, TreegruntHandler};
pub use registry::{HandlerFactory, HandlerRegistration, HandlerRegistry};

#[cfg(test)]
pub(crate) use builtin::testing;

/// Construction arguments shared by every handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerArgs {
    pub command: String,
    pub params: ParamMap,
}

impl HandlerArgs {
    pub fn new(command: impl Into<String>, params: ParamMap) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }

    /// A parameter rendered as text. Lists join without separators.
    pub fn text(&self, key: &str) -> Option<String> {
        self.params.get(key).map(value_text)
    }
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => items.iter().map(value_text).collect(),
        other => other.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("missing parameter '{param}'")]
    MissingParam { param: &'static str },

    #[error("invalid parameter '{param}': {reason}")]
    InvalidParam { param: &'static str, reason: String },

    #[error("failed to launch tool '{tool}': {source}")]
    ToolLaunch {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A constructed, runnable handler.
pub trait Handler: Send {
    /// Registry key of the implementation.
    fn name(&self) -> &str;

    fn args(&self) -> &HandlerArgs;

    fn run(&self, host: &dyn Host) -> Result<(), HandlerError>;
}

/// Statically declared handler type, registrable with
/// [`HandlerRegistry::register`].
pub trait HandlerType: Handler + Sized + 'static {
    const NAME: &'static str;

    /// Whether params pass through literal coercion before construction.
    const EVALUATE_PARAMS: bool = true;

    fn new(args: HandlerArgs) -> Self;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_renders_scalars_and_lists() {
        let mut params = ParamMap::new();
        params.insert("msg".into(), json!("hello"));
        params.insert("parts".into(), json!(["a", "b", 3]));
        params.insert("n".into(), json!(5));
        let args = HandlerArgs::new("write", params);

        assert_eq!(args.text("msg").as_deref(), Some("hello"));
        assert_eq!(args.text("parts").as_deref(), Some("ab3"));
        assert_eq!(args.text("n").as_deref(), Some("5"));
        assert_eq!(args.text("missing"), None);
    }
}
