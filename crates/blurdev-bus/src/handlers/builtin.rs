//! Handlers shipped with the bus.

use crate::host::{Host, OutputStream};

use super::{Handler, HandlerArgs, HandlerError, HandlerType};

/// Fallback for names nothing is registered under. Only logs its inputs.
#[derive(Debug, Clone)]
pub struct BaseHandler {
    requested: String,
    args: HandlerArgs,
}

impl BaseHandler {
    pub const NAME: &'static str = "base";

    /// Fallback for a lookup of `requested` that found nothing.
    pub fn unresolved(requested: impl Into<String>, args: HandlerArgs) -> Self {
        Self {
            requested: requested.into(),
            args,
        }
    }

    pub fn requested(&self) -> &str {
        &self.requested
    }
}

impl Handler for BaseHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn args(&self) -> &HandlerArgs {
        &self.args
    }

    fn run(&self, _host: &dyn Host) -> Result<(), HandlerError> {
        tracing::info!(
            handler = %self.requested,
            command = %self.args.command,
            params = %serde_json::Value::Object(self.args.params.clone()),
            "No handler registered, ignoring command"
        );
        Ok(())
    }
}

/// Launches the tool named by the command.
#[derive(Debug, Clone)]
pub struct TreegruntHandler {
    args: HandlerArgs,
}

impl HandlerType for TreegruntHandler {
    const NAME: &'static str = "treegrunt";

    fn new(args: HandlerArgs) -> Self {
        Self { args }
    }
}

impl Handler for TreegruntHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn args(&self) -> &HandlerArgs {
        &self.args
    }

    fn run(&self, host: &dyn Host) -> Result<(), HandlerError> {
        let Some(tool) = host.find_tool(&self.args.command) else {
            tracing::warn!(tool = %self.args.command, "Tool not found");
            return Ok(());
        };
        tracing::debug!(tool = tool.name(), "Running tool");
        tool.run().map_err(|source| HandlerError::ToolLaunch {
            tool: tool.name().to_string(),
            source,
        })
    }
}

/// `showLogger` / `showTreegrunt`.
#[derive(Debug, Clone)]
pub struct BlurdevHandler {
    args: HandlerArgs,
}

impl HandlerType for BlurdevHandler {
    const NAME: &'static str = "blurdev";

    fn new(args: HandlerArgs) -> Self {
        Self { args }
    }
}

impl Handler for BlurdevHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn args(&self) -> &HandlerArgs {
        &self.args
    }

    fn run(&self, host: &dyn Host) -> Result<(), HandlerError> {
        match self.args.command.as_str() {
            "showLogger" => host.show_logger(),
            "showTreegrunt" => host.show_treegrunt(),
            other => tracing::warn!(command = other, "Unknown blurdev command"),
        }
        Ok(())
    }
}

/// Writes `msg` to the stream named by `pipe` (stdout when absent).
///
/// Params are passed through untouched so the message text is exactly what
/// was sent.
#[derive(Debug, Clone)]
pub struct StdOutputHandler {
    args: HandlerArgs,
}

impl HandlerType for StdOutputHandler {
    const NAME: &'static str = "stdoutput";
    const EVALUATE_PARAMS: bool = false;

    fn new(args: HandlerArgs) -> Self {
        Self { args }
    }
}

impl Handler for StdOutputHandler {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn args(&self) -> &HandlerArgs {
        &self.args
    }

    fn run(&self, host: &dyn Host) -> Result<(), HandlerError> {
        let msg = self
            .args
            .text("msg")
            .ok_or(HandlerError::MissingParam { param: "msg" })?;
        let stream = match self.args.text("pipe") {
            Some(pipe) => pipe
                .parse::<OutputStream>()
                .map_err(|reason| HandlerError::InvalidParam {
                    param: "pipe",
                    reason,
                })?,
            None => OutputStream::default(),
        };
        host.write_output(stream, &msg)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::io;
    use std::sync::{Arc, Mutex};

    use crate::host::{Host, OutputStream, Tool};

    /// Host that records every call.
    #[derive(Default)]
    pub struct RecordingHost {
        events: Arc<Mutex<Vec<String>>>,
        tools: Vec<String>,
        failing_tools: bool,
    }

    impl RecordingHost {
        pub fn with_tools(tools: &[&str]) -> Self {
            Self {
                tools: tools.iter().map(|t| t.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn with_failing_tools(mut self) -> Self {
            self.failing_tools = true;
            self
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn record(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct RecordedTool {
        name: String,
        fail: bool,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Tool for RecordedTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn run(&self) -> io::Result<()> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
            }
            self.events.lock().unwrap().push(format!("run:{}", self.name));
            Ok(())
        }
    }

    impl Host for RecordingHost {
        fn find_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
            self.record(format!("find:{name}"));
            if !self.tools.iter().any(|t| t == name) {
                return None;
            }
            Some(Arc::new(RecordedTool {
                name: name.to_string(),
                fail: self.failing_tools,
                events: Arc::clone(&self.events),
            }))
        }

        fn show_logger(&self) {
            self.record("show_logger".to_string());
        }

        fn show_treegrunt(&self) {
            self.record("show_treegrunt".to_string());
        }

        fn set_active_app_name(&self, name: &str) {
            self.record(format!("app:{name}"));
        }

        fn write_output(&self, stream: OutputStream, text: &str) -> io::Result<()> {
            self.record(format!("{stream:?}:{text}"));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::testing::RecordingHost;
    use super::*;
    use crate::protocol::ParamMap;

    fn args(command: &str, params: serde_json::Value) -> HandlerArgs {
        let params: ParamMap = match params {
            serde_json::Value::Object(map) => map,
            _ => ParamMap::new(),
        };
        HandlerArgs::new(command, params)
    }

    #[test]
    fn base_handler_only_logs() {
        let host = RecordingHost::default();
        let handler = BaseHandler::unresolved("nobody", args("anything", json!({"a": 1})));
        handler.run(&host).unwrap();
        assert_eq!(handler.name(), "base");
        assert_eq!(handler.requested(), "nobody");
        assert!(host.events().is_empty());
    }

    #[test]
    fn treegrunt_runs_found_tool() {
        let host = RecordingHost::with_tools(&["wtf"]);
        TreegruntHandler::new(args("wtf", json!({}))).run(&host).unwrap();
        assert_eq!(host.events(), vec!["find:wtf", "run:wtf"]);
    }

    #[test]
    fn treegrunt_missing_tool_is_not_an_error() {
        let host = RecordingHost::default();
        TreegruntHandler::new(args("DailyTool", json!({})))
            .run(&host)
            .unwrap();
        assert_eq!(host.events(), vec!["find:DailyTool"]);
    }

    #[test]
    fn treegrunt_launch_failure_propagates() {
        let host = RecordingHost::with_tools(&["wtf"]).with_failing_tools();
        let err = TreegruntHandler::new(args("wtf", json!({})))
            .run(&host)
            .unwrap_err();
        assert!(matches!(err, HandlerError::ToolLaunch { ref tool, .. } if tool == "wtf"));
    }

    #[test]
    fn blurdev_shows_surfaces() {
        let host = RecordingHost::default();
        BlurdevHandler::new(args("showLogger", json!({}))).run(&host).unwrap();
        BlurdevHandler::new(args("showTreegrunt", json!({}))).run(&host).unwrap();
        BlurdevHandler::new(args("showNothing", json!({}))).run(&host).unwrap();
        assert_eq!(host.events(), vec!["show_logger", "show_treegrunt"]);
    }

    #[test]
    fn stdoutput_writes_to_named_stream() {
        let host = RecordingHost::default();
        StdOutputHandler::new(args("write", json!({"msg": "hello\n"})))
            .run(&host)
            .unwrap();
        StdOutputHandler::new(args("write", json!({"msg": "oops", "pipe": "stderr"})))
            .run(&host)
            .unwrap();
        assert_eq!(host.events(), vec!["Stdout:hello\n", "Stderr:oops"]);
    }

    #[test]
    fn stdoutput_validates_params() {
        let host = RecordingHost::default();
        let missing = StdOutputHandler::new(args("write", json!({}))).run(&host);
        assert!(matches!(missing, Err(HandlerError::MissingParam { param: "msg" })));

        let bad_pipe = StdOutputHandler::new(args("write", json!({"msg": "x", "pipe": "stdin"})))
            .run(&host);
        assert!(matches!(bad_pipe, Err(HandlerError::InvalidParam { param: "pipe", .. })));
        assert!(host.events().is_empty());
    }
}
