//! blurdev-bus: child-process supervisor and command bus for `blurdev://` URLs.

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod host;
pub mod logging;
pub mod protocol;
pub mod supervisor;

pub use bridge::{Channel, ChannelError, Frame, Payload, RemoteError, RemoteErrorKind, SessionId};
pub use config::{BusConfig, ConfigError};
pub use dispatcher::{DispatchError, Dispatcher};
pub use handlers::{Handler, HandlerArgs, HandlerError, HandlerRegistration, HandlerRegistry, HandlerType};
pub use host::{ConsoleHost, Host, OutputStream, Tool, ToolIndex};
pub use protocol::{Command, ParsedUrl, parse};
pub use supervisor::{
    ChildHandle, LaunchArgs, Supervisor, SupervisorError, SupervisorState,
};
