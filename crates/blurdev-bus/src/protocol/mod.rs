//! blurdev protocol commands.
//!
//! - **url**: splits `blurdev://<handler>/<command>?<query>` into a [`ParsedUrl`]
//! - **command**: the immutable [`Command`] triple and its parameter values
//! - **literal**: narrow literal coercion applied to parameter values

pub mod command;
pub mod literal;
pub mod url;

pub use command::{Command, ParamMap, ParamValue, Params};
pub use url::{ParsedUrl, SCHEME, parse};
