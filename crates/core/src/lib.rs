//! Live Relay Core
//!
//! Provider-neutral building blocks for relaying a browser audio stream to a
//! hosted live conversational session:
//!
//! - `live`: the upstream session capability (traits) and its message model.
//! - `tools`: the tool registry and the built-in tool handlers.
//! - `relay`: the per-connection relay that pumps audio up and events down,
//!   answering tool calls inline.

pub mod live;
pub mod relay;
pub mod tools;
