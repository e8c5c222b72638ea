//! Dispatch views and the client routing their rows into the engine.
//!
//! A view is a list query on one dispatch table plus an object query per
//! row. [`DispatchClient`] owns the views, translates the field indices of
//! object responses back into field names, and hands each complete row to
//! the handler of its view.

pub mod client;
pub mod format;
pub mod protocol;
mod reset;
mod routing;
pub mod schema;

pub use client::{DispatchClient, View};
pub use format::{build_format, FieldTable, FormatField, ObjectFormat};
pub use protocol::{DispatchTransport, FieldValue, ItemAction, ListItem, ListResponse, ObjectResponse};
pub use schema::{compute_defaults, ViewKind};
