//! Boundary with the dispatch transport.
//!
//! The wire codec and the connection live outside this crate. The client
//! issues its queries through [`DispatchTransport`] and is fed the decoded
//! answers as [`ListResponse`] and [`ObjectResponse`] values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::format::ObjectFormat;

/// Outgoing side of a dispatch connection
pub trait DispatchTransport {
    /// Ask for the rows of `db_root` matching `filter`; answers come as list responses tagged `idx`
    fn query_list(&mut self, idx: u32, db_root: &str, filter: &str);

    /// Ask for the values of one row with a registered format
    fn query_object(&mut self, idx: u32, object_id: &str, format_id: u32);

    /// Stop a list or object query
    fn stop_query(&mut self, idx: u32);

    /// Register the format of later object queries
    fn set_object_format(&mut self, format: &ObjectFormat);
}

/// What happened to a row of a list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    #[default]
    Add,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub item_id: String,
    #[serde(default)]
    pub action: ItemAction,
}

/// Rows added to or removed from a list query
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListResponse {
    pub items: Vec<ListItem>,
}

/// One field of an object response; a missing value clears the field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_index: u32,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Changed fields of one row
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectResponse {
    pub values: Vec<FieldValue>,
}

impl ObjectResponse {
    /// Response setting each `(field_index, value)` pair
    pub fn from_pairs<I, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, V)>,
        V: Into<Value>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(field_index, value)| FieldValue {
                    field_index,
                    value: Some(value.into()),
                })
                .collect(),
        }
    }
}
