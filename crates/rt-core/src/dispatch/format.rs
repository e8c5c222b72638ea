//! Object formats sent to dispatch.
//!
//! A format is the tree of dotted field paths of a view. Every node gets a
//! field index in depth-first pre-order; dispatch then reports values by
//! index, and only leaves carry values. A segment such as `count('0')`
//! becomes a node named `count` with the query `0`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One node of an object format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatField {
    pub field_index: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FormatField>,
}

/// Format registered for the object queries of a view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectFormat {
    pub format_id: u32,
    pub fields: Vec<FormatField>,
}

/// Field index of every leaf, mapped to its full dotted path
pub type FieldTable = BTreeMap<u32, String>;

#[derive(Debug, Default)]
struct Node {
    segment: String,
    children: Vec<Node>,
}

impl Node {
    fn child(&mut self, segment: &str) -> &mut Node {
        let pos = match self.children.iter().position(|c| c.segment == segment) {
            Some(pos) => pos,
            None => {
                self.children.push(Node {
                    segment: segment.to_string(),
                    children: Vec::new(),
                });
                self.children.len() - 1
            }
        };
        &mut self.children[pos]
    }
}

/// Build the format tree of `paths` and the index table of its leaves
pub fn build_format(format_id: u32, paths: &[String]) -> (ObjectFormat, FieldTable) {
    let mut sorted: Vec<&String> = paths.iter().collect();
    sorted.sort();

    let mut root = Node::default();
    for path in sorted {
        let mut node = &mut root;
        for segment in path.split('.') {
            node = node.child(segment);
        }
    }

    let mut next_index = 0;
    let mut table = FieldTable::new();
    let fields = extract_fields(&root.children, "", &mut next_index, &mut table);
    (ObjectFormat { format_id, fields }, table)
}

fn extract_fields(nodes: &[Node], parent: &str, next_index: &mut u32, table: &mut FieldTable) -> Vec<FormatField> {
    nodes
        .iter()
        .map(|node| {
            let field_index = *next_index;
            *next_index += 1;

            let path = if parent.is_empty() {
                node.segment.clone()
            } else {
                format!("{}.{}", parent, node.segment)
            };
            let (name, query) = split_query(&node.segment);
            let fields = extract_fields(&node.children, &path, next_index, table);
            if node.children.is_empty() {
                table.insert(field_index, path);
            }
            FormatField {
                field_index,
                name,
                query,
                fields,
            }
        })
        .collect()
}

/// `count('0')` -> (`count`, `0`)
fn split_query(segment: &str) -> (String, Option<String>) {
    match segment.find('(') {
        Some(open) => {
            let query = segment
                .get(open + 2..segment.len().saturating_sub(2))
                .unwrap_or_default()
                .to_string();
            (segment[..open].to_string(), Some(query))
        }
        None => (segment.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn paths(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pre_order_indices() {
        let (format, table) = build_format(
            3,
            &paths(&["user.name", "session_id", "user.login", "contact_duration.max('0')"]),
        );
        assert_eq!(format.format_id, 3);

        let names: Vec<(u32, &str)> = format
            .fields
            .iter()
            .map(|f| (f.field_index, f.name.as_str()))
            .collect();
        assert_eq!(names, vec![(0, "contact_duration"), (2, "session_id"), (3, "user")]);

        let max = &format.fields[0].fields[0];
        assert_eq!(max.name, "max");
        assert_eq!(max.query.as_deref(), Some("0"));

        assert_eq!(
            table,
            FieldTable::from([
                (1, "contact_duration.max('0')".to_string()),
                (2, "session_id".to_string()),
                (4, "user.login".to_string()),
                (5, "user.name".to_string()),
            ])
        );
    }

    #[test]
    fn test_inner_nodes_have_no_entry() {
        let (_, table) = build_format(1, &paths(&["sessions.last.session.logged", "sessions.last.session.session_id"]));
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&3).map(String::as_str), Some("sessions.last.session.logged"));
        assert_eq!(table.get(&4).map(String::as_str), Some("sessions.last.session.session_id"));
    }
}
