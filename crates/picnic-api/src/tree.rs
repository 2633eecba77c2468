//! Box-drawn rendering of the store's category catalog.

use crate::format::euro_suffix;
use serde_json::Value;

const SPACE: &str = "    ";
const BRANCH: &str = "│   ";
const TEE: &str = "├── ";
const LAST: &str = "└── ";

/// A lazily rendered category tree.
///
/// Nothing is formatted until the lines are iterated, and iterating again
/// starts over from the first line.
#[derive(Debug, Clone)]
pub struct CategoryTree<'a> {
    nodes: &'a [Value],
    prefix: String,
}

pub fn render_category_tree<'a>(nodes: &'a [Value], prefix: &str) -> CategoryTree<'a> {
    CategoryTree {
        nodes,
        prefix: prefix.to_string(),
    }
}

impl<'a> CategoryTree<'a> {
    pub fn lines(&self) -> TreeLines<'a> {
        TreeLines {
            stack: vec![Level {
                nodes: self.nodes,
                next: 0,
                prefix: self.prefix.clone(),
            }],
        }
    }
}

impl<'a> IntoIterator for &CategoryTree<'a> {
    type Item = String;
    type IntoIter = TreeLines<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines()
    }
}

struct Level<'a> {
    nodes: &'a [Value],
    next: usize,
    prefix: String,
}

pub struct TreeLines<'a> {
    stack: Vec<Level<'a>>,
}

impl Iterator for TreeLines<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let level = self.stack.last_mut()?;
            if level.next >= level.nodes.len() {
                self.stack.pop();
                continue;
            }

            let nodes = level.nodes;
            let item = &nodes[level.next];
            level.next += 1;
            let is_last = level.next == nodes.len();
            let pointer = if is_last { LAST } else { TEE };

            let line = item
                .get("name")
                .map(|name| format!("{}{}{}", level.prefix, pointer, label(item, name)));

            if let Some(children) = item.get("items").and_then(Value::as_array) {
                let extension = if is_last { SPACE } else { BRANCH };
                let prefix = format!("{}{}", level.prefix, extension);
                self.stack.push(Level {
                    nodes: children,
                    next: 0,
                    prefix,
                });
            }

            if line.is_some() {
                return line;
            }
        }
    }
}

fn label(item: &Value, name: &Value) -> String {
    let mut label = String::new();
    if let Some(quantity) = item.get("unit_quantity") {
        label.push_str(&display(quantity));
        label.push(' ');
    }
    label.push_str(&display(name));
    if let Some(price) = item.get("display_price").and_then(as_minor_units) {
        label.push_str(&euro_suffix(price));
    }
    label
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_minor_units(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sibling_leaves_use_tee_then_last() {
        let nodes = vec![
            json!({ "name": "A" }),
            json!({ "name": "B", "display_price": 250 }),
            json!({ "name": "C" }),
        ];

        let lines: Vec<String> = render_category_tree(&nodes, "").lines().collect();

        assert_eq!(lines, vec!["├── A", "├── B €2.50", "└── C"]);
    }

    #[test]
    fn test_nested_items_extend_prefix() {
        let nodes = vec![
            json!({
                "name": "Dairy",
                "items": [
                    { "name": "Milk", "unit_quantity": "1 l", "display_price": 119 },
                    { "name": "Cheese" }
                ]
            }),
            json!({
                "name": "Bakery",
                "items": [{ "name": "Bread" }]
            }),
        ];

        let lines: Vec<String> = render_category_tree(&nodes, "").lines().collect();

        assert_eq!(
            lines,
            vec![
                "├── Dairy",
                "│   ├── 1 l Milk €1.19",
                "│   └── Cheese",
                "└── Bakery",
                "    └── Bread",
            ]
        );
    }

    #[test]
    fn test_tree_is_restartable_and_honours_prefix() {
        let nodes = vec![json!({ "name": "Only" })];
        let tree = render_category_tree(&nodes, ">> ");

        let first: Vec<String> = tree.lines().collect();
        let second: Vec<String> = (&tree).into_iter().collect();

        assert_eq!(first, vec![">> └── Only"]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_nameless_nodes_still_recurse() {
        let nodes = vec![json!({ "items": [{ "name": "Inner" }] })];

        let lines: Vec<String> = render_category_tree(&nodes, "").lines().collect();

        assert_eq!(lines, vec!["    └── Inner"]);
        assert_eq!(render_category_tree(&[], "").lines().count(), 0);
    }
}
