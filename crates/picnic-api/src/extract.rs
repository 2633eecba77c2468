//! Entity extraction from page documents.
//!
//! The storefront renders its search and recipe pages as a deeply nested tree
//! of nodes with no fixed schema. Every field may be missing at any depth, so
//! all functions here treat absence as "nothing found" rather than an error.
//! None of them mutate the input document.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// `content.type` of a node that describes a product tile.
pub const SELLING_UNIT_TILE: &str = "SELLING_UNIT_TILE";
/// Substring of the `id` of a recipe tile node.
pub const RECIPE_TILE_MARKER: &str = "recipe-tile__";
/// Substring of the `id` of the node wrapping the ingredient list on a recipe page.
pub const INGREDIENTS_WRAPPER_MARKER: &str = "ingredients-wrapper";
/// Default cap on the number of extracted search results.
pub const DEFAULT_MAX_ITEMS: usize = 10;

// The article id only shows up as inline text. Inside an embedded string the
// quotes arrive escaped, so both spellings are accepted.
static SOLE_ARTICLE_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\?"sole_article_id\\?"\s*:\s*\\?"(\w+)"#).expect("valid sole_article_id pattern")
});

static NULL: Value = Value::Null;

/// A borrowed view of one node of a page document.
#[derive(Debug, Clone, Copy)]
pub struct DocumentNode<'a> {
    value: &'a Value,
}

impl<'a> DocumentNode<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self { value }
    }

    /// The node every page hangs its content from: `body.child`.
    pub fn page_root(document: &'a Value) -> Self {
        let child = document
            .get("body")
            .and_then(|body| body.get("child"))
            .unwrap_or(&NULL);
        Self::new(child)
    }

    pub fn id(&self) -> Option<&'a str> {
        self.value.get("id").and_then(Value::as_str)
    }

    pub fn content(&self) -> Option<&'a Map<String, Value>> {
        self.value.get("content").and_then(Value::as_object)
    }

    pub fn pml(&self) -> Option<&'a Value> {
        self.value.get("pml")
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.value.get(key)
    }

    pub fn children(&self) -> impl DoubleEndedIterator<Item = DocumentNode<'a>> + 'a {
        self.value
            .get("children")
            .and_then(Value::as_array)
            .map(|children| children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(DocumentNode::new)
    }

    pub fn as_value(&self) -> &'a Value {
        self.value
    }

    /// Depth-first pre-order walk starting at this node.
    pub fn descendants(&self) -> PreOrder<'a> {
        PreOrder { stack: vec![*self] }
    }
}

/// Pre-order iterator over a node and everything below it.
pub struct PreOrder<'a> {
    stack: Vec<DocumentNode<'a>>,
}

impl<'a> Iterator for PreOrder<'a> {
    type Item = DocumentNode<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().rev());
        Some(node)
    }
}

/// A product tile found in a search page, merged with its article id.
#[derive(Debug, Clone, PartialEq)]
pub struct SellingUnitHit {
    pub selling_unit: Map<String, Value>,
    pub sole_article_id: Option<String>,
}

impl SellingUnitHit {
    pub fn id(&self) -> Option<&str> {
        self.selling_unit.get("id").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.selling_unit.get("name").and_then(Value::as_str)
    }

    pub fn display_price(&self) -> Option<i64> {
        self.selling_unit.get("display_price").and_then(Value::as_i64)
    }
}

/// Collects product tiles from a search page, in document order, stopping as
/// soon as `max_items` have been found.
pub fn extract_search_results(document: &Value, max_items: usize) -> Vec<SellingUnitHit> {
    let mut results = Vec::new();
    if max_items == 0 {
        return results;
    }

    for node in DocumentNode::page_root(document).descendants() {
        let Some(content) = node.content() else {
            continue;
        };
        if content.get("type").and_then(Value::as_str) != Some(SELLING_UNIT_TILE) {
            continue;
        }
        let Some(selling_unit) = content.get("sellingUnit").and_then(Value::as_object) else {
            continue;
        };

        results.push(SellingUnitHit {
            selling_unit: selling_unit.clone(),
            sole_article_id: find_sole_article_id(node.as_value()),
        });
        if results.len() >= max_items {
            break;
        }
    }

    results
}

fn find_sole_article_id(node: &Value) -> Option<String> {
    let serialized = serde_json::to_string(node).ok()?;
    SOLE_ARTICLE_ID_PATTERN
        .captures(&serialized)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeEntry {
    pub recipe_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Recipe tiles from a recipe search page.
///
/// Ids come from a separate analytics block and are paired with the tiles by
/// position only. When that block lists fewer than `max_items` ids no pairing
/// happens at all and `ids_paired` is false.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeSearchResults {
    pub entries: Vec<RecipeEntry>,
    pub ids_paired: bool,
}

pub fn extract_recipe_results(document: &Value, max_items: usize) -> RecipeSearchResults {
    let root = DocumentNode::page_root(document);

    let mut entries: Vec<RecipeEntry> = root
        .descendants()
        .filter(|node| node.id().is_some_and(|id| id.contains(RECIPE_TILE_MARKER)))
        .take(max_items)
        .map(|node| RecipeEntry {
            recipe_name: node
                .pml()
                .and_then(|pml| pml.get("component"))
                .and_then(|component| component.get("accessibilityLabel"))
                .and_then(Value::as_str)
                .map(str::to_string),
            id: None,
        })
        .collect();

    let recipe_ids = analytics_recipe_ids(&root);
    let ids_paired = recipe_ids.len() >= max_items;
    if ids_paired {
        for (entry, id) in entries.iter_mut().zip(recipe_ids) {
            entry.id = Some(id);
        }
    } else {
        tracing::debug!(
            "recipe analytics lists {} ids, fewer than {}; leaving recipes unpaired",
            recipe_ids.len(),
            max_items
        );
    }

    RecipeSearchResults {
        entries,
        ids_paired,
    }
}

fn analytics_recipe_ids(root: &DocumentNode<'_>) -> Vec<String> {
    root.get("analytics")
        .and_then(|analytics| analytics.get("contexts"))
        .and_then(Value::as_array)
        .and_then(|contexts| contexts.last())
        .and_then(|context| context.get("data"))
        .and_then(|data| data.get("recipe_ids"))
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .map(|id| match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Ingredient records from the first ingredient wrapper on a recipe page.
/// Records are returned untouched.
pub fn extract_recipe_ingredients(document: &Value) -> Vec<Value> {
    DocumentNode::page_root(document)
        .descendants()
        .find(|node| {
            node.id()
                .is_some_and(|id| id.contains(INGREDIENTS_WRAPPER_MARKER))
        })
        .and_then(|wrapper| wrapper.get("state"))
        .and_then(|state| state.get("ingredientsState"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}
