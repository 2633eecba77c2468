//! Grocery operations exposed to the model.
//!
//! Read operations treat a backend error code as a failed call. Mutating
//! operations report it back to the model as `{"error_code": ..}` so it can
//! explain what went wrong.

use crate::cart_matcher::CartMatcher;
use crate::commerce::CommerceBackend;
use crate::error::ToolError;
use crate::tools::registry::{ToolHandler, ToolRegistry};
use crate::tools::schema::{ArgSpec, ToolArgs, ToolSchema};
use anyhow::anyhow;
use async_trait::async_trait;
use picnic_api::{Cart, CartLine, error_code, format_price};
use serde_json::{Value, json};
use std::sync::Arc;

pub const MAX_ITEM_RETURN_COUNT: i64 = 10;
pub const DEFAULT_ITEM_RETURN_COUNT: i64 = 3;
pub const CHEAPER_ALTERNATIVE_COUNT: usize = 6;

const NO_PRODUCTS: &str = "No product could be found!";
const NO_RECIPES: &str = "No recipes could be found!";

/// Registers every grocery operation.
pub fn register_picnic_tools(
    registry: &mut ToolRegistry,
    backend: Arc<dyn CommerceBackend>,
    matcher: Arc<dyn CartMatcher>,
) {
    registry.register(Box::new(SearchProducts::new(backend.clone())));
    registry.register(Box::new(AddProduct::new(backend.clone())));
    registry.register(Box::new(RemoveProduct::new(backend.clone())));
    registry.register(Box::new(SearchRecipes::new(backend.clone())));
    registry.register(Box::new(AddRecipe::new(backend.clone())));
    registry.register(Box::new(CheaperAlternative::new(backend.clone(), matcher)));
    registry.register(Box::new(ReplaceProduct::new(backend.clone())));
    registry.register(Box::new(CurrentCart::new(backend)));
}

pub fn picnic_registry(
    backend: Arc<dyn CommerceBackend>,
    matcher: Arc<dyn CartMatcher>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_picnic_tools(&mut registry, backend, matcher);
    registry
}

fn item_limit(args: &ToolArgs) -> Result<usize, ToolError> {
    let requested = args.int("max_item_return_count")?;
    Ok(requested.clamp(0, MAX_ITEM_RETURN_COUNT) as usize)
}

fn count(args: &ToolArgs) -> Result<u32, ToolError> {
    u32::try_from(args.int("count")?).map_err(|_| ToolError::InvalidArgument {
        name: "count".to_string(),
        expected: "a non-negative integer",
    })
}

fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase()
}

fn error_sentinel(code: &str) -> Value {
    json!({ "error_code": code })
}

fn checked_cart(cart: Cart) -> Result<Cart, ToolError> {
    match cart.error_code() {
        Some(code) => Err(ToolError::Backend(anyhow!("cart request failed with {code}"))),
        None => Ok(cart),
    }
}

pub struct SearchProducts {
    backend: Arc<dyn CommerceBackend>,
    schema: ToolSchema,
}

impl SearchProducts {
    pub fn new(backend: Arc<dyn CommerceBackend>) -> Self {
        Self {
            backend,
            schema: ToolSchema::new(
                "search_for_products",
                "Searches for products on the online grocery platform Picnic.",
                vec![
                    ArgSpec::string(
                        "search_query",
                        "The name of the product that shall be searched such as milk or apples",
                    ),
                    ArgSpec::integer(
                        "max_item_return_count",
                        "Number of returned products. Can be between 0 and 10.",
                    )
                    .with_default(DEFAULT_ITEM_RETURN_COUNT),
                ],
            ),
        }
    }
}

#[async_trait]
impl ToolHandler for SearchProducts {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let query = args.str("search_query")?;
        let limit = item_limit(&args)?;
        let hits = self.backend.search_products(query).await?;

        let mut products: Vec<(i64, &str, &str)> = hits
            .iter()
            .filter_map(|hit| Some((hit.display_price()?, hit.name()?, hit.id()?)))
            .collect();
        if products.is_empty() {
            return Ok(json!({ "products": NO_PRODUCTS }));
        }

        products.sort_by_key(|(price, _, _)| *price);
        let products: Vec<Value> = products
            .into_iter()
            .take(limit)
            .map(|(price, name, id)| {
                json!({
                    "name": name.replace(',', "."),
                    "price": format_price(price),
                    "id": id,
                })
            })
            .collect();
        Ok(json!({ "products": products }))
    }
}

#[derive(Debug, Clone, Copy)]
enum CartAction {
    Added,
    Removed,
}

impl CartAction {
    fn phrase(self) -> (&'static str, &'static str) {
        match self {
            CartAction::Added => ("added", "to"),
            CartAction::Removed => ("removed", "from"),
        }
    }
}

fn cart_change_response(cart: &Cart, product_id: &str, action: CartAction) -> Value {
    if let Some(code) = cart.error_code() {
        return error_sentinel(code);
    }
    let (verb, preposition) = action.phrase();
    let subject = cart.product_name(product_id).unwrap_or("product");
    json!({ "result": format!("Successfully {verb} {subject} {preposition} shopping cart") })
}

fn cart_change_schema(
    name: &'static str,
    description: &'static str,
    id_description: &'static str,
    count_description: &'static str,
) -> ToolSchema {
    ToolSchema::new(
        name,
        description,
        vec![
            ArgSpec::string("product_id", id_description),
            ArgSpec::integer("count", count_description).with_default(1),
        ],
    )
}

pub struct AddProduct {
    backend: Arc<dyn CommerceBackend>,
    schema: ToolSchema,
}

impl AddProduct {
    pub fn new(backend: Arc<dyn CommerceBackend>) -> Self {
        Self {
            backend,
            schema: cart_change_schema(
                "add_product_to_cart",
                "Adds a product to the Picnic platform shopping cart.",
                "The ID of the product that shall be added to the online picnic shopping cart.",
                "The amount of products to add to the online picnic shopping cart. Default to 1.",
            ),
        }
    }
}

#[async_trait]
impl ToolHandler for AddProduct {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let product_id = normalize_id(args.str("product_id")?);
        let cart = self.backend.add_product(&product_id, count(&args)?).await?;
        Ok(cart_change_response(&cart, &product_id, CartAction::Added))
    }
}

pub struct RemoveProduct {
    backend: Arc<dyn CommerceBackend>,
    schema: ToolSchema,
}

impl RemoveProduct {
    pub fn new(backend: Arc<dyn CommerceBackend>) -> Self {
        Self {
            backend,
            schema: cart_change_schema(
                "remove_product_from_cart",
                "Removes a product from the Picnic platform shopping cart.",
                "The ID of the product that shall be removed from the online picnic shopping cart.",
                "The amount of products to remove from the online picnic shopping cart. Default to 1.",
            ),
        }
    }
}

#[async_trait]
impl ToolHandler for RemoveProduct {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let product_id = normalize_id(args.str("product_id")?);
        let cart = self
            .backend
            .remove_product(&product_id, count(&args)?)
            .await?;
        Ok(cart_change_response(&cart, &product_id, CartAction::Removed))
    }
}

pub struct SearchRecipes {
    backend: Arc<dyn CommerceBackend>,
    schema: ToolSchema,
}

impl SearchRecipes {
    pub fn new(backend: Arc<dyn CommerceBackend>) -> Self {
        Self {
            backend,
            schema: ToolSchema::new(
                "search_for_recipes",
                "Searches for recipes on the online grocery platform Picnic.",
                vec![
                    ArgSpec::string(
                        "search_query",
                        "Name of the recipe that shall be searched such as pizza or spaghetti bolognese.",
                    ),
                    ArgSpec::integer(
                        "max_item_return_count",
                        "Number of returned recipes. Can be between 0 and 10.",
                    )
                    .with_default(DEFAULT_ITEM_RETURN_COUNT),
                ],
            ),
        }
    }
}

#[async_trait]
impl ToolHandler for SearchRecipes {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let query = args.str("search_query")?;
        let limit = item_limit(&args)?;
        let results = self.backend.search_recipes(query).await?;
        if results.entries.is_empty() {
            return Ok(json!({ "recipes": NO_RECIPES }));
        }

        let recipes: Vec<_> = results.entries.iter().take(limit).collect();
        Ok(json!({ "recipes": recipes, "ids_paired": results.ids_paired }))
    }
}

pub struct AddRecipe {
    backend: Arc<dyn CommerceBackend>,
    schema: ToolSchema,
}

impl AddRecipe {
    pub fn new(backend: Arc<dyn CommerceBackend>) -> Self {
        Self {
            backend,
            schema: ToolSchema::new(
                "add_recipe_to_cart",
                "Adds a recipe to the Picnic platform shopping cart.",
                vec![ArgSpec::string(
                    "recipe_id",
                    "The ID of the recipe that shall be added to the online picnic shopping cart.",
                )],
            ),
        }
    }
}

#[async_trait]
impl ToolHandler for AddRecipe {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let recipe_id = normalize_id(args.str("recipe_id")?);
        let response = self.backend.add_recipe(&recipe_id).await?;
        Ok(match error_code(&response) {
            Some(code) => error_sentinel(code),
            None => json!({ "result": "Successfully added the recipe to your shopping cart" }),
        })
    }
}

pub struct CheaperAlternative {
    backend: Arc<dyn CommerceBackend>,
    matcher: Arc<dyn CartMatcher>,
    schema: ToolSchema,
}

impl CheaperAlternative {
    pub fn new(backend: Arc<dyn CommerceBackend>, matcher: Arc<dyn CartMatcher>) -> Self {
        Self {
            backend,
            matcher,
            schema: ToolSchema::new(
                "search_for_cheaper_product_alternative",
                "Returns a list of product alternatives, sorted by its price, starting with the cheapest.",
                vec![ArgSpec::string(
                    "product_name",
                    "The name of the product that we want to search cheaper alternatives for.",
                )],
            ),
        }
    }
}

#[async_trait]
impl ToolHandler for CheaperAlternative {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let product_name = args.str("product_name")?;
        let cart = checked_cart(self.backend.get_cart().await?)?;
        let lines = cart.lines();

        let Some(matched) = self.matcher.match_product(product_name, &lines).await? else {
            return Ok(json!({
                "result": format!("No product in the shopping cart matches {product_name}!"),
                "matched": null,
            }));
        };
        tracing::debug!("{:?} resolved to cart line {:?}", product_name, matched);

        let hits = self
            .backend
            .search_products(&matched.short_product_name_version)
            .await?;
        let mut alternatives: Vec<CartLine> = hits
            .iter()
            .take(CHEAPER_ALTERNATIVE_COUNT)
            .filter_map(|hit| {
                Some(CartLine {
                    price: hit.display_price()?,
                    product_name: hit.name()?.to_string(),
                    product_id: hit.id()?.to_string(),
                })
            })
            .collect();
        alternatives.sort_by_key(|line| line.price);

        Ok(json!({ "result": alternatives, "matched": matched }))
    }
}

/// Remove-then-add. Not atomic: `removed && !added` means the old product is
/// gone and the new one never arrived.
pub struct ReplaceProduct {
    backend: Arc<dyn CommerceBackend>,
    schema: ToolSchema,
}

impl ReplaceProduct {
    pub fn new(backend: Arc<dyn CommerceBackend>) -> Self {
        Self {
            backend,
            schema: ToolSchema::new(
                "replace_existing_product",
                "Replace an existing product in the users shopping cart with a new one.",
                vec![
                    ArgSpec::string(
                        "old_product_id",
                        "Product id of the old product that shall be replaced.",
                    ),
                    ArgSpec::string("new_product_id", "Product id of the new product."),
                ],
            ),
        }
    }
}

#[async_trait]
impl ToolHandler for ReplaceProduct {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, args: ToolArgs) -> Result<Value, ToolError> {
        let old_product_id = args.str("old_product_id")?;
        let new_product_id = args.str("new_product_id")?;

        let removed = self.backend.remove_product(old_product_id, 1).await?;
        if let Some(code) = removed.error_code() {
            return Ok(json!({ "error_code": code, "removed": false, "added": false }));
        }

        let added = match self.backend.add_product(new_product_id, 1).await {
            Ok(cart) => cart,
            Err(e) => {
                tracing::error!(
                    "{} was removed but adding {} failed: {:#}",
                    old_product_id,
                    new_product_id,
                    e
                );
                return Ok(json!({ "error": format!("{e:#}"), "removed": true, "added": false }));
            }
        };
        if let Some(code) = added.error_code() {
            return Ok(json!({ "error_code": code, "removed": true, "added": false }));
        }

        Ok(json!({
            "result": "Successfully replaced the product in your shopping cart.",
            "removed": true,
            "added": true,
        }))
    }
}

pub struct CurrentCart {
    backend: Arc<dyn CommerceBackend>,
    schema: ToolSchema,
}

impl CurrentCart {
    pub fn new(backend: Arc<dyn CommerceBackend>) -> Self {
        Self {
            backend,
            schema: ToolSchema::new(
                "get_all_current_products_in_cart",
                "Get a list of all products that are currently in the shopping cart.",
                vec![],
            ),
        }
    }
}

#[async_trait]
impl ToolHandler for CurrentCart {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, _args: ToolArgs) -> Result<Value, ToolError> {
        let cart = checked_cart(self.backend.get_cart().await?)?;
        Ok(json!({ "result": cart.lines() }))
    }
}
