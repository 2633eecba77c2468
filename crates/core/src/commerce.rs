use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use picnic_api::{Cart, PicnicClient, RecipeSearchResults, SellingUnitHit};
use serde_json::Value;

/// The grocery backend as the tool handlers see it.
///
/// Responses may carry a backend error code instead of a payload; callers
/// check for it before declaring success.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommerceBackend: Send + Sync {
    async fn search_products(&self, query: &str) -> Result<Vec<SellingUnitHit>>;

    async fn add_product(&self, product_id: &str, count: u32) -> Result<Cart>;

    async fn remove_product(&self, product_id: &str, count: u32) -> Result<Cart>;

    async fn search_recipes(&self, query: &str) -> Result<RecipeSearchResults>;

    async fn add_recipe(&self, recipe_id: &str) -> Result<Value>;

    async fn get_cart(&self) -> Result<Cart>;
}

#[async_trait]
impl CommerceBackend for PicnicClient {
    async fn search_products(&self, query: &str) -> Result<Vec<SellingUnitHit>> {
        Ok(self.search(query).await?)
    }

    async fn add_product(&self, product_id: &str, count: u32) -> Result<Cart> {
        Ok(PicnicClient::add_product(self, product_id, count).await?)
    }

    async fn remove_product(&self, product_id: &str, count: u32) -> Result<Cart> {
        Ok(PicnicClient::remove_product(self, product_id, count).await?)
    }

    async fn search_recipes(&self, query: &str) -> Result<RecipeSearchResults> {
        Ok(PicnicClient::search_recipes(self, query).await?)
    }

    async fn add_recipe(&self, recipe_id: &str) -> Result<Value> {
        Ok(self.add_recipe_to_cart(recipe_id).await?)
    }

    async fn get_cart(&self) -> Result<Cart> {
        Ok(PicnicClient::get_cart(self).await?)
    }
}
