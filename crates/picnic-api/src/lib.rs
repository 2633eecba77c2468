//! Client for the Picnic storefront API together with the helpers that turn
//! its schema-less page documents into domain entities.

mod client;
mod error;
pub mod extract;
pub mod format;
pub mod tree;

pub use client::{Cart, CartLine, PicnicClient, PicnicConfig, PicnicConfigBuilder, error_code};
pub use error::PicnicError;
pub use extract::{DocumentNode, RecipeEntry, RecipeSearchResults, SellingUnitHit};
pub use format::format_price;
pub use tree::{CategoryTree, render_category_tree};
