pub mod handlers;
pub mod registry;
pub mod schema;

pub use handlers::{picnic_registry, register_picnic_tools};
pub use registry::{ToolHandler, ToolRegistry};
pub use schema::{ArgKind, ArgSpec, ToolArgs, ToolSchema};
