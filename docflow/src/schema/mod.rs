pub mod resolver;
pub mod types;

pub use resolver::{resolve_refs, LocalRefResolver, RefResolver};
pub use types::{ScalarKind, SchemaKind, SchemaNode};
