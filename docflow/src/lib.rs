pub mod embed;
pub mod error;
pub mod geocode;
pub mod processor;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod store;
pub mod validator;

pub use embed::embed_references;
pub use error::{DocflowError, Result};
pub use geocode::{GeoMatch, GeocodeProvider, Precision};
pub use processor::{ProcessingContext, Processor, RequestIdentity};
pub use reference::{assign_to_field_reference, resolve_field_reference};
pub use registry::{EnrichFn, ExtensionRegistry, ValidateFn};
pub use schema::{resolve_refs, LocalRefResolver, RefResolver, ScalarKind, SchemaKind, SchemaNode};
pub use store::{DocumentStore, MemoryStore, Query};
pub use validator::{ValidationError, Validator};
