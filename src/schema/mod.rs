//! Schema registry
//!
//! Entities are schema-polymorphic: every change carries a schema key, and
//! each registered schema is exposed as an entity view plus an `_all`
//! variant. Content is validated before any write.

mod registry;
mod types;
mod validator;

pub use registry::{
    SchemaRegistry, ViewScope, ACCOUNT_SCHEMA_KEY, FILE_SCHEMA_KEY, KEY_VALUE_SCHEMA_KEY,
    SYSTEM_VIEW_NAMES, THREAD_SCHEMA_KEY,
};
pub use types::{
    DefaultValue, PropertyDef, PropertyKind, SchemaDescriptor, ENTITY_ID_SEPARATOR, LIX_FILE_ID,
    OWN_ENTITY_PLUGIN_KEY,
};
pub use validator::{DescriptorValidator, SchemaValidator};
