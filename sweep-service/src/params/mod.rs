// Parameters Module
// Typed parameter values, parameter groups and schema derivation

pub mod groups;
pub mod schema;
pub mod value;

// Re-export key types
pub use groups::{BindingWarning, ParamGroup, ParamGroups};
pub use schema::{derive_groups, DerivedGroups, FieldSpec, FieldTag, ParamError};
pub use value::Value;
