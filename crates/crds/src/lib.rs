//! Machine API CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the Machine API and the typed
//! Azure provider configuration embedded in them.

pub mod conditions;
pub mod machine;
pub mod machine_set;
pub mod provider_spec;
pub mod references;

pub use conditions::*;
pub use machine::*;
pub use machine_set::*;
pub use provider_spec::*;
pub use references::*;

/// Schema for embedded documents whose shape is owned by the provider
pub fn preserve_unknown_fields(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}
