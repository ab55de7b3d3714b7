//! Static configuration: settings file and field policy.

pub mod policy;
pub mod settings;

pub use policy::FieldPolicy;
pub use settings::Settings;
