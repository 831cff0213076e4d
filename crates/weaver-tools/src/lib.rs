//! Weaver Tools — the capability registry and built-in capabilities
//!
//! Each capability is a self-contained file in src/tools/. The registry is
//! assembled once at process start from the closed list below; there is no
//! runtime discovery.

pub mod registry;
pub mod tools;

pub use registry::{Capability, CapabilityMetadata, CapabilityRegistry, ExecutionError};
pub use tools::web_scraper::WebScraperCapability;
pub use tools::web_search::WebSearchCapability;

/// Create the default registry with all built-in capabilities, configured
/// from the environment.
///
/// Edit this function to add or remove capabilities.
pub fn create_default_registry() -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new();
    registry.register(WebSearchCapability::from_env());
    registry.register(WebScraperCapability::from_env());
    registry
}
