pub mod filters;
pub mod hosted;
#[cfg(feature = "local-ml")]
pub mod local;
pub mod normalize;
pub mod orchestrator;
pub mod overlay;
pub mod provider;
