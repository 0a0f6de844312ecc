mod handle;
mod options;
mod registry;

pub use handle::{FabricHandle, FabricState};
pub use options::FabricOptions;
pub use registry::FabricRegistry;
