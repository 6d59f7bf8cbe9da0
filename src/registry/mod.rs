mod registry;
pub use registry::*;
