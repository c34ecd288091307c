pub use base::*;
pub use registry::*;
pub use spsc::*;

mod base;
mod registry;
mod spsc;
