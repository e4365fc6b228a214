pub mod color;
pub mod math;

// Foundation crate: small, well-tested value types only.
pub use color::*;
