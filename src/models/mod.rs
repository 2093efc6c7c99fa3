pub mod comparison;
pub mod envelope;
pub mod product;

// Re-exports for convenience
pub use comparison::*;
pub use envelope::*;
pub use product::*;
