//! Virtual paths and the provider seam the compiler reads sources through.

pub mod memory;
pub mod path;
pub mod physical;
pub mod provider;

pub use memory::MemoryPathProvider;
pub use path::VirtualPath;
pub use physical::PhysicalPathProvider;
pub use provider::{DirectoryEntry, VirtualPathProvider};
