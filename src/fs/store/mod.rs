pub mod extent;
pub mod metadata;
pub mod path;
pub mod schema;

pub use extent::ExtentStore;
pub use metadata::MetadataStore;
pub use path::PathStore;
