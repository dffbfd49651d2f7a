pub mod archive;
pub mod cache_viewer;
pub mod compare;
pub mod dump;

pub use archive::handle_archive;
pub use cache_viewer::handle_cache_viewer;
pub use compare::handle_compare;
pub use dump::handle_dump;
