pub mod error;
pub mod fs;
pub mod links;
pub mod mirror;
pub mod paths;
pub mod result;

pub use error::MirrorError;
pub use fs::create_dir;
pub use mirror::{FetchTarget, Mirror, MirrorOptions, MirrorRequest, ProgressCallback};
pub use paths::{INDEX_HTML, ResourceKind, local_path, relative_link};
pub use result::{FailedTarget, MirrorReport, SavedResource};
