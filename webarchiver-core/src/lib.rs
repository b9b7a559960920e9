pub mod archive;
pub mod config;
pub mod error;
pub mod hooks;
pub mod snapshot;

pub use archive::{
    ArchiveOptions, ArchiveProgressCallback, ArchiveSummary, ArchivedSeed, SeedOutcome,
    SnapshotMode, execute_archive, generate_archive_report, summarize,
};
pub use config::Config;
pub use error::ArchiveError;
pub use hooks::{ManifestHook, MirroredRoot, PostMirrorHook, SelectionPageHook};
pub use snapshot::{CdxSnapshotIndex, SnapshotIndex, SnapshotRecord};
