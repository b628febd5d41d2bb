//! Domain logic - pure rules independent of repository access

pub mod baseline;
pub mod classification;
pub mod commit;
pub mod hunks;
pub mod reference;
pub mod tag;
pub mod version;

pub use baseline::{Baseline, TagPoint};
pub use classification::{ClassifiedPatch, ClassifiedRange, Classification};
pub use commit::CommitRecord;
pub use hunks::{Hunk, HunkScore, MatchRatio};
pub use reference::{RefKind, ResolvedRef};
pub use tag::{TagGroup, TagSortOptions};
pub use version::{BaseVersion, VersionTag};
