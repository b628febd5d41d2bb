//! Engines that work against [`crate::git::Repository`]: baseline detection,
//! fuzzy patch matching, both classification paths and provenance.

pub mod baseline;
pub mod matcher;
pub mod provenance;
pub mod quilt;
pub mod range_diff;

pub use baseline::{BaselineResolver, BaselineScan};
pub use matcher::{find_similar_patch, MatchOptions, MatchResult, MatchStrategy, SimilarityMatcher};
pub use provenance::{FingerprintIndex, Provenance, ProvenanceResolver, UpstreamSource};
pub use quilt::{build_quilt, fingerprints_in_range, QuiltComparator, QuiltFilter};
pub use range_diff::{RangeDiffOutcome, RangeDiffParser};
