use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// How a patch of range A relates to range B
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Same commit, or same change with the same message
    Same,
    /// Same change, different commit message
    MessageOnly,
    /// The change itself differs
    Updated,
    /// Only in B
    New,
    /// Only in A
    Removed,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Classification::Same => "same",
            Classification::MessageOnly => "message-only",
            Classification::Updated => "updated",
            Classification::New => "new",
            Classification::Removed => "removed",
        };
        write!(f, "{}", name)
    }
}

/// One classified patch.
///
/// `Same`, `MessageOnly` and `Updated` carry both commits, `New` only
/// `commit_b` and `Removed` only `commit_a`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedPatch {
    pub seq: u32,
    pub commit_a: Option<String>,
    pub commit_b: Option<String>,
    pub subject: String,
    pub classification: Classification,
}

impl ClassifiedPatch {
    pub fn paired(
        seq: u32,
        commit_a: impl Into<String>,
        commit_b: impl Into<String>,
        subject: impl Into<String>,
        classification: Classification,
    ) -> Self {
        ClassifiedPatch {
            seq,
            commit_a: Some(commit_a.into()),
            commit_b: Some(commit_b.into()),
            subject: subject.into(),
            classification,
        }
    }

    pub fn new_in_b(seq: u32, commit_b: impl Into<String>, subject: impl Into<String>) -> Self {
        ClassifiedPatch {
            seq,
            commit_a: None,
            commit_b: Some(commit_b.into()),
            subject: subject.into(),
            classification: Classification::New,
        }
    }

    pub fn removed_from_a(seq: u32, commit_a: impl Into<String>, subject: impl Into<String>) -> Self {
        ClassifiedPatch {
            seq,
            commit_a: Some(commit_a.into()),
            commit_b: None,
            subject: subject.into(),
            classification: Classification::Removed,
        }
    }

    /// The commit that represents this patch in the newer range.
    pub fn newest_commit(&self) -> Option<&str> {
        self.commit_b.as_deref().or(self.commit_a.as_deref())
    }
}

/// Classified patches split per category, each in sequence order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassifiedRange {
    pub same: Vec<ClassifiedPatch>,
    pub message_only: Vec<ClassifiedPatch>,
    pub updated: Vec<ClassifiedPatch>,
    pub new: Vec<ClassifiedPatch>,
    pub removed: Vec<ClassifiedPatch>,
}

impl ClassifiedRange {
    pub fn push(&mut self, patch: ClassifiedPatch) {
        self.bucket_mut(patch.classification).push(patch);
    }

    pub fn bucket(&self, classification: Classification) -> &[ClassifiedPatch] {
        match classification {
            Classification::Same => &self.same,
            Classification::MessageOnly => &self.message_only,
            Classification::Updated => &self.updated,
            Classification::New => &self.new,
            Classification::Removed => &self.removed,
        }
    }

    fn bucket_mut(&mut self, classification: Classification) -> &mut Vec<ClassifiedPatch> {
        match classification {
            Classification::Same => &mut self.same,
            Classification::MessageOnly => &mut self.message_only,
            Classification::Updated => &mut self.updated,
            Classification::New => &mut self.new,
            Classification::Removed => &mut self.removed,
        }
    }

    /// Every patch, ordered by sequence number.
    pub fn all(&self) -> Vec<&ClassifiedPatch> {
        let mut all: Vec<&ClassifiedPatch> = self
            .same
            .iter()
            .chain(&self.message_only)
            .chain(&self.updated)
            .chain(&self.new)
            .chain(&self.removed)
            .collect();
        all.sort_by_key(|p| p.seq);
        all
    }

    pub fn len(&self) -> usize {
        self.same.len()
            + self.message_only.len()
            + self.updated.len()
            + self.new.len()
            + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop twisted pairs from the changed categories, returning what was
    /// dropped. `Same`, `New` and `Removed` entries are never twisted.
    pub fn remove_twisted(&mut self) -> Vec<ClassifiedPatch> {
        let mut dropped = Vec::new();
        for bucket in [&mut self.message_only, &mut self.updated] {
            let (kept, removed) = remove_twisted(std::mem::take(bucket));
            *bucket = kept;
            dropped.extend(removed);
        }
        dropped
    }
}

/// Split out the pairs the range-diff tool matched in a cycle.
///
/// `X ! Y` next to `Y ! X` (or `X ! Y`, `Y ! Z`, `Z ! X`) is a false
/// positive: every entry whose A commit also shows up as another entry's B
/// commit is dropped. A commit paired with itself (`X = X`, both ranges
/// sharing it) is not a cycle.
pub fn remove_twisted(patches: Vec<ClassifiedPatch>) -> (Vec<ClassifiedPatch>, Vec<ClassifiedPatch>) {
    let cross = |p: &&ClassifiedPatch| p.commit_a != p.commit_b;
    let b_side: HashSet<&str> = patches
        .iter()
        .filter(cross)
        .filter_map(|p| p.commit_b.as_deref())
        .collect();
    let twisted: HashSet<String> = patches
        .iter()
        .filter(cross)
        .filter_map(|p| p.commit_a.as_deref())
        .filter(|a| b_side.contains(a))
        .map(str::to_string)
        .collect();

    if twisted.is_empty() {
        return (patches, Vec::new());
    }

    patches
        .into_iter()
        .partition(|p| p.commit_a == p.commit_b || p.commit_a.as_ref().map_or(true, |a| !twisted.contains(a)))
}
