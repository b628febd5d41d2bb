//! Classification from `git range-diff` output.
//!
//! Every pair the tool reports starts with a result line such as
//!
//! ```text
//!  3:  1a2b3c4 ! 3:  5d6e7f8 drm/i915: fix hang
//! ```
//!
//! `=`, `<` and `>` are final. For `!` the diff-of-diffs that follows is
//! inspected: a change marker in the column of the inner patch means the code
//! itself changed, otherwise only the message did.

use crate::domain::classification::{Classification, ClassifiedPatch, ClassifiedRange};
use crate::git::Repository;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

fn result_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*[\d-]+:\s+([0-9a-f-]{7,})\s+([=!<>])\s+[\d-]+:\s+([0-9a-f-]{7,})\s+(\S.*)$")
            .expect("static range-diff result pattern")
    })
}

fn trailer_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(Change-Id|Signed-off-by|Reviewed-on|Reviewed-by|Tested-by|Tracked-On|Acked-by|Link):",
        )
        .expect("static trailer pattern")
    })
}

/// Column layout of one `!` entry's diff, fixed by its first hunk header.
///
/// `marker` is where the outer diff puts `+`/`-`; the inner patch's own
/// marker sits one column to the right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    marker: usize,
    content: usize,
}

impl Columns {
    fn from_header(line: &str) -> Option<Self> {
        let marker = line.find('@')?;
        Some(Columns {
            marker,
            content: marker + 1,
        })
    }

    /// `+`/`-` in the inner patch column: a changed line of code
    fn is_code_change(&self, line: &[u8]) -> bool {
        line.len() > self.content && matches!(line[self.content], b'+' | b'-')
    }

    /// A changed line that is neither code nor a well-known trailer
    fn is_possible_change(&self, line: &str) -> bool {
        let bytes = line.as_bytes();
        bytes.len() > self.content + 1
            && matches!(bytes[self.marker], b'+' | b'-')
            && line
                .get(self.content..)
                .map_or(false, |rest| !trailer_regex().is_match(rest))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InHunkHeader,
    InDiff(Columns),
}

/// A `!` entry waiting for its diff to be read
#[derive(Debug)]
struct Candidate {
    seq: u32,
    commit_a: String,
    commit_b: String,
    subject: String,
    confirmed: bool,
    possible: bool,
}

/// Parsed range-diff: the kept classifications and the twisted pairs dropped
/// from them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeDiffOutcome {
    pub patches: ClassifiedRange,
    pub twisted: Vec<ClassifiedPatch>,
}

/// Reads range-diff text and classifies its pairs.
///
/// Abbreviated shas are expanded through `repo`, which must be the working
/// copy the tool ran in. Message-only candidates that are not clear-cut are
/// settled by comparing fingerprints.
pub struct RangeDiffParser<'r> {
    repo: &'r dyn Repository,
}

impl<'r> RangeDiffParser<'r> {
    pub fn new(repo: &'r dyn Repository) -> Self {
        RangeDiffParser { repo }
    }

    pub fn parse(&self, text: &str) -> RangeDiffOutcome {
        let mut patches = ClassifiedRange::default();
        let mut state = State::Idle;
        let mut pending: Option<Candidate> = None;
        let mut seq = 0u32;

        for line in text.lines() {
            if let Some(caps) = result_line_regex().captures(line) {
                if let Some(candidate) = pending.take() {
                    patches.push(self.finalize(candidate));
                }
                seq += 1;
                let commit_a = self.expand(&caps[1]);
                let commit_b = self.expand(&caps[3]);
                let subject = caps[4].trim().to_string();

                state = State::Idle;
                match &caps[2] {
                    "=" => patches.push(ClassifiedPatch::paired(
                        seq,
                        commit_a,
                        commit_b,
                        subject,
                        Classification::Same,
                    )),
                    ">" => patches.push(ClassifiedPatch::new_in_b(seq, commit_b, subject)),
                    "<" => patches.push(ClassifiedPatch::removed_from_a(seq, commit_a, subject)),
                    _ => {
                        pending = Some(Candidate {
                            seq,
                            commit_a,
                            commit_b,
                            subject,
                            confirmed: false,
                            possible: false,
                        });
                        state = State::InHunkHeader;
                    }
                }
                continue;
            }

            let Some(candidate) = pending.as_mut() else {
                continue;
            };
            match state {
                State::Idle => {}
                State::InHunkHeader => {
                    if let Some(columns) = Columns::from_header(line) {
                        state = State::InDiff(columns);
                    }
                }
                State::InDiff(columns) => {
                    if candidate.confirmed {
                        continue;
                    }
                    if columns.is_code_change(line.as_bytes()) {
                        candidate.confirmed = true;
                    } else if !candidate.possible && columns.is_possible_change(line) {
                        candidate.possible = true;
                    }
                }
            }
        }

        if let Some(candidate) = pending.take() {
            patches.push(self.finalize(candidate));
        }

        let twisted = patches.remove_twisted();
        if !twisted.is_empty() {
            warn!(count = twisted.len(), "dropped twisted range-diff pairs");
        }
        info!(
            same = patches.same.len(),
            message_only = patches.message_only.len(),
            updated = patches.updated.len(),
            new = patches.new.len(),
            removed = patches.removed.len(),
            "range-diff classified"
        );
        RangeDiffOutcome { patches, twisted }
    }

    fn expand(&self, abbrev: &str) -> String {
        self.repo
            .resolve(abbrev)
            .unwrap_or_else(|_| abbrev.to_string())
    }

    fn finalize(&self, candidate: Candidate) -> ClassifiedPatch {
        let classification = if candidate.confirmed {
            Classification::Updated
        } else if candidate.possible {
            self.compare_fingerprints(&candidate.commit_a, &candidate.commit_b)
        } else {
            Classification::MessageOnly
        };
        debug!(
            seq = candidate.seq,
            commit_a = %candidate.commit_a,
            commit_b = %candidate.commit_b,
            %classification,
            "finalized range-diff candidate"
        );
        ClassifiedPatch::paired(
            candidate.seq,
            candidate.commit_a,
            candidate.commit_b,
            candidate.subject,
            classification,
        )
    }

    fn compare_fingerprints(&self, commit_a: &str, commit_b: &str) -> Classification {
        let fingerprint = |rev: &str| match self.repo.fingerprint(rev) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(commit = rev, error = %e, "cannot fingerprint commit");
                None
            }
        };
        match (fingerprint(commit_a), fingerprint(commit_b)) {
            (Some(a), Some(b)) if a == b => Classification::MessageOnly,
            _ => Classification::Updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::{MockCommit, MockRepository};

    fn diff(path: &str, line: &str) -> String {
        format!("diff --git a/{p} b/{p}\n--- a/{p}\n+++ b/{p}\n@@ -1 +1 @@\n{l}\n", p = path, l = line)
    }

    fn repo() -> MockRepository {
        let mut repo = MockRepository::new("work");
        for (sha, file, line) in [
            ("aaaa0001", "a.c", "+one"),
            ("aaaa0002", "b.c", "+two"),
            ("aaaa0003", "c.c", "+three"),
            ("aaaa0004", "d.c", "+four"),
            ("bbbb0001", "a.c", "+one"),
            ("bbbb0002", "b.c", "+two changed"),
            ("bbbb0003", "c.c", "+three"),
            ("bbbb0005", "e.c", "+five"),
        ] {
            repo.add_commit(MockCommit::new(format!("{}deadbeef", sha), "subject", diff(file, line)));
        }
        repo
    }

    const OUTPUT: &str = "\
1:  aaaa0001 = 1:  bbbb0001 net: first
2:  aaaa0002 ! 2:  bbbb0002 net: second
    @@ b.c
     ## b.c ##
    @@
    --two
    -+two changed
3:  aaaa0003 ! 3:  bbbb0003 net: third
    @@ Metadata
     ## Commit message ##
         net: third
    -    Signed-off-by: Old <old@example.com>
    +    Signed-off-by: New <new@example.com>
4:  aaaa0004 < -:  ------- net: fourth
-:  ------- > 4:  bbbb0005 net: fifth
";

    #[test]
    fn test_classifies_every_operator() {
        let repo = repo();
        let outcome = RangeDiffParser::new(&repo).parse(OUTPUT);
        let patches = &outcome.patches;

        assert_eq!(patches.same.len(), 1);
        assert_eq!(patches.same[0].commit_a.as_deref(), Some("aaaa0001deadbeef"));
        assert_eq!(patches.updated.len(), 1);
        assert_eq!(patches.updated[0].subject, "net: second");
        assert_eq!(patches.message_only.len(), 1);
        assert_eq!(patches.message_only[0].seq, 3);
        assert_eq!(patches.removed.len(), 1);
        assert_eq!(patches.removed[0].commit_b, None);
        assert_eq!(patches.new.len(), 1);
        assert_eq!(patches.new[0].commit_a, None);
        assert!(outcome.twisted.is_empty());

        let seqs: Vec<u32> = patches.all().iter().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_possible_change_resolved_by_fingerprint() {
        let text = "\
1:  aaaa0003 ! 1:  bbbb0003 net: third
    @@ Metadata
    -    Signed-off-by: Old <old@example.com>
    +    Signed-off-by: New <new@example.com>
    -    static int foo;
2:  aaaa0002 ! 2:  bbbb0002 net: second
    @@ Metadata
    -    Signed-off-by: Old <old@example.com>
    +    static int bar;
";
        let repo = repo();
        let outcome = RangeDiffParser::new(&repo).parse(text);
        // Same change on both sides
        assert_eq!(outcome.patches.message_only.len(), 1);
        assert_eq!(outcome.patches.message_only[0].seq, 1);
        // Different fingerprints
        assert_eq!(outcome.patches.updated.len(), 1);
        assert_eq!(outcome.patches.updated[0].seq, 2);
    }

    #[test]
    fn test_candidate_without_diff_is_message_only() {
        let repo = repo();
        let outcome = RangeDiffParser::new(&repo).parse("1:  aaaa0002 ! 1:  bbbb0002 net: second\n");
        assert_eq!(outcome.patches.message_only.len(), 1);
    }

    #[test]
    fn test_twisted_pair_dropped() {
        let text = "\
1:  aaaa0001 ! 1:  aaaa0002 one
    @@ x.c
    -+a
2:  aaaa0002 ! 2:  aaaa0001 two
    @@ x.c
    -+b
3:  aaaa0003 = 3:  bbbb0003 three
";
        let repo = repo();
        let outcome = RangeDiffParser::new(&repo).parse(text);
        assert!(outcome.patches.updated.is_empty());
        assert_eq!(outcome.twisted.len(), 2);
        assert_eq!(outcome.patches.len(), 1);
    }

    #[test]
    fn test_shared_commits_stay_same() {
        let repo = MockRepository::new("r");
        let outcome = RangeDiffParser::new(&repo).parse(
            "1:  aaaa0001 = 1:  aaaa0001 subj\n2:  aaaa0002 = 2:  bbbb0002 other\n",
        );
        assert_eq!(outcome.patches.same.len(), 2);
        assert!(outcome.twisted.is_empty());
    }

    #[test]
    fn test_twisted_pair_among_shared_commits() {
        let text = "\
1:  aaaa0003 = 1:  aaaa0003 shared one
2:  aaaa0001 ! 2:  aaaa0002 one
    @@ x.c
    -+a
3:  aaaa0002 ! 3:  aaaa0001 two
    @@ x.c
    -+b
4:  aaaa0004 = 4:  aaaa0004 shared two
-:  ------- > 5:  bbbb0005 five
";
        let repo = repo();
        let outcome = RangeDiffParser::new(&repo).parse(text);
        let patches = &outcome.patches;

        assert_eq!(patches.same.len(), 2);
        assert_eq!(patches.new.len(), 1);
        assert!(patches.updated.is_empty());
        assert_eq!(outcome.twisted.len(), 2);
        assert!(outcome.twisted.iter().all(|p| p.commit_a != p.commit_b));

        // Every pair lands in exactly one place
        let mut seqs: Vec<u32> = patches
            .all()
            .iter()
            .map(|p| p.seq)
            .chain(outcome.twisted.iter().map(|p| p.seq))
            .collect();
        seqs.sort_unstable();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_unknown_shas_are_kept_abbreviated() {
        let repo = MockRepository::new("empty");
        let outcome = RangeDiffParser::new(&repo).parse("1:  1234567 = 1:  89abcde subject\n");
        assert_eq!(outcome.patches.same[0].commit_b.as_deref(), Some("89abcde"));
    }
}
