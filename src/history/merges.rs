use std::collections::{BTreeSet, HashMap, VecDeque};

use super::{Branch, BranchId, CommitId, CommitNode};
use crate::config::RecreateMerges;
use crate::svn::mergeinfo::Mergeinfo;

/// Maps a mergeinfo delta on a branch root to the set of commits it
/// declares merged. Sources resolve through the svn-path history of all
/// branches; a source deeper than a branch root is a file/subdir merge
/// and obeys the file-merge switch.
pub(super) fn gather_svn_merges(
    commits: &[CommitNode],
    branches: &[Branch],
    path_commits: &HashMap<Vec<u8>, Vec<(u64, CommitId)>>,
    branch: BranchId,
    delta: &Mergeinfo,
    recreate: &RecreateMerges,
) -> BTreeSet<CommitId> {
    let mut merged = BTreeSet::new();

    for (src_path, ranges) in delta.iter() {
        // longest branch path that owns the source
        let Some((owner_path, is_exact)) = find_owner(branches, src_path) else {
            continue;
        };

        let enabled = if is_exact {
            recreate.branch_merge
        } else {
            recreate.file_merge
        };
        if !enabled {
            continue;
        }

        let Some(located) = path_commits.get(owner_path) else {
            continue;
        };

        for &(rev, commit) in located.iter() {
            if commits[commit].branch == branch {
                // merges from itself carry no information
                continue;
            }
            let inheritable = ranges
                .spans()
                .iter()
                .any(|span| span.inheritable && span.start <= rev && rev <= span.end);
            if inheritable {
                merged.insert(commit);
            }
        }
    }

    merged
}

fn find_owner<'a>(branches: &'a [Branch], src_path: &[u8]) -> Option<(&'a [u8], bool)> {
    let mut best: Option<&[u8]> = None;
    for branch in branches.iter() {
        let p = branch.svn_path.as_slice();
        let covers = src_path == p
            || (src_path.len() > p.len()
                && src_path.starts_with(p)
                && src_path[p.len()] == b'/');
        if covers && best.map_or(true, |b| p.len() > b.len()) {
            best = Some(p);
        }
    }
    best.map(|p| (p, p.len() == src_path.len()))
}

pub(super) struct MergeAnalysis {
    /// Commits to add as extra parents.
    pub(super) merges: BTreeSet<CommitId>,
    /// Declared merges whose range coverage has gaps; annotated instead
    /// of merged.
    pub(super) cherrypicks: BTreeSet<CommitId>,
}

/// Decides which declared merges become parent edges. A declared merge
/// survives only if everything between it and the already-merged history
/// is covered too (commits marked not-required-in-mergeinfo may be
/// skipped); otherwise it degrades to a cherry-pick annotation.
///
/// `pending_added` is the declared-merge set of the commit being built
/// (it has no [`CommitNode`] yet); `forced` are copy-derived edges that
/// bypass the coverage check.
pub(super) fn resolve_merge_parents(
    commits: &[CommitNode],
    parent: Option<CommitId>,
    pending_added: &BTreeSet<CommitId>,
    forced: &BTreeSet<CommitId>,
) -> MergeAnalysis {
    let mut merged_history = BTreeSet::new();
    let mut inherited_cherrypicks = BTreeSet::new();

    // everything reachable through first parents and resolved merges
    let mut visit_queue = VecDeque::new();
    visit_queue.extend(parent);
    while let Some(mut commit) = visit_queue.pop_front() {
        while merged_history.insert(commit) {
            inherited_cherrypicks.extend(&commits[commit].cherrypicks);
            visit_queue.extend(&commits[commit].merges);

            commit = match commits[commit].parent {
                Some(p) => p,
                None => break,
            };
        }
    }

    // declared merges accumulated along this branch's own history
    let mut declared = pending_added.clone();
    let mut history_commit = parent;
    while let Some(commit) = history_commit {
        declared.extend(&commits[commit].added_svn_merges);
        history_commit = commits[commit].parent;
    }

    let mut merges = BTreeSet::new();
    let mut cherrypicks = BTreeSet::new();

    let mut absorb = |merge: CommitId,
                      merged_history: &mut BTreeSet<CommitId>,
                      merges: &mut BTreeSet<CommitId>,
                      inherited_cherrypicks: &mut BTreeSet<CommitId>| {
        merges.insert(merge);
        merged_history.insert(merge);
        inherited_cherrypicks.extend(&commits[merge].cherrypicks);

        let mut queue = VecDeque::new();
        queue.extend(commits[merge].parent);
        queue.extend(commits[merge].merges.iter().copied());
        while let Some(mut commit) = queue.pop_front() {
            loop {
                if !merged_history.insert(commit) {
                    // an already-known ancestor cannot stay a separate
                    // merge parent
                    merges.remove(&commit);
                    break;
                }
                inherited_cherrypicks.extend(&commits[commit].cherrypicks);
                merges.remove(&commit);
                queue.extend(commits[commit].merges.iter().copied());
                commit = match commits[commit].parent {
                    Some(p) => p,
                    None => break,
                };
            }
        }
    };

    for &forced_merge in forced.iter() {
        if !merged_history.contains(&forced_merge) {
            absorb(
                forced_merge,
                &mut merged_history,
                &mut merges,
                &mut inherited_cherrypicks,
            );
        }
    }

    // ascending commit order: older declared merges resolve first, newer
    // ones then see them in merged_history
    for &declared_merge in declared.iter() {
        if merged_history.contains(&declared_merge) {
            continue;
        }

        let coverage_ok = match parent {
            None => false,
            Some(parent) => {
                if commits[declared_merge].tail != commits[parent].tail {
                    // unrelated histories never fast-merge
                    false
                } else {
                    let mut cursor = declared_merge;
                    loop {
                        let Some(up) = commits[cursor].parent else {
                            break false;
                        };
                        cursor = up;

                        if merged_history.contains(&cursor) {
                            break true;
                        }
                        if !commits[cursor].required_in_mergeinfo {
                            // missing from mergeinfo but carrying only
                            // ignorable changes; not a gap
                            continue;
                        }

                        let is_merge = !commits[cursor].merges.is_empty()
                            || !commits[cursor].cherrypicks.is_empty();
                        if is_merge
                            && commits[cursor].merges.is_subset(&merged_history)
                            && commits[cursor].cherrypicks.is_subset(&merged_history)
                        {
                            // a merge whose sources are all part of our
                            // history closes no gap
                            continue;
                        }

                        break false;
                    }
                }
            }
        };

        if coverage_ok {
            absorb(
                declared_merge,
                &mut merged_history,
                &mut merges,
                &mut inherited_cherrypicks,
            );
        } else {
            cherrypicks.insert(declared_merge);
        }
    }

    // inherited annotations are not repeated, merged commits are not
    // cherry-picks
    for inherited in inherited_cherrypicks.iter() {
        cherrypicks.remove(inherited);
    }
    for merged in merged_history.iter() {
        cherrypicks.remove(merged);
    }

    MergeAnalysis {
        merges,
        cherrypicks,
    }
}

/// True when `ancestor` is reachable from `descendant` through any
/// parent kind; drives the single-branch fast-forward rule.
pub(super) fn is_ancestor(
    commits: &[CommitNode],
    ancestor: CommitId,
    descendant: CommitId,
) -> bool {
    if ancestor == descendant {
        return true;
    }

    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(descendant);
    while let Some(commit) = queue.pop_front() {
        if commit == ancestor {
            return true;
        }
        if !seen.insert(commit) {
            continue;
        }
        // commit ids grow over time, nothing below `ancestor` can reach it
        if commit < ancestor {
            continue;
        }
        queue.extend(commits[commit].parent);
        queue.extend(commits[commit].merges.iter().copied());
    }
    false
}
