use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};

use gix_hash::ObjectId;

use super::{message, BranchId, CommitId, ConvertError};
use crate::authors::Author;
use crate::git::ObjectStore;
use crate::output::LogSequencer;

// The commit stage: planned commits arrive in planning order and are
// queued per branch. Workers drain the queues with the branch as the
// serialization unit, so commits of one branch finish in order while
// branches proceed concurrently. A job only references commits planned
// before it; a branch whose front job still waits for a parent id is
// parked and re-examined whenever any id binds, so a stuck branch never
// occupies a worker.

/// Everything stage 3 needs to finish one commit: the bound tree, the
/// graph edges by commit index, and the message inputs that depend on
/// parent ids (cherry-pick annotations, Change-Id).
pub(crate) struct CommitJob {
    pub(super) commit: CommitId,
    pub(super) branch: BranchId,
    pub(super) rev: u64,
    pub(super) refname: String,
    pub(super) tree: ObjectId,
    pub(super) first_parent: Option<CommitId>,
    pub(super) merge_parents: Vec<CommitId>,
    pub(super) cherry_picks: Vec<CherrySeed>,
    pub(super) body: Vec<u8>,
    pub(super) author: Author,
    pub(super) timestamp: i64,
    pub(super) revision_id: Option<u64>,
    pub(super) change_id: bool,
}

pub(super) struct CherrySeed {
    pub(super) commit: CommitId,
    pub(super) branch_path: Vec<u8>,
    pub(super) rev: u64,
}

/// Parent/annotation ids of a job, looked up at dispatch time; a job is
/// only handed to a worker once all of them are bound.
struct ResolvedIds {
    first_parent: Option<ObjectId>,
    merge_parents: Vec<ObjectId>,
    cherry_picks: Vec<ObjectId>,
}

struct Shared {
    state: Mutex<State>,
    work_cond: Condvar,
    drain_cond: Condvar,
}

struct State {
    /// Commit index -> bound id, in planning order.
    ids: Vec<Option<ObjectId>>,
    queues: HashMap<BranchId, VecDeque<CommitJob>>,
    /// Branches whose front job should be examined for dispatch.
    ready: VecDeque<BranchId>,
    /// Branches whose front job waits on an unbound parent id.
    stalled: Vec<BranchId>,
    /// Branches a worker currently owns.
    busy: HashSet<BranchId>,
    /// Queued plus in-flight jobs.
    pending: usize,
    closed: bool,
    failed: bool,
}

pub(crate) struct CommitPipeline {
    shared: Arc<Shared>,
}

impl CommitPipeline {
    /// Spawns the commit workers onto `scope`. The workers exit once the
    /// pipeline is closed and drained; the scope joins them.
    pub(crate) fn start<'scope, 'env>(
        scope: &'scope std::thread::Scope<'scope, 'env>,
        store: &'env dyn ObjectStore,
        sequencer: &'env LogSequencer,
        workers: usize,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                ids: Vec::new(),
                queues: HashMap::new(),
                ready: VecDeque::new(),
                stalled: Vec::new(),
                busy: HashSet::new(),
                pending: 0,
                closed: false,
                failed: false,
            }),
            work_cond: Condvar::new(),
            drain_cond: Condvar::new(),
        });

        for i in 0..workers.max(1) {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name(format!("commit worker {i}"))
                .spawn_scoped(scope, move || worker_main(&shared, store, sequencer))
                .expect("failed to spawn thread");
        }

        Self { shared }
    }

    /// Queues a planned commit on its branch's FIFO. Jobs must arrive in
    /// planning order and may only reference earlier commits.
    pub(super) fn dispatch(&self, sequencer: &LogSequencer, job: CommitJob) {
        let mut state = self.shared.state.lock().unwrap();
        assert_eq!(state.ids.len(), job.commit, "jobs must arrive in planning order");
        state.ids.push(None);

        if state.failed {
            // draining after an error; the id stays unbound
            return;
        }

        sequencer.add_pending(job.rev);
        state.pending += 1;

        let branch = job.branch;
        let queue = state.queues.entry(branch).or_default();
        let was_empty = queue.is_empty();
        queue.push_back(job);
        if was_empty && !state.busy.contains(&branch) {
            state.ready.push_back(branch);
            self.shared.work_cond.notify_one();
        }
    }

    /// True once any commit failed; the builder stops planning new work.
    pub(super) fn failed(&self) -> bool {
        self.shared.state.lock().unwrap().failed
    }

    /// Closes the pipeline, waits for every queued commit, and returns
    /// the bound id of every planned commit in planning order.
    pub(super) fn finish(&self) -> Result<Vec<ObjectId>, ConvertError> {
        let mut state = self.shared.state.lock().unwrap();
        state.closed = true;
        self.shared.work_cond.notify_all();
        while state.pending != 0 {
            state = self.shared.drain_cond.wait(state).unwrap();
        }

        if state.failed {
            tracing::error!("commit stage failed");
            return Err(ConvertError);
        }
        Ok(state
            .ids
            .iter()
            .map(|id| id.expect("drained pipeline has every id bound"))
            .collect())
    }
}

impl Drop for CommitPipeline {
    fn drop(&mut self) {
        // an abandoned pipeline (builder error) lets in-flight work
        // finish and releases the workers
        let mut state = self.shared.state.lock().unwrap();
        state.closed = true;
        self.shared.work_cond.notify_all();
    }
}

enum Action {
    Work(CommitJob, ResolvedIds),
    /// Revisions of jobs dropped after a failure; their log slots still
    /// have to be released.
    Cleanup(Vec<u64>),
    Exit,
}

fn worker_main(shared: &Shared, store: &dyn ObjectStore, sequencer: &LogSequencer) {
    loop {
        let action = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.failed && !state.queues.is_empty() {
                    let mut revs = Vec::new();
                    for (_, queue) in state.queues.drain() {
                        revs.extend(queue.iter().map(|job| job.rev));
                    }
                    state.pending -= revs.len();
                    state.ready.clear();
                    state.stalled.clear();
                    shared.drain_cond.notify_all();
                    break Action::Cleanup(revs);
                }

                if !state.failed {
                    if let Some((job, resolved)) = pick_job(&mut state) {
                        break Action::Work(job, resolved);
                    }
                }

                if state.closed && state.pending == 0 {
                    break Action::Exit;
                }
                state = shared.work_cond.wait(state).unwrap();
            }
        };

        match action {
            Action::Exit => return,
            Action::Cleanup(revs) => {
                for rev in revs {
                    sequencer.complete(rev);
                }
            }
            Action::Work(job, resolved) => {
                let result = build_commit(store, sequencer, &job, &resolved);

                let mut state = shared.state.lock().unwrap();
                state.busy.remove(&job.branch);
                state.pending -= 1;
                match result {
                    Ok(id) => state.ids[job.commit] = Some(id),
                    Err(()) => state.failed = true,
                }

                // a freshly bound id may unblock any parked branch
                let stalled = std::mem::take(&mut state.stalled);
                state.ready.extend(stalled);
                let has_more = state
                    .queues
                    .get(&job.branch)
                    .is_some_and(|queue| !queue.is_empty());
                if has_more {
                    state.ready.push_back(job.branch);
                } else {
                    state.queues.remove(&job.branch);
                }
                shared.work_cond.notify_all();
                shared.drain_cond.notify_all();
                drop(state);

                sequencer.complete(job.rev);
            }
        }
    }
}

fn pick_job(state: &mut State) -> Option<(CommitJob, ResolvedIds)> {
    for _ in 0..state.ready.len() {
        let branch = state.ready.pop_front().unwrap();
        if state.busy.contains(&branch) {
            continue;
        }
        let Some(front) = state.queues.get(&branch).and_then(|queue| queue.front()) else {
            continue;
        };

        match resolve_ids(&state.ids, front) {
            Some(resolved) => {
                let job = state
                    .queues
                    .get_mut(&branch)
                    .unwrap()
                    .pop_front()
                    .unwrap();
                state.busy.insert(branch);
                return Some((job, resolved));
            }
            None => state.stalled.push(branch),
        }
    }
    None
}

fn resolve_ids(ids: &[Option<ObjectId>], job: &CommitJob) -> Option<ResolvedIds> {
    let first_parent = match job.first_parent {
        Some(idx) => Some(ids[idx]?),
        None => None,
    };
    let merge_parents = job
        .merge_parents
        .iter()
        .map(|&idx| ids[idx])
        .collect::<Option<Vec<_>>>()?;
    let cherry_picks = job
        .cherry_picks
        .iter()
        .map(|seed| ids[seed.commit])
        .collect::<Option<Vec<_>>>()?;

    Some(ResolvedIds {
        first_parent,
        merge_parents,
        cherry_picks,
    })
}

fn build_commit(
    store: &dyn ObjectStore,
    sequencer: &LogSequencer,
    job: &CommitJob,
    resolved: &ResolvedIds,
) -> Result<ObjectId, ()> {
    let mut parents: smallvec::SmallVec<[ObjectId; 1]> = smallvec::SmallVec::new();
    parents.extend(resolved.first_parent);
    parents.extend(resolved.merge_parents.iter().copied());

    let cherry_notes: Vec<message::CherryPickNote> = job
        .cherry_picks
        .iter()
        .zip(resolved.cherry_picks.iter())
        .map(|(seed, &id)| message::CherryPickNote {
            commit: id,
            branch: seed.branch_path.clone(),
            rev: seed.rev,
        })
        .collect();

    let message_text = message::decorate_message(
        job.body.clone(),
        &message::Decorations {
            revision_id: job.revision_id,
            cherry_picks: &cherry_notes,
            change_id_seed: job.change_id.then(|| message::ChangeIdSeed {
                parents: parents.as_slice(),
                author_name: &job.author.name,
                author_email: &job.author.email,
                timestamp: job.timestamp,
            }),
        },
    );

    let signature = gix_actor::Signature {
        name: job.author.name.clone().into(),
        email: job.author.email.clone().into(),
        time: gix_date::Time {
            seconds: job.timestamp,
            offset: 0,
            sign: gix_date::time::Sign::Plus,
        },
    };

    let commit = gix_object::Commit {
        tree: job.tree,
        parents: parents.clone(),
        author: signature.clone(),
        committer: signature,
        encoding: None,
        message: message_text.into(),
        extra_headers: Vec::new(),
    };

    let id = store.put_commit(&commit).map_err(|e| {
        tracing::error!("failed to store commit for r{}: {e}", job.rev);
    })?;

    sequencer.line(
        Some(job.rev),
        format!("r{} {}: commit {id}", job.rev, job.refname).into_bytes(),
    );
    Ok(id)
}
