use std::collections::VecDeque;
use std::io::Write as _;
use std::sync::{mpsc, Mutex};
use std::time::Duration;

// Terminal output is owned by one thread: a repainted status line at the
// bottom, log lines scrolling above it. Everything any other thread wants
// on stderr goes through an OutputSink.

pub(crate) fn init(start: std::time::Instant, enable_status: bool) -> TermHandle {
    let (sender, receiver) = mpsc::channel();

    let join_handle = std::thread::Builder::new()
        .name("term out".into())
        .spawn(move || thread_main(start, enable_status, receiver))
        .expect("failed to spawn thread");

    TermHandle {
        join_handle,
        sender,
    }
}

const REPAINT_PERIOD: Duration = Duration::from_millis(50);

enum Command {
    Finish,
    RawLine(Vec<u8>),
    SetStatus(String),
    FreezeStatus,
}

pub(crate) struct TermHandle {
    join_handle: std::thread::JoinHandle<()>,
    sender: mpsc::Sender<Command>,
}

impl TermHandle {
    pub(crate) fn finish(self) {
        self.sender
            .send(Command::Finish)
            .expect("terminal thread endpoint closed");
        self.join_handle.join().expect("terminal thread panicked");
    }

    pub(crate) fn sink(&self) -> OutputSink {
        OutputSink {
            sender: self.sender.clone(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct OutputSink {
    sender: mpsc::Sender<Command>,
}

impl OutputSink {
    /// A sink with nothing behind it; sends are silently dropped.
    pub(crate) fn null() -> Self {
        let (sender, _) = mpsc::channel();
        Self { sender }
    }

    pub(crate) fn set_status(&self, status: String) {
        let _ = self.sender.send(Command::SetStatus(status));
    }

    pub(crate) fn freeze_status(&self) {
        let _ = self.sender.send(Command::FreezeStatus);
    }

    pub(crate) fn print_line(&self, line: Vec<u8>) {
        let _ = self.sender.send(Command::RawLine(line));
    }
}

fn thread_main(
    start: std::time::Instant,
    enable_status: bool,
    receiver: mpsc::Receiver<Command>,
) {
    let mut status = None::<String>;
    let mut last_paint = start;
    let mut dirty = false;
    let mut stderr = std::io::stderr();

    loop {
        let mut timeout = None;
        if status.is_some() {
            if dirty {
                timeout = Some(REPAINT_PERIOD.saturating_sub(last_paint.elapsed()));
            } else {
                timeout = Some(to_next_second(start.elapsed()));
            }
        }

        let cmd = if let Some(timeout) = timeout {
            if timeout.is_zero() {
                Err(mpsc::RecvTimeoutError::Timeout)
            } else {
                receiver.recv_timeout(timeout)
            }
        } else {
            receiver.recv().map_err(|e| e.into())
        };

        match cmd {
            Ok(Command::Finish) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(ref status) = status {
                    if dirty {
                        paint_status(&mut stderr, start, status);
                    }
                    expect_io(crossterm::queue!(
                        stderr,
                        crossterm::style::Print('\n'),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                    expect_io(stderr.flush());
                }
                break;
            }
            Ok(Command::RawLine(line)) => {
                if status.is_some() {
                    expect_io(crossterm::queue!(
                        stderr,
                        crossterm::terminal::Clear(crossterm::terminal::ClearType::CurrentLine),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                    expect_io(stderr.write_all(&line));
                    if !line.ends_with(b"\n") {
                        expect_io(stderr.write_all(b"\n"));
                    }
                    if let Some(ref status) = status {
                        paint_status(&mut stderr, start, status);
                    }
                } else {
                    expect_io(stderr.write_all(&line));
                    if !line.ends_with(b"\n") {
                        expect_io(stderr.write_all(b"\n"));
                    }
                }
                expect_io(stderr.flush());
            }
            Ok(Command::SetStatus(new_status)) => {
                if enable_status {
                    if last_paint.elapsed() >= REPAINT_PERIOD {
                        paint_status(&mut stderr, start, &new_status);
                        expect_io(stderr.flush());
                        last_paint = std::time::Instant::now();
                        status = Some(new_status);
                        dirty = false;
                    } else {
                        status = Some(new_status);
                        dirty = true;
                    }
                }
            }
            Ok(Command::FreezeStatus) => {
                if let Some(ref status) = status {
                    if dirty {
                        paint_status(&mut stderr, start, status);
                    }
                    expect_io(crossterm::queue!(
                        stderr,
                        crossterm::style::Print('\n'),
                        crossterm::cursor::MoveToColumn(0),
                    ));
                    expect_io(stderr.flush());
                }
                status = None;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(ref status) = status {
                    paint_status(&mut stderr, start, status);
                    expect_io(stderr.flush());
                }
                last_paint = std::time::Instant::now();
                dirty = false;
            }
        }
    }
}

fn paint_status(stderr: &mut std::io::Stderr, start: std::time::Instant, status: &str) {
    let elapsed = start.elapsed().as_secs();
    let line = format!(
        "[{:02}:{:02}:{:02}] {status}",
        elapsed / 3600,
        (elapsed / 60) % 60,
        elapsed % 60,
    );
    expect_io(crossterm::queue!(
        stderr,
        crossterm::cursor::MoveToColumn(0),
        crossterm::style::Print(line),
        crossterm::terminal::Clear(crossterm::terminal::ClearType::UntilNewLine),
    ));
}

fn expect_io<T>(r: std::io::Result<T>) -> T {
    r.expect("stderr write failed")
}

fn to_next_second(elapsed: Duration) -> Duration {
    let subsec_nanos = elapsed.subsec_nanos();
    if subsec_nanos == 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos((1_000_000_000 - subsec_nanos).into())
    }
}

/// Revision-ordered log release. Commit production completes out of
/// order across branches, but every line attributed to revision N is
/// held until all lower revisions have released theirs, so the tail of
/// the log always names the causative revision. A slot stays open while
/// the decoder is inside the revision and while commit jobs planned for
/// it are still in flight.
pub(crate) struct LogSequencer {
    sink: OutputSink,
    state: Mutex<SequencerState>,
}

#[derive(Default)]
struct SequencerState {
    open: VecDeque<RevSlot>,
}

struct RevSlot {
    rev: u64,
    lines: Vec<Vec<u8>>,
    closed: bool,
    /// Commit jobs planned for this revision that have not finished.
    pending: usize,
}

impl LogSequencer {
    pub(crate) fn new(sink: OutputSink) -> Self {
        Self {
            sink,
            state: Mutex::new(SequencerState::default()),
        }
    }

    /// Begins buffering for `rev`. Revisions must be opened in ascending
    /// order (the decoder thread owns this).
    pub(crate) fn open_rev(&self, rev: u64) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.open.iter().all(|slot| slot.rev < rev));
        state.open.push_back(RevSlot {
            rev,
            lines: Vec::new(),
            closed: false,
            pending: 0,
        });
    }

    /// Queues a line on behalf of `rev`; lines without a revision go
    /// straight through when nothing is buffering.
    pub(crate) fn line(&self, rev: Option<u64>, line: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        let slot = match rev {
            Some(rev) => state.open.iter_mut().find(|slot| slot.rev == rev),
            None => state.open.back_mut(),
        };
        match slot {
            Some(slot) => slot.lines.push(line),
            None => self.sink.print_line(line),
        }
    }

    /// Registers one in-flight commit job for `rev`; called by the
    /// decoder thread while the slot is still open.
    pub(crate) fn add_pending(&self, rev: u64) {
        let mut state = self.state.lock().unwrap();
        match state.open.iter_mut().find(|slot| slot.rev == rev) {
            Some(slot) => slot.pending += 1,
            None => debug_assert!(false, "add_pending on unopened revision"),
        }
    }

    /// A commit job for `rev` finished (or was dropped on failure).
    pub(crate) fn complete(&self, rev: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.open.iter_mut().find(|slot| slot.rev == rev) {
            debug_assert!(slot.pending > 0);
            slot.pending = slot.pending.saturating_sub(1);
        }
        self.release_ready(&mut state);
    }

    /// The decoder left `rev`; the slot releases once its jobs are done.
    pub(crate) fn close_rev(&self, rev: u64) {
        let mut state = self.state.lock().unwrap();
        if let Some(slot) = state.open.iter_mut().find(|slot| slot.rev == rev) {
            slot.closed = true;
        }
        self.release_ready(&mut state);
    }

    fn release_ready(&self, state: &mut SequencerState) {
        while state
            .open
            .front()
            .is_some_and(|slot| slot.closed && slot.pending == 0)
        {
            let slot = state.open.pop_front().unwrap();
            for line in slot.lines {
                self.sink.print_line(line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{LogSequencer, OutputSink};
    use std::sync::mpsc;

    fn collecting_sink() -> (OutputSink, mpsc::Receiver<super::Command>) {
        let (sender, receiver) = mpsc::channel();
        (OutputSink { sender }, receiver)
    }

    fn drain(receiver: &mpsc::Receiver<super::Command>) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        while let Ok(cmd) = receiver.try_recv() {
            if let super::Command::RawLine(line) = cmd {
                lines.push(line);
            }
        }
        lines
    }

    #[test]
    fn lines_release_in_revision_order() {
        let (sink, receiver) = collecting_sink();
        let seq = LogSequencer::new(sink);

        seq.open_rev(1);
        seq.open_rev(2);
        seq.open_rev(3);

        seq.line(Some(2), b"r2 line".to_vec());
        seq.line(Some(1), b"r1 line".to_vec());
        seq.line(Some(3), b"r3 line".to_vec());

        // closing out of order releases nothing early
        seq.close_rev(3);
        seq.close_rev(2);
        assert!(drain(&receiver).is_empty());

        seq.close_rev(1);
        assert_eq!(
            drain(&receiver),
            [
                b"r1 line".to_vec(),
                b"r2 line".to_vec(),
                b"r3 line".to_vec(),
            ],
        );
    }

    #[test]
    fn untagged_lines_flush_directly_when_idle() {
        let (sink, receiver) = collecting_sink();
        let seq = LogSequencer::new(sink);

        seq.line(None, b"startup".to_vec());
        assert_eq!(drain(&receiver), [b"startup".to_vec()]);
    }

    #[test]
    fn pending_jobs_hold_the_slot_open() {
        let (sink, receiver) = collecting_sink();
        let seq = LogSequencer::new(sink);

        seq.open_rev(1);
        seq.add_pending(1);
        seq.close_rev(1);

        seq.open_rev(2);
        seq.close_rev(2);

        // r1's commit job is still in flight; nothing may release
        seq.line(Some(1), b"r1 commit".to_vec());
        assert!(drain(&receiver).is_empty());

        seq.complete(1);
        assert_eq!(
            drain(&receiver),
            [b"r1 commit".to_vec()],
        );
    }
}
