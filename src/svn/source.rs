use std::collections::VecDeque;
use std::ffi::OsString;
use std::io::{Read as _, Seek as _};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

#[derive(Debug)]
pub(crate) enum OpenError {
    Metadata {
        path: PathBuf,
        error: std::io::Error,
    },
    Open {
        path: PathBuf,
        error: std::io::Error,
    },
    Read {
        path: PathBuf,
        error: std::io::Error,
    },
    Seek {
        path: PathBuf,
        error: std::io::Error,
    },
    Spawn {
        arg0: OsString,
        error: std::io::Error,
    },
}

impl std::fmt::Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metadata { path, error } => {
                write!(f, "failed to fetch metadata for {path:?}: {error}")
            }
            Self::Open { path, error } => write!(f, "failed to open {path:?}: {error}"),
            Self::Read { path, error } => write!(f, "failed to read {path:?}: {error}"),
            Self::Seek { path, error } => write!(f, "failed to seek {path:?}: {error}"),
            Self::Spawn { arg0, error } => write!(f, "failed to spawn {arg0:?}: {error}"),
        }
    }
}

/// One opened dump input. A directory is dumped through `svnadmin`; a file
/// is sniffed for compression magic and decompressed on a feeder thread.
pub(crate) enum DumpInput {
    Feeder(
        std::thread::JoinHandle<Result<(), std::io::Error>>,
        std::io::BufReader<ChunkReader>,
    ),
    Command(
        std::process::Child,
        std::io::BufReader<std::process::ChildStdout>,
    ),
}

const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const BZIP2_MAGIC: &[u8] = b"BZh";
const XZ_MAGIC: &[u8] = &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const LZ4_MAGIC: &[u8] = &[0x04, 0x22, 0x4D, 0x18];

impl DumpInput {
    pub(crate) fn open(path: &std::path::Path) -> Result<Self, OpenError> {
        let meta = std::fs::metadata(path).map_err(|e| OpenError::Metadata {
            path: path.to_path_buf(),
            error: e,
        })?;
        if meta.file_type().is_dir() {
            let mut child = std::process::Command::new("svnadmin")
                .arg("dump")
                .arg(path)
                .arg("-q")
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::inherit())
                .spawn()
                .map_err(|e| OpenError::Spawn {
                    arg0: "svnadmin".into(),
                    error: e,
                })?;
            let stdout = child.stdout.take().unwrap();
            Ok(Self::Command(child, std::io::BufReader::new(stdout)))
        } else {
            let mut file = std::fs::OpenOptions::new()
                .read(true)
                .open(path)
                .map_err(|e| OpenError::Open {
                    path: path.to_path_buf(),
                    error: e,
                })?;

            const HEADER_SIZE: usize = 6;

            let mut header = Vec::<u8>::with_capacity(HEADER_SIZE);
            while header.len() < HEADER_SIZE {
                let mut buf = [0; HEADER_SIZE];
                match file.read(&mut buf[..(HEADER_SIZE - header.len())]) {
                    Ok(0) => break,
                    Ok(n) => header.extend(&buf[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        return Err(OpenError::Read {
                            path: path.to_path_buf(),
                            error: e,
                        });
                    }
                }
            }

            file.seek(std::io::SeekFrom::Start(0))
                .map_err(|e| OpenError::Seek {
                    path: path.to_path_buf(),
                    error: e,
                })?;

            let (reader, mut writer) = chunk_pipe();

            let feeder = std::thread::Builder::new()
                .name("dump input".into())
                .spawn(move || {
                    if header.starts_with(ZSTD_MAGIC) {
                        zstd::stream::copy_decode(&file, &mut writer)?;
                    } else if header.starts_with(GZIP_MAGIC) {
                        let mut decoder = flate2::read::GzDecoder::new(&file);
                        std::io::copy(&mut decoder, &mut writer)?;
                    } else if header.starts_with(BZIP2_MAGIC) {
                        let mut decoder = bzip2::read::BzDecoder::new(&file);
                        std::io::copy(&mut decoder, &mut writer)?;
                    } else if header.starts_with(XZ_MAGIC) {
                        liblzma::copy_decode(&file, &mut writer)?;
                    } else if header.starts_with(LZ4_MAGIC) {
                        let mut decoder = lz4_flex::frame::FrameDecoder::new(&file);
                        std::io::copy(&mut decoder, &mut writer)?;
                    } else {
                        std::io::copy(&mut file, &mut writer)?;
                    }
                    Ok(())
                })
                .expect("failed to spawn thread");

            Ok(Self::Feeder(feeder, std::io::BufReader::new(reader)))
        }
    }

    pub(crate) fn stream(&mut self) -> &mut dyn std::io::BufRead {
        match self {
            Self::Feeder(_, reader) => reader,
            Self::Command(_, stdout) => stdout,
        }
    }

    pub(crate) fn close(self) -> Result<(), std::io::Error> {
        match self {
            Self::Feeder(feeder, reader) => {
                drop(reader);
                match feeder.join() {
                    Ok(r) => r,
                    Err(e) => std::panic::resume_unwind(e),
                }
            }
            Self::Command(mut child, _) => {
                let exit_code = child.wait()?;
                if exit_code.success() {
                    Ok(())
                } else {
                    Err(std::io::Error::other(format!(
                        "svnadmin exited with {exit_code}"
                    )))
                }
            }
        }
    }
}

// A bounded in-process pipe moving whole chunks between the feeder thread
// and the decoder. Chunk granularity keeps the feeder's large writes from
// being re-copied byte by byte.

const PIPE_MAX_CHUNKS: usize = 16;
const PIPE_CHUNK_SIZE: usize = 64 * 1024;

struct PipeShared {
    chunks: Mutex<PipeState>,
    condvar: Condvar,
}

struct PipeState {
    closed: bool,
    queue: VecDeque<Vec<u8>>,
}

pub(crate) struct ChunkReader {
    shared: Arc<PipeShared>,
    current: Vec<u8>,
    pos: usize,
}

pub(crate) struct ChunkWriter {
    shared: Arc<PipeShared>,
    pending: Vec<u8>,
}

fn chunk_pipe() -> (ChunkReader, ChunkWriter) {
    let shared = Arc::new(PipeShared {
        chunks: Mutex::new(PipeState {
            closed: false,
            queue: VecDeque::new(),
        }),
        condvar: Condvar::new(),
    });

    (
        ChunkReader {
            shared: shared.clone(),
            current: Vec::new(),
            pos: 0,
        },
        ChunkWriter {
            shared,
            pending: Vec::with_capacity(PIPE_CHUNK_SIZE),
        },
    )
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        let mut state = self.shared.chunks.lock().unwrap();
        if !state.closed {
            state.closed = true;
            self.shared.condvar.notify_all();
        }
    }
}

impl std::io::Read for ChunkReader {
    fn read(&mut self, dest: &mut [u8]) -> std::io::Result<usize> {
        if self.pos == self.current.len() {
            let mut state = self.shared.chunks.lock().unwrap();
            loop {
                if let Some(chunk) = state.queue.pop_front() {
                    if state.queue.len() == PIPE_MAX_CHUNKS - 1 {
                        self.shared.condvar.notify_all();
                    }
                    self.current = chunk;
                    self.pos = 0;
                    break;
                }
                if state.closed {
                    return Ok(0);
                }
                state = self.shared.condvar.wait(state).unwrap();
            }
        }

        let to_read = dest.len().min(self.current.len() - self.pos);
        dest[..to_read].copy_from_slice(&self.current[self.pos..(self.pos + to_read)]);
        self.pos += to_read;
        Ok(to_read)
    }
}

impl ChunkWriter {
    fn push_pending(&mut self) -> std::io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut state = self.shared.chunks.lock().unwrap();
        loop {
            if state.closed {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
            }
            if state.queue.len() < PIPE_MAX_CHUNKS {
                let was_empty = state.queue.is_empty();
                state
                    .queue
                    .push_back(std::mem::replace(&mut self.pending, Vec::with_capacity(PIPE_CHUNK_SIZE)));
                if was_empty {
                    self.shared.condvar.notify_all();
                }
                return Ok(());
            }
            state = self.shared.condvar.wait(state).unwrap();
        }
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        let _ = self.push_pending();
        let mut state = self.shared.chunks.lock().unwrap();
        if !state.closed {
            state.closed = true;
            self.shared.condvar.notify_all();
        }
    }
}

impl std::io::Write for ChunkWriter {
    fn write(&mut self, src: &[u8]) -> std::io::Result<usize> {
        let room = PIPE_CHUNK_SIZE - self.pending.len();
        let to_write = src.len().min(room);
        self.pending.extend(&src[..to_write]);
        if self.pending.len() == PIPE_CHUNK_SIZE {
            self.push_pending()?;
        }
        Ok(to_write)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.push_pending()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};

    use super::chunk_pipe;

    #[test]
    fn pipe_moves_data_across_threads() {
        let (mut reader, mut writer) = chunk_pipe();

        let feeder = std::thread::spawn(move || {
            for i in 0..1000u32 {
                writer.write_all(&i.to_le_bytes()).unwrap();
            }
            // writer dropped here, closing the pipe
        });

        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        feeder.join().unwrap();

        assert_eq!(data.len(), 4000);
        assert_eq!(&data[..4], &0u32.to_le_bytes());
        assert_eq!(&data[3996..], &999u32.to_le_bytes());
    }

    #[test]
    fn reader_drop_unblocks_writer() {
        let (reader, mut writer) = chunk_pipe();

        let feeder = std::thread::spawn(move || {
            let big = vec![0u8; 1024 * 1024];
            loop {
                if writer.write_all(&big).is_err() {
                    break;
                }
            }
        });

        std::thread::sleep(std::time::Duration::from_millis(10));
        drop(reader);
        feeder.join().unwrap();
    }
}
