//! Durable log of committed units of work.
//!
//! Each frame is `[u32 len][bincode Commit][u32 crc32]` and holds every event
//! of one unit of work, so replay applies a unit entirely or not at all.
//! The log only ever contains commits whose callers were told they succeeded:
//! a failed group commit is cut off again before anything else is written.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Commit;

/// The byte sink under a [`Wal`]. Implemented for `File`; tests supply
/// in-memory logs that fail on demand.
pub trait LogFile: Send {
    fn append(&mut self, buf: &[u8]) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
    /// Cut the log back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.sync_all()
    }
}

fn encode_frame(out: &mut Vec<u8>, commit: &Commit) -> io::Result<()> {
    let payload =
        bincode::serialize(commit).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "commit too large for one frame"))?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&payload);
    out.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

/// Read frames until the first torn or corrupt one.
/// Returns the decoded commits and the byte length of the intact prefix.
fn read_frames(reader: impl Read) -> io::Result<(Vec<Commit>, u64)> {
    let mut reader = BufReader::new(reader);
    let mut commits = Vec::new();
    let mut intact = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        // A garbage length must not turn into a giant allocation.
        let mut body = Vec::new();
        (&mut reader).take(len as u64 + 4).read_to_end(&mut body)?;
        if body.len() < len + 4 {
            break;
        }
        let (payload, crc) = body.split_at(len);
        if crc != crc32fast::hash(payload).to_le_bytes() {
            break;
        }
        let Ok(commit) = bincode::deserialize::<Commit>(payload) else {
            break;
        };
        commits.push(commit);
        intact += 8 + len as u64;
    }

    Ok((commits, intact))
}

/// Append-only log with staged group commit.
///
/// Units of work are [`stage`](Wal::stage)d into memory and written together
/// by [`commit_staged`](Wal::commit_staged). If that write or its sync fails,
/// the log is truncated back to the last durable length; if even that fails,
/// the log is poisoned and refuses further commits until compaction rewrites it.
pub struct Wal {
    log: Box<dyn LogFile>,
    path: PathBuf,
    staged: Vec<u8>,
    staged_commits: u64,
    durable_len: u64,
    poisoned: bool,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path` and recover its commits.
    /// A torn or corrupt tail is cut off so new frames follow the intact prefix.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Commit>)> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let on_disk = file.metadata()?.len();
        let (commits, intact) = read_frames(&mut file)?;
        if intact < on_disk {
            warn!(
                "WAL {}: discarding {} bytes of torn tail after {} commits",
                path.display(),
                on_disk - intact,
                commits.len()
            );
            LogFile::truncate(&mut file, intact)?;
        }
        Ok((Self::with_log(path, Box::new(file), intact), commits))
    }

    /// A log over an arbitrary sink already holding `durable_len` good bytes.
    pub fn with_log(path: &Path, log: Box<dyn LogFile>, durable_len: u64) -> Self {
        Self {
            log,
            path: path.to_path_buf(),
            staged: Vec::new(),
            staged_commits: 0,
            durable_len,
            poisoned: false,
            appends_since_compact: 0,
        }
    }

    /// Read every intact commit at `path` without opening it for writing.
    pub fn replay(path: &Path) -> io::Result<Vec<Commit>> {
        match File::open(path) {
            Ok(file) => Ok(read_frames(file)?.0),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Decode commits from raw log bytes.
    pub fn replay_bytes(bytes: &[u8]) -> io::Result<Vec<Commit>> {
        Ok(read_frames(bytes)?.0)
    }

    /// Queue one unit of work for the next [`commit_staged`](Wal::commit_staged).
    /// A commit that fails to encode leaves nothing staged.
    pub fn stage(&mut self, commit: &Commit) -> io::Result<()> {
        self.check_poisoned()?;
        let mut frame = Vec::new();
        encode_frame(&mut frame, commit)?;
        self.staged.extend_from_slice(&frame);
        self.staged_commits += 1;
        Ok(())
    }

    /// Write and sync everything staged. All staged commits become durable
    /// together or none of them reach the log.
    pub fn commit_staged(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        if self.staged.is_empty() {
            return Ok(());
        }
        let bytes = std::mem::take(&mut self.staged);
        let commits = std::mem::take(&mut self.staged_commits);

        match self.log.append(&bytes).and_then(|()| self.log.sync()) {
            Ok(()) => {
                self.durable_len += bytes.len() as u64;
                self.appends_since_compact += commits;
                Ok(())
            }
            Err(e) => {
                if let Err(cut) = self.log.truncate(self.durable_len) {
                    error!(
                        "WAL {}: rollback to {} bytes failed after write error ({e}): {cut}",
                        self.path.display(),
                        self.durable_len
                    );
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    /// Stage and commit a single unit of work.
    pub fn append(&mut self, commit: &Commit) -> io::Result<()> {
        self.stage(commit)?;
        self.commit_staged()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `commits`: write them to a sibling temp file, sync,
    /// rename over the log and reopen. Clears poisoning, since the new file is
    /// built from applied state only.
    pub fn compact(&mut self, commits: &[Commit]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut bytes = Vec::new();
        for commit in commits {
            encode_frame(&mut bytes, commit)?;
        }
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        self.log = Box::new(file);
        self.staged.clear();
        self.staged_commits = 0;
        self.durable_len = bytes.len() as u64;
        self.poisoned = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL poisoned after a failed rollback"));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// How the next write to a [`MemoryLog`] misbehaves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Fault {
        /// Write `n` bytes of the buffer, then fail.
        TornWrite(usize),
        /// Write everything, then fail the sync.
        FailSync,
    }

    #[derive(Default)]
    struct Inner {
        bytes: Vec<u8>,
        fault: Option<Fault>,
        truncate_fails: bool,
    }

    /// Shared in-memory log; clones see the same bytes.
    #[derive(Clone, Default)]
    pub struct MemoryLog(Arc<Mutex<Inner>>);

    impl MemoryLog {
        pub fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().bytes.clone()
        }

        /// Fail the next commit with `fault`.
        pub fn fail_next(&self, fault: Fault) {
            self.0.lock().unwrap().fault = Some(fault);
        }

        pub fn break_truncate(&self) {
            self.0.lock().unwrap().truncate_fails = true;
        }

        pub fn wal(&self) -> Wal {
            let len = self.bytes().len() as u64;
            Wal::with_log(Path::new("memory.wal"), Box::new(self.clone()), len)
        }
    }

    impl LogFile for MemoryLog {
        fn append(&mut self, buf: &[u8]) -> io::Result<()> {
            let mut inner = self.0.lock().unwrap();
            let torn = match inner.fault {
                Some(Fault::TornWrite(n)) => Some(n),
                _ => None,
            };
            match torn {
                Some(n) => {
                    inner.fault = None;
                    inner.bytes.extend_from_slice(&buf[..n.min(buf.len())]);
                    Err(io::Error::new(io::ErrorKind::WriteZero, "disk full"))
                }
                None => {
                    inner.bytes.extend_from_slice(buf);
                    Ok(())
                }
            }
        }

        fn sync(&mut self) -> io::Result<()> {
            let mut inner = self.0.lock().unwrap();
            if inner.fault == Some(Fault::FailSync) {
                inner.fault = None;
                return Err(io::Error::other("fsync failed"));
            }
            Ok(())
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            let mut inner = self.0.lock().unwrap();
            if inner.truncate_fails {
                return Err(io::Error::other("read-only filesystem"));
            }
            inner.bytes.truncate(len as usize);
            Ok(())
        }
    }
}
