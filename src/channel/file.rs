//! File-backed channel: regular files, pipes, and terminals.

use std::fs::{File, OpenOptions};
use std::io::{IsTerminal, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

use super::{Caps, ChannelBackend};

pub(super) struct FileBackend {
    file: File,
    caps: Caps,
}

fn classify(file: &File, rw: Caps) -> Caps {
    let mut caps = rw;
    if let Ok(meta) = file.metadata() {
        if meta.is_file() {
            caps |= Caps::REGULAR_FILE | Caps::SEEK;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if meta.file_type().is_fifo() {
                caps |= Caps::PIPE;
            }
        }
    }
    if file.is_terminal() {
        caps |= Caps::TTY;
    }
    caps
}

impl FileBackend {
    pub(super) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let caps = classify(&file, Caps::READ);
        Ok(FileBackend { file, caps })
    }

    pub(super) fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let caps = classify(&file, Caps::READ | Caps::WRITE);
        Ok(FileBackend { file, caps })
    }

    pub(super) fn from_file(file: File, rw: Caps) -> Self {
        let caps = classify(&file, rw & (Caps::READ | Caps::WRITE));
        FileBackend { file, caps }
    }
}

impl ChannelBackend for FileBackend {
    fn caps(&self) -> Caps {
        self.caps
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file.write(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }

    fn poll(&mut self, _timeout: Option<Duration>) -> Result<bool> {
        // Regular files and blocking pipes are always "ready"; the
        // read itself blocks in the kernel if it has to.
        Ok(true)
    }

    fn close(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }
}
