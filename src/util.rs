//! Common utility functions and types.

use std::{ffi, fs, io, path};

use crate::{err_at, Error, Result};

#[macro_export]
macro_rules! read_file {
    ($fd:expr, $seek:expr, $n:expr, $msg:expr) => {{
        use std::convert::TryFrom;

        match $fd.seek($seek) {
            Ok(_) => {
                let mut buf = vec![0; usize::try_from($n).unwrap()];
                match $fd.read(&mut buf) {
                    Ok(n) if buf.len() == n => Ok(buf),
                    Ok(n) => {
                        let m = buf.len();
                        err_at!(Fatal, msg: concat!($msg, " {}/{} at {:?}"), m, n, $seek)
                    }
                    Err(err) => err_at!(IOError, Err(err)),
                }
            }
            Err(err) => err_at!(IOError, Err(err)),
        }
    }};
}

/// Create a file for writing, along with any missing parent directory.
/// Fails if the file already exists.
pub fn create_file_w(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);

    {
        let parent = match os_file.parent() {
            Some(parent) => Ok(parent),
            None => err_at!(InvalidFile, msg: "{:?}", file),
        }?;
        err_at!(IOError, fs::create_dir_all(parent))?;
    };

    let mut opts = fs::OpenOptions::new();
    Ok(err_at!(
        IOError,
        opts.write(true).create_new(true).open(os_file)
    )?)
}

/// Open file for reading.
pub fn open_file_r(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    Ok(err_at!(
        IOError,
        fs::OpenOptions::new().read(true).open(os_file)
    )?)
}

/// Size of the file, follows symlinks.
pub fn file_size(file: &ffi::OsStr) -> Result<u64> {
    let md = err_at!(IOError, fs::metadata(file), "{:?}", file)?;
    Ok(md.len())
}

/// Final path component as a string, when it is valid unicode.
pub fn basename(file: &ffi::OsStr) -> Option<String> {
    let file = path::Path::new(file).file_name()?;
    Some(file.to_str()?.to_string())
}

/// Compact local timestamp, RFC3339 stripped of separators, 15 chars.
pub fn strnow() -> String {
    chrono::Local::now().format("%Y%m%dT%H%M%S").to_string()
}

/// Writer adaptor counting the bytes written through it.
pub struct CountWriter<W> {
    w: W,
    n: u64,
}

impl<W> CountWriter<W> {
    pub fn new(w: W) -> CountWriter<W> {
        CountWriter { w, n: 0 }
    }

    pub fn to_count(&self) -> u64 {
        self.n
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

impl<W: io::Write> io::Write for CountWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.w.write(buf)?;
        self.n += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}
