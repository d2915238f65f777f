//! Best-effort, append-only record of allocations for offline inspection.
//!
//! One line per successful allocation:
//!
//! ```text
//! [October 17 2026][14:03] malloc'd 24 bytes at address 0x7f3a5c001030
//! ```
//!
//! Any failure to open or write the file is ignored.

use core::{cell::Cell, ffi::c_char, fmt, ptr::null_mut};
use std::{
  fs::{File, OpenOptions},
  io::{self, BufRead, BufReader, Write},
  path::Path,
};

use crate::lock::SpinLock;

/// Serializes writers so concurrent lines never interleave.
static LOG_LOCK: SpinLock<()> = SpinLock::new(());

thread_local! {
  // Opening and writing the file may allocate, which may land back here.
  static IN_LOG: Cell<bool> = const { Cell::new(false) };
}

pub(crate) fn record(path: &Path, ptr: *mut u8, size: usize) {
  let Ok(busy) = IN_LOG.try_with(|flag| flag.replace(true)) else {
    return;
  };
  if busy {
    return;
  }

  let _ = append(path, ptr, size);

  let _ = IN_LOG.try_with(|flag| flag.set(false));
}

fn append(path: &Path, ptr: *mut u8, size: usize) -> io::Result<()> {
  let mut file = OpenOptions::new().create(true).append(true).open(path)?;
  let mut stamp = [0u8; 64];
  let stamp = timestamp(&mut stamp);

  let _guard = LOG_LOCK.lock();
  writeln!(
    file,
    "{stamp} malloc'd {size} byte{} at address {ptr:p}",
    if size <= 1 { "" } else { "s" }
  )?;
  file.flush()
}

/// Local time as `[%B %d %Y][%H:%M]`. Empty if the clock cannot be read.
fn timestamp(buf: &mut [u8; 64]) -> &str {
  let len = unsafe {
    let now = libc::time(null_mut());
    let mut tm: libc::tm = core::mem::zeroed();
    if libc::localtime_r(&now, &mut tm).is_null() {
      return "";
    }
    libc::strftime(
      buf.as_mut_ptr() as *mut c_char,
      buf.len(),
      c"[%B %d %Y][%H:%M]".as_ptr(),
      &tm,
    )
  };
  core::str::from_utf8(&buf[..len]).unwrap_or("")
}

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
  pub timestamp: String,
  pub size: usize,
  pub address: usize,
}

impl LogRecord {
  pub fn parse(line: &str) -> Option<Self> {
    let (stamp, rest) = line.split_once(" malloc'd ")?;
    let (size, rest) = rest.split_once(' ')?;
    let (_, address) = rest.split_once(" at address ")?;
    let address = address.trim().strip_prefix("0x")?;
    Some(Self {
      timestamp: stamp.to_owned(),
      size: size.parse().ok()?,
      address: usize::from_str_radix(address, 16).ok()?,
    })
  }
}

impl fmt::Display for LogRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{:#x} {} byte{}",
      self.address,
      self.size,
      if self.size <= 1 { "" } else { "s" }
    )
  }
}

/// Every well-formed record in the log at `path`. Malformed lines are skipped.
pub fn read_log(path: &Path) -> io::Result<Vec<LogRecord>> {
  let reader = BufReader::new(File::open(path)?);
  let mut records = Vec::new();
  for line in reader.lines() {
    if let Some(record) = LogRecord::parse(&line?) {
      records.push(record);
    }
  }
  Ok(records)
}
