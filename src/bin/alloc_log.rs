//! Prints the records of an allocation log, one per line.
//!
//! Usage: `alloc-log [PATH]`. Without a path, `SHARDHEAP_LOG_FILE` is used.

use std::{env, path::PathBuf, process::ExitCode};

use shardheap::{config::ENV_LOG_FILE, read_log};

fn main() -> ExitCode {
  let Some(path) = env::args_os()
    .nth(1)
    .or_else(|| env::var_os(ENV_LOG_FILE))
    .map(PathBuf::from)
  else {
    eprintln!("usage: alloc-log [PATH] (or set {ENV_LOG_FILE})");
    return ExitCode::FAILURE;
  };

  match read_log(&path) {
    Ok(records) => {
      for record in records {
        println!("{record}");
      }
      ExitCode::SUCCESS
    }
    Err(err) => {
      eprintln!("{}: {err}", path.display());
      ExitCode::FAILURE
    }
  }
}
