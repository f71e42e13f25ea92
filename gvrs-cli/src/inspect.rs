//! `inspect` subcommand: run [`gvrs::inspector::inspect`] and print a
//! human-readable report.

use std::path::PathBuf;

use clap::Parser;
use gvrs::inspector::Severity;

#[derive(Parser, Debug)]
#[command(about = "Check a GVRS file's record stream and directory for corruption")]
pub struct Args {
    /// Path to the GVRS file to inspect.
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

/// Runs the inspection and prints its findings. Returns the process exit
/// code: 0 clean, 1 warnings only, 2 corruption found, 3 unreadable header
/// (or the path could not be opened at all).
#[must_use]
pub fn run(args: &Args) -> u8 {
    let report = match gvrs::inspector::inspect(&args.path) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("error: could not open {}: {e}", args.path.display());
            return 3;
        }
    };

    println!("header: {}", if report.header_ok { "ok" } else { "UNREADABLE" });
    println!("records scanned: {}", report.records_scanned);
    println!("allocated bytes: {}", report.allocated_bytes);
    println!("free bytes: {}", report.free_bytes);

    if report.issues.is_empty() {
        println!("no issues found");
    } else {
        for issue in &report.issues {
            let tag = match issue.severity {
                Severity::Warning => "warning",
                Severity::Error => "error",
            };
            match issue.offset {
                Some(offset) => println!("{tag} at offset {offset}: {}", issue.message),
                None => println!("{tag}: {}", issue.message),
            }
        }
    }

    let code = report.exit_code();
    u8::try_from(code).unwrap_or(3)
}
