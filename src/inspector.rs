//! Read-only integrity inspector (`SPEC_FULL.md` §4.11): walks a file's
//! record stream independently of [`crate::file::GvrsFile`], checking
//! framing, checksums, and directory consistency without ever writing.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use crate::braf::{BufferedRandomAccessFile, RandomAccessStore};
use crate::directory::TileDirectory;
use crate::error::GvrsResult;
use crate::header::FileHeader;
use crate::record::{RecordManager, KIND_FREE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct InspectionIssue {
    pub severity: Severity,
    pub offset: Option<u64>,
    pub message: String,
}

impl InspectionIssue {
    fn error(offset: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            offset,
            message: message.into(),
        }
    }

    fn warning(offset: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            offset,
            message: message.into(),
        }
    }
}

/// The result of inspecting one file. `header_ok == false` means the scan
/// never got far enough to look at records at all.
#[derive(Debug, Clone)]
pub struct InspectionReport {
    pub header_ok: bool,
    pub records_scanned: u64,
    pub free_bytes: u64,
    pub allocated_bytes: u64,
    pub issues: Vec<InspectionIssue>,
}

impl InspectionReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// CLI exit code: 0 clean, 1 warnings only, 2 corruption found, 3 the
    /// file could not even be parsed as a GVRS header.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if !self.header_ok {
            3
        } else if self.has_errors() {
            2
        } else if !self.issues.is_empty() {
            1
        } else {
            0
        }
    }
}

/// Inspects the file at `path`. Only fails outright if `path` cannot be
/// opened at all; a malformed GVRS file still produces a report (with
/// `header_ok == false`).
pub fn inspect(path: &Path) -> GvrsResult<InspectionReport> {
    let file = File::open(path)?;
    let mut store = BufferedRandomAccessFile::new(file);
    let file_size = store.size()? as u64;

    let mut report = InspectionReport {
        header_ok: false,
        records_scanned: 0,
        free_bytes: 0,
        allocated_bytes: 0,
        issues: Vec::new(),
    };

    let (header, header_size) = match FileHeader::read(&mut store) {
        Ok(v) => v,
        Err(e) => {
            report.issues.push(InspectionIssue::error(Some(0), format!("header unreadable: {e}")));
            return Ok(report);
        }
    };
    report.header_ok = true;

    let manager = RecordManager::new(header.checksums_enabled, header_size);
    let mut seen: HashMap<u64, (i32, u64)> = HashMap::new();
    let mut pos = header_size;

    while pos < file_size {
        match manager.read_record(&mut store, pos) {
            Ok(record) => {
                if record.kind == KIND_FREE {
                    report.free_bytes += record.size;
                } else {
                    report.allocated_bytes += record.size;
                }
                seen.insert(pos, (record.kind, record.size));
                report.records_scanned += 1;
                pos += record.size;
            }
            Err(e) => {
                // The framing may be corrupt enough that `read_record` bailed
                // before we learn which tile this was. Take a best-effort
                // peek at the kind field so a corrupted tile record can still
                // be named in the report.
                let kind_hint = store
                    .seek_to(i64::try_from(pos + 4).unwrap_or(i64::MAX))
                    .ok()
                    .and_then(|()| store.read_i32().ok());
                let message = match kind_hint {
                    Some(kind) if kind >= 0 => format!("{e} (tile index {kind})"),
                    _ => e.to_string(),
                };
                report.issues.push(InspectionIssue::error(Some(pos), message));
                break;
            }
        }
    }
    // spec.md §3 invariant: sum of free + allocated record sizes equals
    // fileSize - headerSize. `pos` already tracks header_size plus every
    // scanned record's size, so this is equivalent to `pos == file_size`,
    // but stated this way to match the documented invariant directly and
    // to report the actual byte counts rather than just an offset.
    let accounted = report.free_bytes + report.allocated_bytes;
    let expected = file_size - header_size;
    if accounted != expected {
        report.issues.push(InspectionIssue::error(
            Some(pos),
            format!(
                "free ({}) + allocated ({}) bytes = {accounted}, expected {expected} \
                 (fileSize {file_size} - headerSize {header_size})",
                report.free_bytes, report.allocated_bytes
            ),
        ));
    }

    if header.directory_record_offset != 0 {
        match seen.get(&header.directory_record_offset) {
            None => report.issues.push(InspectionIssue::error(
                Some(header.directory_record_offset),
                "header's directory offset does not point at any record found during the scan",
            )),
            Some(_) => {
                if let Ok(record) = manager.read_record(&mut store, header.directory_record_offset) {
                    let mut payload_store =
                        BufferedRandomAccessFile::new(std::io::Cursor::new(record.payload));
                    match TileDirectory::restore(&mut payload_store) {
                        Ok(directory) => check_directory_consistency(&directory, &seen, &mut report),
                        Err(e) => report.issues.push(InspectionIssue::error(
                            Some(header.directory_record_offset),
                            format!("directory record could not be decoded: {e}"),
                        )),
                    }
                }
            }
        }
    }

    Ok(report)
}

fn check_directory_consistency(
    directory: &TileDirectory,
    seen: &HashMap<u64, (i32, u64)>,
    report: &mut InspectionReport,
) {
    let Some((row0, row1, col0, col1)) = directory.populated_bounds() else {
        return;
    };
    let n_cols_of_tiles = directory.n_cols_of_tiles();
    for tile_row in row0..=row1 {
        for tile_col in col0..=col1 {
            let tile_index = tile_row * n_cols_of_tiles + tile_col;
            if !directory.has(tile_index) {
                continue;
            }
            let offset = directory.get(tile_index);
            match seen.get(&offset) {
                None => report.issues.push(InspectionIssue::error(
                    Some(offset),
                    format!("tile {tile_index}'s directory entry points outside the scanned record stream"),
                )),
                Some(&(kind, _)) if kind != tile_index as i32 => {
                    report.issues.push(InspectionIssue::error(
                        Some(offset),
                        format!("tile {tile_index}'s record has kind {kind}, expected {tile_index}"),
                    ));
                }
                Some(_) => {}
            }
        }
    }
}
