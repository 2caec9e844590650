use crate::error::LedgerError;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Entry every Office Open XML package must carry
pub const MANIFEST_ENTRY: &str = "[Content_Types].xml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub entries: usize,
    pub backup: Option<PathBuf>,
}

/// Re-pack a workbook container in place.
///
/// Every readable entry is extracted and written to a fresh archive next to
/// the original, which then replaces it. Fails without touching the original
/// if the manifest entry is missing or the archive cannot be read.
pub fn repair_container(path: &Path, backup: bool) -> Result<RepairReport, LedgerError> {
    let failed = |details: String| LedgerError::RepairFailed {
        path: path.to_path_buf(),
        details,
    };

    let entries = read_entries(path).map_err(failed)?;
    if !entries.iter().any(|(name, _)| name == MANIFEST_ENTRY) {
        return Err(failed(format!("missing {}", MANIFEST_ENTRY)));
    }

    let backup_path = if backup {
        let target = sibling(path, ".backup");
        fs::copy(path, &target)
            .map_err(|e| failed(format!("backup to {} failed: {}", target.display(), e)))?;
        info!("Backed up ledger to {}", target.display());
        Some(target)
    } else {
        None
    };

    let staging = sibling(path, ".repair");
    if let Err(details) = write_entries(&staging, &entries) {
        let _ = fs::remove_file(&staging);
        return Err(failed(details));
    }

    fs::rename(&staging, path).map_err(|e| {
        let _ = fs::remove_file(&staging);
        failed(format!("replacing original failed: {}", e))
    })?;

    info!("Repaired ledger {} ({} entries)", path.display(), entries.len());

    Ok(RepairReport {
        entries: entries.len(),
        backup: backup_path,
    })
}

fn read_entries(path: &Path) -> Result<Vec<(String, Vec<u8>)>, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut archive = ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry {}: {}", index, e);
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let mut contents = Vec::new();
        match entry.read_to_end(&mut contents) {
            Ok(_) => entries.push((name, contents)),
            Err(e) => warn!("Skipping corrupt entry {}: {}", name, e),
        }
    }

    Ok(entries)
}

fn write_entries(target: &Path, entries: &[(String, Vec<u8>)]) -> Result<(), String> {
    let file = File::create(target).map_err(|e| e.to_string())?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, contents) in entries {
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| format!("{}: {}", name, e))?;
        writer
            .write_all(contents)
            .map_err(|e| format!("{}: {}", name, e))?;
    }

    writer.finish().map_err(|e| e.to_string())?;
    Ok(())
}

/// `<path><suffix>`, keeping the original extension
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
