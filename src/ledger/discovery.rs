use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LEDGER_EXTENSIONS: [&str; 2] = ["xlsx", "xlsm"];

#[derive(Debug, Clone, Serialize)]
pub struct LedgerFileInfo {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    pub modified: Option<SystemTime>,
}

/// Workbooks in `dir`, sorted by file name. Office lock files (`~$...`) are skipped.
pub fn find_ledgers(dir: &Path) -> io::Result<Vec<LedgerFileInfo>> {
    let mut found = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();

        if file_name.starts_with('~') {
            continue;
        }

        let is_ledger = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                LEDGER_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if !is_ledger {
            continue;
        }

        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }

        found.push(LedgerFileInfo {
            path,
            file_name,
            size_bytes: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }

    found.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_ledgers_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.xlsx", "a.XLSM", "~$a.xlsx", "notes.txt", "c.xls"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("d.xlsx")).unwrap();

        let found = find_ledgers(dir.path()).unwrap();
        let names: Vec<_> = found.iter().map(|f| f.file_name.as_str()).collect();

        assert_eq!(names, vec!["a.XLSM", "b.xlsx"]);
        assert_eq!(found[0].size_bytes, 1);
    }

    #[test]
    fn test_find_ledgers_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_ledgers(&dir.path().join("missing")).is_err());
    }
}
