//! Output artifact: the captured records as a pretty-printed JSON array.

use crate::error::Result;
use crate::interceptor::CapturedRecord;
use std::path::Path;

/// Write records to `path` as a JSON array with 2-space indentation.
pub fn write_results(path: &Path, records: &[CapturedRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read records back from an output file.
pub fn read_results(path: &Path) -> Result<Vec<CapturedRecord>> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
