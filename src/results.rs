//! Writing run results.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::engine::RunResult;
use crate::error::{SimError, SimResult};

/// Writes the flat metric mapping of `result` to `path` as pretty JSON,
/// creating parent directories as needed.
///
/// # Errors
///
/// `Io` if a directory or the file cannot be written.
pub fn dump_results(result: &RunResult, path: &Path) -> SimResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(&result.flat())
        .map_err(|e| SimError::internal(format!("cannot serialize results: {e}")))?;
    fs::write(path, body)?;
    info!(path = %path.display(), run_id = %result.run_id, "results written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    #[test]
    fn test_dump_creates_directories_and_flattens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/output/results.json");
        let result = RunResult {
            run_id: Uuid::new_v4(),
            draw: 7,
            run_time: 1.5,
            ticks: 12,
            metrics: BTreeMap::from([("deaths".to_string(), 3.0)]),
        };

        dump_results(&result, &path).unwrap();

        let written: BTreeMap<String, f64> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.len(), 3);
        assert!((written["deaths"] - 3.0).abs() < f64::EPSILON);
        assert!((written["draw"] - 7.0).abs() < f64::EPSILON);
        assert!((written["simulation_run_time"] - 1.5).abs() < f64::EPSILON);
    }
}
