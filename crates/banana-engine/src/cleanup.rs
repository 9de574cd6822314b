//! Finding and removing session files in one directory.
//!
//! Only files that pass strict validation are ever candidates; anything else
//! is skipped with its reason and left on disk in both modes.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use banana_contracts::error::SessionError;
use banana_contracts::events::{record_optional, EventLog, RunEvent};
use banana_contracts::models::ModelRegistry;
use banana_contracts::session::{self, SessionInfo};
use tracing::{debug, warn};

use crate::error::ScanError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    pub info: SessionInfo,
}

#[derive(Debug, Default)]
pub struct CleanupScan {
    pub candidates: Vec<Candidate>,
    pub skipped: Vec<(PathBuf, SessionError)>,
}

impl CleanupScan {
    pub fn total_bytes(&self) -> u64 {
        self.candidates.iter().map(|item| item.info.bytes).sum()
    }
}

#[derive(Debug, Default)]
pub struct CleanupOutcome {
    pub deleted: usize,
    pub freed: u64,
    pub failures: Vec<(PathBuf, std::io::Error)>,
}

pub fn scan(registry: &ModelRegistry, dir: &Path) -> Result<CleanupScan, ScanError> {
    if !dir.is_dir() {
        return Err(ScanError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }
    let paths = session::list_session_files(dir).map_err(|source| ScanError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut result = CleanupScan::default();
    for path in paths {
        match session::validate(registry, &path) {
            Ok(info) => result.candidates.push(Candidate { path, info }),
            Err(err) => {
                debug!(path = %path.display(), "not a cleanup candidate: {err}");
                result.skipped.push((path, err));
            }
        }
    }
    Ok(result)
}

/// Deletes every candidate of `scan`. A failed delete is recorded and the
/// remaining candidates are still processed.
pub fn delete_candidates(scan: &CleanupScan, events: Option<&EventLog>) -> CleanupOutcome {
    let mut outcome = CleanupOutcome::default();
    for candidate in &scan.candidates {
        match std::fs::remove_file(&candidate.path) {
            Ok(()) => {
                outcome.deleted += 1;
                outcome.freed += candidate.info.bytes;
                record_optional(
                    events,
                    RunEvent::SessionDeleted {
                        path: candidate.path.display().to_string(),
                        bytes: candidate.info.bytes,
                    },
                );
            }
            Err(err) => {
                warn!(path = %candidate.path.display(), "delete failed: {err}");
                outcome.failures.push((candidate.path.clone(), err));
            }
        }
    }
    outcome
}

pub fn render_candidates(scan: &CleanupScan) -> String {
    let mut out = String::new();
    for candidate in &scan.candidates {
        let _ = writeln!(
            out,
            "  {}  model={} turns={} size={}",
            candidate.path.display(),
            candidate.info.model_label(),
            candidate.info.turns,
            format_size(candidate.info.bytes)
        );
    }
    out
}

pub fn render_dry_run(scan: &CleanupScan) -> String {
    let mut out = format!(
        "\ndry run: {} files, {} would be freed",
        scan.candidates.len(),
        format_size(scan.total_bytes())
    );
    push_skip_count(&mut out, scan.skipped.len());
    out.push('\n');
    out
}

pub fn render_outcome(scan: &CleanupScan, outcome: &CleanupOutcome) -> String {
    let mut out = format!(
        "deleted {} files, freed {}",
        outcome.deleted,
        format_size(outcome.freed)
    );
    push_skip_count(&mut out, scan.skipped.len());
    out.push('\n');
    out
}

fn push_skip_count(out: &mut String, skipped: usize) {
    if skipped > 0 {
        let _ = write!(out, " ({skipped} skipped)");
    }
}

pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    match bytes {
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{b} B"),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    /// Three valid sessions plus one of each way a file can fail validation.
    fn populate(dir: &Path) -> anyhow::Result<()> {
        let turn = json!({"role": "user", "parts": [{"text": "hi"}]});
        fs::write(
            dir.join("a.session.json"),
            json!({"model": "flash", "history": [turn, turn, turn]}).to_string(),
        )?;
        fs::write(
            dir.join("b.session.json"),
            json!({"model": "pro-3", "size": "2K", "history": [], "usage": {"prompt_tokens": 1, "candidate_tokens": 2, "total_tokens": 3}}).to_string(),
        )?;
        fs::write(dir.join("legacy.session.json"), json!({"history": []}).to_string())?;

        fs::write(dir.join("broken.session.json"), "{\"history\": [")?;
        fs::write(
            dir.join("foreign.session.json"),
            json!({"history": [], "owner": "someone else"}).to_string(),
        )?;
        fs::write(
            dir.join("nohistory.session.json"),
            json!({"model": "flash"}).to_string(),
        )?;
        fs::write(
            dir.join("unknown.session.json"),
            json!({"model": "turbo", "history": []}).to_string(),
        )?;
        fs::write(dir.join("cat.png"), b"png")?;
        fs::create_dir(dir.join("nested.session.json"))?;
        Ok(())
    }

    fn names(paths: impl Iterator<Item = PathBuf>) -> Vec<String> {
        paths
            .filter_map(|path| path.file_name().map(|name| name.to_string_lossy().to_string()))
            .collect()
    }

    #[test]
    fn scan_separates_candidates_from_skips() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        populate(temp.path())?;

        let result = scan(&ModelRegistry::builtin(), temp.path())?;
        assert_eq!(
            names(result.candidates.iter().map(|item| item.path.clone())),
            vec!["a.session.json", "b.session.json", "legacy.session.json"]
        );
        assert_eq!(
            names(result.skipped.iter().map(|(path, _)| path.clone())),
            vec![
                "broken.session.json",
                "foreign.session.json",
                "nohistory.session.json",
                "unknown.session.json"
            ]
        );
        assert_eq!(result.candidates[0].info.turns, 2);
        assert_eq!(result.candidates[2].info.model_label(), "legacy");
        Ok(())
    }

    #[test]
    fn dry_run_deletes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        populate(temp.path())?;
        let before = fs::read_dir(temp.path())?.count();

        let result = scan(&ModelRegistry::builtin(), temp.path())?;
        let listing = render_candidates(&result);
        let footer = render_dry_run(&result);

        assert_eq!(fs::read_dir(temp.path())?.count(), before);
        assert_eq!(listing.lines().count(), 3);
        assert!(listing.contains("model=flash turns=2 size="));
        assert!(listing.contains("model=legacy turns=0"));
        assert_eq!(
            footer,
            format!(
                "\ndry run: 3 files, {} would be freed (4 skipped)\n",
                format_size(result.total_bytes())
            )
        );
        Ok(())
    }

    #[test]
    fn destructive_mode_deletes_only_valid_sessions() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        populate(temp.path())?;
        let events = EventLog::with_run_id(temp.path().join("events.jsonl"), "run-1");

        let result = scan(&ModelRegistry::builtin(), temp.path())?;
        let outcome = delete_candidates(&result, Some(&events));
        assert_eq!(outcome.deleted, 3);
        assert_eq!(outcome.freed, result.total_bytes());
        assert!(outcome.failures.is_empty());

        for name in ["a", "b", "legacy"] {
            assert!(!temp.path().join(format!("{name}.session.json")).exists());
        }
        for name in ["broken", "foreign", "nohistory", "unknown", "nested"] {
            assert!(temp.path().join(format!("{name}.session.json")).exists());
        }
        assert!(temp.path().join("cat.png").exists());

        assert_eq!(
            render_outcome(&result, &outcome),
            format!(
                "deleted 3 files, freed {} (4 skipped)\n",
                format_size(outcome.freed)
            )
        );
        let log = fs::read_to_string(temp.path().join("events.jsonl"))?;
        assert_eq!(log.matches("session_deleted").count(), 3);
        Ok(())
    }

    #[test]
    fn delete_failure_does_not_stop_the_rest() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        populate(temp.path())?;
        let mut result = scan(&ModelRegistry::builtin(), temp.path())?;
        fs::remove_file(temp.path().join("a.session.json"))?;
        result.skipped.clear();

        let outcome = delete_candidates(&result, None);
        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].0.ends_with("a.session.json"));
        assert!(!temp.path().join("b.session.json").exists());
        assert_eq!(
            render_outcome(&result, &outcome),
            format!("deleted 2 files, freed {}\n", format_size(outcome.freed))
        );
        Ok(())
    }

    #[test]
    fn scan_rejects_non_directories() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("a.session.json");
        fs::write(&file, "{}")?;
        assert!(matches!(
            scan(&ModelRegistry::builtin(), &file),
            Err(ScanError::NotADirectory { .. })
        ));
        assert!(matches!(
            scan(&ModelRegistry::builtin(), &temp.path().join("missing")),
            Err(ScanError::NotADirectory { .. })
        ));
        Ok(())
    }

    #[test]
    fn format_size_units() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }
}
