//! Spend estimates derived from session files and the registry's price table.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use banana_contracts::error::SessionError;
use banana_contracts::models::{ModelRegistry, PRICES_COLLECTED};
use banana_contracts::session::{self, Usage};
use tracing::debug;

use crate::error::ScanError;

const FALLBACK_SIZE: &str = "1K";

#[derive(Debug, Clone, PartialEq)]
pub struct CostBreakdown {
    pub file: String,
    /// Canonical name when the registry knows the model, otherwise as stored.
    pub model: String,
    pub size: String,
    /// False when the session predates size tracking and `size` is assumed.
    pub size_from_data: bool,
    pub turns: usize,
    pub output_images: usize,
    pub usage: Option<Usage>,
    pub input_cost: f64,
    pub output_cost: f64,
    pub image_cost: f64,
    pub total: f64,
    pub priced: bool,
}

impl CostBreakdown {
    fn model_label(&self) -> &str {
        if self.model.is_empty() {
            "legacy"
        } else {
            &self.model
        }
    }
}

pub fn analyze(registry: &ModelRegistry, path: &Path) -> Result<CostBreakdown, SessionError> {
    let (session, _) = session::read(path)?;

    let output_images = session::model_turns(&session.history)
        .flat_map(|turn| turn.parts.iter())
        .filter(|part| part.has_image_data())
        .count();
    let definition = registry.resolve(&session.model).ok();
    let size_from_data = session.declared_size().is_some();
    let size = session
        .declared_size()
        .map(str::to_string)
        .or_else(|| definition.map(|model| model.base_size().to_string()))
        .unwrap_or_else(|| FALLBACK_SIZE.to_string());

    let mut breakdown = CostBreakdown {
        file: path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        model: definition
            .map(|model| model.name.clone())
            .unwrap_or_else(|| session.model.clone()),
        size,
        size_from_data,
        turns: session.turn_count(),
        output_images,
        usage: session.usage,
        input_cost: 0.0,
        output_cost: 0.0,
        image_cost: 0.0,
        total: 0.0,
        priced: definition.is_some(),
    };

    let Some(model) = definition else {
        debug!(path = %path.display(), model = %session.model, "no prices for model");
        return Ok(breakdown);
    };
    if let Some(usage) = session.usage {
        breakdown.input_cost = usage.prompt_tokens as f64 * model.input_per_mtok / 1_000_000.0;
        breakdown.output_cost =
            usage.candidate_tokens as f64 * model.output_per_mtok / 1_000_000.0;
    }
    breakdown.image_cost = output_images as f64 * model.image_price(&breakdown.size);
    breakdown.total = breakdown.input_cost + breakdown.output_cost + breakdown.image_cost;
    Ok(breakdown)
}

#[derive(Debug, Default)]
pub struct DirectoryCost {
    pub rows: Vec<CostBreakdown>,
    pub skipped: Vec<(PathBuf, SessionError)>,
}

impl DirectoryCost {
    pub fn total(&self) -> f64 {
        self.rows.iter().map(|row| row.total).sum()
    }

    pub fn images(&self) -> usize {
        self.rows.iter().map(|row| row.output_images).sum()
    }

    pub fn unpriced(&self) -> usize {
        self.rows.iter().filter(|row| !row.priced).count()
    }
}

/// Breaks down every session file in `dir`. Files that fail to read are
/// collected in `skipped` instead of failing the whole directory.
pub fn analyze_dir(registry: &ModelRegistry, dir: &Path) -> Result<DirectoryCost, ScanError> {
    if !dir.is_dir() {
        return Err(ScanError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }
    let paths = session::list_session_files(dir).map_err(|source| ScanError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut report = DirectoryCost::default();
    for path in paths {
        match analyze(registry, &path) {
            Ok(row) => report.rows.push(row),
            Err(err) => report.skipped.push((path, err)),
        }
    }
    Ok(report)
}

pub fn render_file(breakdown: &CostBreakdown) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "model:   {}", breakdown.model_label());
    let _ = writeln!(out, "turns:   {}", breakdown.turns);

    match (breakdown.usage, breakdown.priced) {
        (Some(usage), true) => {
            let _ = writeln!(
                out,
                "input:   {} tokens (${})",
                format_token_count(usage.prompt_tokens),
                format_cost(breakdown.input_cost)
            );
            let _ = writeln!(
                out,
                "output:  {} tokens (${})",
                format_token_count(usage.candidate_tokens),
                format_cost(breakdown.output_cost)
            );
        }
        (Some(usage), false) => {
            let _ = writeln!(out, "input:   {} tokens", format_token_count(usage.prompt_tokens));
            let _ = writeln!(
                out,
                "output:  {} tokens",
                format_token_count(usage.candidate_tokens)
            );
        }
        (None, _) => {
            let _ = writeln!(out, "tokens:  no data");
        }
    }

    if breakdown.priced {
        let assumed = if breakdown.size_from_data { "" } else { " (assumed)" };
        let _ = writeln!(
            out,
            "images:  {} @ {}{} (${})",
            breakdown.output_images,
            breakdown.size,
            assumed,
            format_cost(breakdown.image_cost)
        );
        let _ = writeln!(out, "total:   ~${}", format_cost(breakdown.total));
    } else {
        let _ = writeln!(out, "images:  {}", breakdown.output_images);
        let _ = writeln!(out, "total:   unknown (unrecognized model)");
    }

    let _ = write!(out, "\nprices collected {PRICES_COLLECTED}\n");
    out
}

/// One row per session, then the directory total.
pub fn render_dir(report: &DirectoryCost) -> String {
    let mut out = String::new();
    for row in &report.rows {
        let size = if row.size_from_data {
            row.size.clone()
        } else {
            format!("{}?", row.size)
        };
        let cost = if row.priced {
            format!("~${}", format_cost(row.total))
        } else {
            "?".to_string()
        };
        let _ = writeln!(
            out,
            "  {:<30} {:<10} {:<3} turns={:<3} images={:<3} {}",
            row.file,
            row.model_label(),
            size,
            row.turns,
            row.output_images,
            cost
        );
    }

    let _ = write!(
        out,
        "\n  total: {} sessions, {} images, ~${}",
        report.rows.len(),
        report.images(),
        format_cost(report.total())
    );
    let unpriced = report.unpriced();
    if unpriced > 0 {
        let _ = write!(out, " ({unpriced} unpriced)");
    }
    let _ = write!(out, "\n\nprices collected {PRICES_COLLECTED}\n");
    out
}

/// Sub-cent amounts keep four decimals so they don't print as 0.00.
pub fn format_cost(usd: f64) -> String {
    if usd < 0.01 {
        format!("{usd:.4}")
    } else {
        format!("{usd:.2}")
    }
}

pub fn format_token_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use banana_contracts::session::{write_new, Part, Role, Session, Turn};

    use super::*;

    fn session(model: &str, size: Option<&str>, images: usize, usage: Option<Usage>) -> Session {
        let mut history = Vec::new();
        for idx in 0..images {
            history.push(Turn::new(Role::User, vec![Part::text(format!("prompt {idx}"))]));
            history.push(Turn::new(
                Role::Model,
                vec![Part::text("ok"), Part::image("image/png", b"png-bytes")],
            ));
        }
        Session {
            model: model.to_string(),
            size: size.map(str::to_string),
            history,
            usage,
        }
    }

    fn usage(prompt: u64, candidate: u64) -> Option<Usage> {
        Some(Usage {
            prompt_tokens: prompt,
            candidate_tokens: candidate,
            total_tokens: prompt + candidate,
        })
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn analyze_prices_tokens_and_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("cat.session.json");
        write_new(&path, &session("pro", Some("4K"), 2, usage(1_000_000, 500_000)), false)?;

        let breakdown = analyze(&ModelRegistry::builtin(), &path)?;
        assert_eq!(breakdown.file, "cat.session.json");
        assert_eq!(breakdown.model, "pro-3");
        assert!(breakdown.size_from_data);
        assert_eq!(breakdown.turns, 2);
        assert_eq!(breakdown.output_images, 2);
        assert!(breakdown.priced);
        assert_close(breakdown.input_cost, 2.0);
        assert_close(breakdown.output_cost, 6.0);
        assert_close(breakdown.image_cost, 0.48);
        assert_close(breakdown.total, 8.48);
        Ok(())
    }

    #[test]
    fn legacy_session_without_usage_still_gets_image_cost() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("old.session.json");
        write_new(&path, &session("flash-2.5", None, 3, None), false)?;

        let breakdown = analyze(&ModelRegistry::builtin(), &path)?;
        assert_eq!(breakdown.size, "1K");
        assert!(!breakdown.size_from_data);
        assert_eq!(breakdown.input_cost, 0.0);
        assert_close(breakdown.image_cost, 3.0 * 0.039);

        let text = render_file(&breakdown);
        assert!(text.contains("tokens:  no data\n"));
        assert!(text.contains("images:  3 @ 1K (assumed) ($0.12)\n"));
        assert!(text.contains("total:   ~$0.12\n"));
        assert!(text.ends_with(&format!("\nprices collected {PRICES_COLLECTED}\n")));
        Ok(())
    }

    #[test]
    fn usage_without_images_costs_tokens_only() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("talk.session.json");
        let mut text_only = session("flash", None, 0, usage(2_000, 1_000));
        text_only.history.push(Turn::new(Role::User, vec![Part::text("hi")]));
        text_only.history.push(Turn::new(Role::Model, vec![Part::text("hello")]));
        write_new(&path, &text_only, false)?;

        let breakdown = analyze(&ModelRegistry::builtin(), &path)?;
        assert_eq!(breakdown.output_images, 0);
        assert_eq!(breakdown.image_cost, 0.0);
        assert!(breakdown.input_cost > 0.0);
        assert!(breakdown.output_cost > 0.0);

        let text = render_file(&breakdown);
        assert!(text.contains("input:   2,000 tokens ($0.0010)\n"));
        assert!(text.contains("output:  1,000 tokens ($0.0030)\n"));
        Ok(())
    }

    #[test]
    fn unknown_model_is_unpriced_not_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("odd.session.json");
        write_new(&path, &session("turbo-9", Some("2K"), 1, usage(10, 20)), false)?;

        let breakdown = analyze(&ModelRegistry::builtin(), &path)?;
        assert!(!breakdown.priced);
        assert_eq!(breakdown.model, "turbo-9");
        assert_eq!(breakdown.total, 0.0);
        assert_eq!(breakdown.output_images, 1);

        let text = render_file(&breakdown);
        assert!(text.contains("input:   10 tokens\n"));
        assert!(text.contains("images:  1\n"));
        assert!(text.contains("total:   unknown (unrecognized model)\n"));
        Ok(())
    }

    #[test]
    fn analyze_propagates_read_errors() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("bad.session.json");
        std::fs::write(&path, "{ nope")?;
        assert!(matches!(
            analyze(&ModelRegistry::builtin(), &path),
            Err(SessionError::Parse { .. })
        ));
        Ok(())
    }

    #[test]
    fn directory_totals_skip_corrupt_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_new(
            &temp.path().join("a.session.json"),
            &session("pro-3", Some("2K"), 1, None),
            false,
        )?;
        write_new(
            &temp.path().join("b.session.json"),
            &session("mystery", None, 2, None),
            false,
        )?;
        std::fs::write(temp.path().join("c.session.json"), "garbage")?;
        std::fs::write(temp.path().join("d.png"), "not a session")?;

        let report = analyze_dir(&ModelRegistry::builtin(), temp.path())?;
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].0.ends_with("c.session.json"));
        assert_eq!(report.images(), 3);
        assert_eq!(report.unpriced(), 1);
        assert_close(report.total(), 0.134);

        let text = render_dir(&report);
        let lines = text.lines().collect::<Vec<&str>>();
        assert_eq!(
            lines[0],
            format!(
                "  {:<30} {:<10} {:<3} turns={:<3} images={:<3} {}",
                "a.session.json", "pro-3", "2K", 1, 1, "~$0.13"
            )
        );
        assert!(lines[1].contains("mystery") && lines[1].contains("1K?") && lines[1].ends_with(" ?"));
        assert!(text.contains("\n  total: 2 sessions, 3 images, ~$0.13 (1 unpriced)\n"));
        Ok(())
    }

    #[test]
    fn analyze_dir_requires_a_directory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let file = temp.path().join("x.session.json");
        std::fs::write(&file, "{}")?;
        assert!(matches!(
            analyze_dir(&ModelRegistry::builtin(), &file),
            Err(ScanError::NotADirectory { .. })
        ));
        Ok(())
    }

    #[test]
    fn formatting_helpers() {
        assert_eq!(format_cost(0.0), "0.0000");
        assert_eq!(format_cost(0.0039), "0.0039");
        assert_eq!(format_cost(0.01), "0.01");
        assert_eq!(format_cost(12.346), "12.35");
        assert_eq!(format_token_count(0), "0");
        assert_eq!(format_token_count(999), "999");
        assert_eq!(format_token_count(1000), "1,000");
        assert_eq!(format_token_count(123456), "123,456");
        assert_eq!(format_token_count(1234567), "1,234,567");
    }
}
