//! Writes the analysis report and the context snapshot to disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use buildlens_shared::error::{BuildLensError, Result};
use buildlens_shared::types::EnrichedContext;

static SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Where a run's artifacts ended up.
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub dir: PathBuf,
    pub report: PathBuf,
    pub context: PathBuf,
}

/// Lowercase, alphanumeric, hyphen-separated.
fn slugify(name: &str) -> String {
    let slug = SLUG
        .replace_all(&name.to_lowercase(), "-")
        .trim_matches('-')
        .to_string();
    if slug.is_empty() { "build".to_string() } else { slug }
}

/// Write `report.md` and `context.json` under a fresh timestamped
/// directory inside `output_dir`.
pub fn write_report(
    output_dir: &Path,
    build_name: &str,
    analysis: &str,
    context: &EnrichedContext,
) -> Result<ReportPaths> {
    let dir = output_dir.join(format!(
        "{}-{}",
        slugify(build_name),
        context.generated_at.format("%Y%m%d-%H%M%S"),
    ));
    fs::create_dir_all(&dir).map_err(|e| BuildLensError::io(&dir, e))?;

    let report = dir.join("report.md");
    let body = render_report(build_name, analysis, context);
    fs::write(&report, body).map_err(|e| BuildLensError::io(&report, e))?;

    let context_path = dir.join("context.json");
    let json = serde_json::to_string_pretty(context)
        .map_err(|e| BuildLensError::parse(format!("context serialization: {e}")))?;
    fs::write(&context_path, json).map_err(|e| BuildLensError::io(&context_path, e))?;

    info!(dir = %dir.display(), "report written");
    Ok(ReportPaths {
        dir,
        report,
        context: context_path,
    })
}

fn render_report(build_name: &str, analysis: &str, context: &EnrichedContext) -> String {
    let basics = &context.build.basics;
    let mut out = Vec::new();
    out.push(format!("# Build Analysis: {build_name}"));
    out.push(String::new());
    out.push(format!(
        "- **Class:** {}",
        basics.class_name.as_deref().unwrap_or("Unknown")
    ));
    if let Some(ascendancy) = &basics.ascendancy {
        out.push(format!("- **Ascendancy:** {ascendancy}"));
    }
    if let Some(level) = basics.level {
        out.push(format!("- **Level:** {level}"));
    }
    out.push(format!(
        "- **Main Skill:** {}",
        basics.main_skill.as_deref().unwrap_or("Unknown")
    ));
    out.push(format!("- **Entities examined:** {}", context.entries.len()));
    out.push(format!(
        "- **Generated:** {}",
        context.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));
    if context.partial {
        out.push("- **Note:** enrichment hit the coordination deadline; data is partial".into());
    }
    out.push(String::new());
    out.push("## Analysis".to_string());
    out.push(String::new());
    out.push(analysis.trim().to_string());
    out.push(String::new());
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildlens_shared::types::{BuildBasics, BuildDescription};
    use chrono::Utc;

    fn sample_context() -> EnrichedContext {
        EnrichedContext {
            build: BuildDescription {
                basics: BuildBasics {
                    class_name: Some("Sorceress".into()),
                    ascendancy: Some("Stormweaver".into()),
                    level: Some(92),
                    main_skill: Some("Fireball".into()),
                },
                ..BuildDescription::default()
            },
            entries: vec![],
            generated_at: Utc::now(),
            partial: false,
        }
    }

    fn temp_out() -> PathBuf {
        std::env::temp_dir().join(format!("bl_report_{}", uuid::Uuid::now_v7()))
    }

    #[test]
    fn slugify_normalizes_names() {
        assert_eq!(slugify("My Fireball Build!.xml"), "my-fireball-build-xml");
        assert_eq!(slugify("---"), "build");
    }

    #[test]
    fn writes_report_and_context_snapshot() {
        let out = temp_out();
        let paths = write_report(&out, "Fireball Sorc", "Looks solid.", &sample_context())
            .expect("write report");

        let report = fs::read_to_string(&paths.report).expect("read report");
        assert!(report.contains("# Build Analysis: Fireball Sorc"));
        assert!(report.contains("**Class:** Sorceress"));
        assert!(report.contains("Looks solid."));
        assert!(!report.contains("partial"));

        let json = fs::read_to_string(&paths.context).expect("read context");
        let decoded: EnrichedContext = serde_json::from_str(&json).expect("decode context");
        assert_eq!(decoded.build.basics.class_name.as_deref(), Some("Sorceress"));

        fs::remove_dir_all(&out).ok();
    }

    #[test]
    fn partial_runs_are_flagged_in_the_report() {
        let out = temp_out();
        let mut context = sample_context();
        context.partial = true;
        let paths =
            write_report(&out, "Fireball Sorc", "Partial.", &context).expect("write report");
        let report = fs::read_to_string(&paths.report).expect("read report");
        assert!(report.contains("data is partial"));
        fs::remove_dir_all(&out).ok();
    }
}
