//! End-to-end `analyze` pipeline: build XML → decode → extract → enrich →
//! merge → reason → report.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, instrument, warn};

use buildlens_reasoning::{ReasoningClient, render_context};
use buildlens_shared::config::FetchConfig;
use buildlens_shared::error::{BuildLensError, Result};
use buildlens_shared::types::SourceId;
use buildlens_sources::SourceRegistry;
use buildlens_storage::CacheStore;

use crate::coordinator::Coordinator;
use crate::extract::extract_entities;
use crate::merge::merge_context;
use crate::report::{ReportPaths, write_report};

/// Configuration for the `analyze` pipeline.
#[derive(Debug, Clone)]
pub struct AnalyzeConfig {
    /// Path to the Path of Building XML export.
    pub build_path: PathBuf,
    /// Root directory for report output.
    pub output_dir: PathBuf,
    /// Cache database path.
    pub cache_path: PathBuf,
    /// OpenRouter model ID for the analysis step.
    pub model: String,
    /// Fetch coordination settings.
    pub fetch: FetchConfig,
    /// Per-source record TTLs.
    pub ttls: HashMap<SourceId, u64>,
    /// Proceed with a partial context when the deadline fires.
    pub allow_partial: bool,
}

/// Result of the `analyze` pipeline.
#[derive(Debug)]
pub struct AnalyzeResult {
    /// Where the artifacts were written.
    pub paths: ReportPaths,
    /// Entities extracted from the build.
    pub entity_count: usize,
    /// Entities with at least one record.
    pub enriched_count: usize,
    /// True when the coordination deadline cut enrichment short.
    pub partial: bool,
    /// Model used for the analysis (empty when reasoning was skipped).
    pub model: String,
    /// Total elapsed time.
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after coordination with the per-entity outcome counts.
    fn entities_resolved(&self, enriched: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, result: &AnalyzeResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn entities_resolved(&self, _enriched: usize, _total: usize) {}
    fn done(&self, _result: &AnalyzeResult) {}
}

/// Run the full `analyze` pipeline.
///
/// 1. Decode the build export
/// 2. Extract lookup keys
/// 3. Coordinate cache-first enrichment
/// 4. Merge into the final context
/// 5. Reasoning (optional)
/// 6. Write report artifacts
#[instrument(skip_all, fields(build = %config.build_path.display(), model = %config.model))]
pub async fn analyze_build(
    config: &AnalyzeConfig,
    registry: Arc<SourceRegistry>,
    reasoning: Option<&dyn ReasoningClient>,
    progress: &dyn ProgressReporter,
) -> Result<AnalyzeResult> {
    let start = Instant::now();

    // --- Phase 1: Decode ---
    progress.phase("Decoding build export");
    let xml = std::fs::read_to_string(&config.build_path)
        .map_err(|e| BuildLensError::io(&config.build_path, e))?;
    let build = buildlens_pob::decode_build(&xml)?;
    info!(
        class = build.basics.class_name.as_deref().unwrap_or("?"),
        main_skill = build.basics.main_skill.as_deref().unwrap_or("?"),
        "build decoded"
    );

    // --- Phase 2: Extract ---
    progress.phase("Extracting entities");
    let keys = extract_entities(&build);
    if keys.is_empty() {
        return Err(BuildLensError::validation(
            "the build references no skills, items, or passives to analyze",
        ));
    }
    info!(entities = keys.len(), "entities extracted");

    // --- Phase 3: Cache ---
    progress.phase("Opening cache");
    let store = Arc::new(CacheStore::open(&config.cache_path).await?);
    let run_id = store
        .insert_run(
            &config.build_path.display().to_string(),
            Some(&config.model),
        )
        .await?;

    // --- Phase 4: Coordinate enrichment ---
    progress.phase("Enriching entities");
    let coordinator = Coordinator::new(
        registry,
        store.clone(),
        &config.fetch,
        config.ttls.clone(),
    );
    let resolved = coordinator.resolve(&keys).await;
    let timed_out = resolved.timed_out;

    // --- Phase 5: Merge ---
    let context = merge_context(build, &keys, resolved, Utc::now());
    let enriched_count = context.entries.iter().filter(|e| !e.records.is_empty()).count();
    progress.entities_resolved(enriched_count, context.entries.len());

    if timed_out && !config.allow_partial {
        let elapsed_ms = start.elapsed().as_millis() as u64;
        store
            .finish_run(&run_id, context.entries.len() as u32, true)
            .await?;
        return Err(BuildLensError::CoordinationTimeout {
            elapsed_ms,
            partial: Box::new(context),
        });
    }
    if timed_out {
        warn!("deadline fired, continuing with a partial context");
    }

    // --- Phase 6: Reasoning ---
    let (analysis, model) = match reasoning {
        Some(client) => {
            progress.phase("Running analysis");
            let document = render_context(&context);
            let analysis = client.analyze(&document, &config.model).await?;
            (analysis, config.model.clone())
        }
        None => (
            "_Reasoning was skipped for this run; see `context.json` for the raw data._"
                .to_string(),
            String::new(),
        ),
    };

    // --- Phase 7: Report ---
    progress.phase("Writing report");
    let build_name = config
        .build_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "build".to_string());
    let paths = write_report(&config.output_dir, &build_name, &analysis, &context)?;

    store
        .finish_run(&run_id, context.entries.len() as u32, context.partial)
        .await?;

    let result = AnalyzeResult {
        paths,
        entity_count: context.entries.len(),
        enriched_count,
        partial: context.partial,
        model,
        elapsed: start.elapsed(),
    };

    progress.done(&result);

    info!(
        entities = result.entity_count,
        enriched = result.enriched_count,
        partial = result.partial,
        elapsed_ms = result.elapsed.as_millis(),
        "analyze pipeline complete"
    );

    Ok(result)
}
