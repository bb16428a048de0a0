//! Command implementations.

use std::path::Path;

use anyhow::Context;
use console::style;
use dialoguer::{theme::ColorfulTheme, Select};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;

use testmind::healing::classifier::TestFailure;
use testmind::healing::page::PageSnapshot;
use testmind::{TestMindConfig, TestMindEngine};

use super::args::{GenerateArgs, HealArgs, IndexArgs, InitArgs};

/// Diff-First review decision.
enum ReviewDecision {
    Apply,
    ApplyNoVcs,
    Reject,
    Regenerate,
}

/// `testmind init`
pub fn init_command(project: &Path, args: InitArgs) -> anyhow::Result<()> {
    let path = project.join(TestMindConfig::FILE_NAME);
    if path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    std::fs::write(&path, TestMindConfig::default_yaml())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!(
        "{} wrote {}",
        style("✓").green().bold(),
        style(path.display()).cyan()
    );
    Ok(())
}

/// `testmind index`
pub async fn index_command(project: &Path, args: IndexArgs) -> anyhow::Result<()> {
    let config = TestMindConfig::load(project)?;
    let engine = TestMindEngine::new(project, config).await?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("progress template is valid"),
    );
    spinner.set_message("indexing project...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let summary = engine.index().await?;
    spinner.finish_and_clear();

    if args.optimize {
        engine.optimize().await?;
        let stats = engine.stats().await;
        println!(
            "{} optimized store ({} vectors)",
            style("✓").green().bold(),
            stats.vectors.total_vectors
        );
    }

    println!(
        "{} {} files discovered, {} indexed, {} unchanged, {} skipped, {} chunks",
        style("✓").green().bold(),
        summary.files_discovered,
        style(summary.files_indexed).cyan(),
        summary.files_unchanged,
        summary.files_skipped,
        summary.chunks_indexed,
    );
    Ok(())
}

/// `testmind generate`
pub async fn generate_command(project: &Path, args: GenerateArgs) -> anyhow::Result<()> {
    let config = TestMindConfig::load(project)?;
    let engine = TestMindEngine::new(project, config).await?;

    loop {
        let outcome = engine
            .generate(&args.file, args.function.as_deref(), args.framework.as_deref())
            .await?;

        println!();
        println!("{}", engine.format_diff(&outcome.diff));
        println!();

        if args.dry_run {
            println!("{} dry run, nothing written", style("·").dim());
            return Ok(());
        }

        let decision = if args.apply {
            ReviewDecision::Apply
        } else {
            prompt_review()?
        };

        match decision {
            ReviewDecision::Apply | ReviewDecision::ApplyNoVcs => {
                let written = engine.apply(&outcome.suite)?;
                println!(
                    "{} wrote {}",
                    style("✓").green().bold(),
                    style(written.display()).cyan()
                );
                return Ok(());
            }
            ReviewDecision::Reject => {
                println!("{} rejected, nothing written", style("✗").red());
                return Ok(());
            }
            ReviewDecision::Regenerate => {
                println!("{} regenerating...", style("↻").yellow());
            }
        }
    }
}

fn prompt_review() -> anyhow::Result<ReviewDecision> {
    let options = [
        "Apply",
        "Apply (skip VCS staging)",
        "Reject",
        "Regenerate",
    ];
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Apply this test?")
        .items(&options)
        .default(0)
        .interact()
        .context("review prompt aborted")?;

    Ok(match selection {
        0 => ReviewDecision::Apply,
        1 => ReviewDecision::ApplyNoVcs,
        2 => ReviewDecision::Reject,
        _ => ReviewDecision::Regenerate,
    })
}

/// One entry of the heal report file.
#[derive(Debug, Deserialize)]
struct HealReportEntry {
    #[serde(flatten)]
    failure: TestFailure,
    #[serde(default)]
    page: Option<PageSnapshot>,
}

/// `testmind heal`
pub async fn heal_command(project: &Path, args: HealArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.report)
        .with_context(|| format!("failed to read {}", args.report.display()))?;
    let entries: Vec<HealReportEntry> =
        serde_json::from_str(&raw).context("malformed failure report")?;

    let config = TestMindConfig::load(project)?;
    let engine = TestMindEngine::new(project, config).await?;

    let failures: Vec<(TestFailure, Option<PageSnapshot>)> = entries
        .into_iter()
        .map(|entry| (entry.failure, entry.page))
        .collect();
    let (report, markdown) = engine.heal(&failures).await?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &markdown)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!(
                "{} {} of {} healed, report at {}",
                style("✓").green().bold(),
                report.healed_count,
                report.outcomes.len(),
                style(path.display()).cyan()
            );
        }
        None => println!("{markdown}"),
    }
    Ok(())
}

/// `testmind stats`
pub async fn stats_command(project: &Path) -> anyhow::Result<()> {
    let config = TestMindConfig::load(project)?;
    let engine = TestMindEngine::new(project, config).await?;
    let stats = engine.stats().await;

    println!("{}", style("Vector store").bold());
    println!("  vectors:    {}", stats.vectors.total_vectors);
    println!("  files:      {}", stats.vectors.files);
    println!("  dimension:  {}", stats.vectors.dimension);
    println!("  partitions: {}", stats.vectors.partitions);
    println!("{}", style("Session usage").bold());
    println!("  llm calls:         {}", stats.usage.calls);
    println!("  prompt tokens:     {}", stats.usage.prompt_tokens);
    println!("  completion tokens: {}", stats.usage.completion_tokens);
    println!("  estimated cost:    ${:.4}", stats.usage.estimated_cost);
    println!("{}", style("Semantic cache").bold());
    println!(
        "  exact hits: {}  similar hits: {}  misses: {}",
        stats.cache.exact_hits, stats.cache.similar_hits, stats.cache.misses
    );
    println!("{}", style("Manifest").bold());
    println!("  indexed files: {}", stats.indexed_files);
    Ok(())
}
