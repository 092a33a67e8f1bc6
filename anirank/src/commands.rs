//! Command implementations for the anirank binary
//!
//! Every command loads one season's titles from the database, works on them
//! in memory through the library and writes the changes back.

use std::io::Write;
use std::path::{Path, PathBuf};

use anirank::completion::WorkItem;
use anirank::db;
use anirank::error::ValidationError;
use anirank::manual::{
    parse_score, parse_votes, ManualCoordinator, ManualDecision, ManualEffect, ManualSession, ScoreScale,
};
use anirank::ranking::{parse_selectors, Ranking};
use anirank::report::{latest_report, RankingReport};
use anirank::sources::SourceRegistry;
use anirank::types::TitleRecord;
use anirank::{ObservationStore, Pipeline, PipelineRun};
use anirank_common::config::TomlConfig;
use anirank_common::events::{EventBus, PipelineEvent, Stage};
use anirank_common::AnalysisPeriod;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct App {
    config: TomlConfig,
    pool: SqlitePool,
    pipeline: Pipeline,
    json: bool,
}

impl App {
    pub async fn open(config: TomlConfig, json: bool) -> Result<Self> {
        let db_path = config.storage.database_path();
        info!("Database: {}", db_path.display());
        let pool = db::init_database_pool(&db_path)
            .await
            .context("Failed to open database")?;

        let pipeline = Pipeline::from_config(&config, &SourceRegistry::with_builtins(), EventBus::default());
        info!(sources = ?pipeline.enabled_sources(), "Pipeline ready");

        Ok(Self {
            config,
            pool,
            pipeline,
            json,
        })
    }

    async fn load_store(&self, period: AnalysisPeriod) -> Result<ObservationStore> {
        Ok(db::load_period(&self.pool, period).await?)
    }

    fn write_report(&self, period: AnalysisPeriod, ranking: &Ranking, store: &ObservationStore) -> Result<(RankingReport, PathBuf)> {
        let report = RankingReport::from_ranking(period, ranking, store, Utc::now());
        let path = report.write(&self.config.storage.results_path())?;
        Ok((report, path))
    }

    /// Print the report as JSON, or the ranking as a table
    fn print_result(&self, report: &RankingReport, ranking: &Ranking, path: &Path) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(report)?);
        } else {
            print_ranking(ranking);
            println!("\nReport: {}", path.display());
        }
        Ok(())
    }
}

fn period_or_current(input: Option<&str>) -> Result<AnalysisPeriod> {
    match input {
        Some(text) => Ok(AnalysisPeriod::parse(text)?),
        None => Ok(AnalysisPeriod::current()),
    }
}

/// Stage progress on stderr
fn spawn_progress(events: &EventBus) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::StageStarted { stage, items, .. }) => eprintln!("==> {stage} ({items})"),
                Ok(PipelineEvent::StageCompleted {
                    stage,
                    succeeded,
                    failed,
                    ..
                }) => eprintln!("    {stage}: {succeeded} ok, {failed} not done"),
                Ok(PipelineEvent::CompletionResolved {
                    title_id,
                    source_id,
                    query,
                    ..
                }) => eprintln!("    + {title_id} on {source_id} via \"{query}\""),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Cancel `token` on Ctrl+C
fn spawn_interrupt(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, letting in-flight requests finish");
            token.cancel();
        }
    })
}

fn load_seed(path: &Path, period: AnalysisPeriod) -> Result<Vec<TitleRecord>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read seed file {}", path.display()))?;
    let mut titles: Vec<TitleRecord> =
        serde_json::from_str(&content).with_context(|| format!("Invalid seed file {}", path.display()))?;
    for record in &mut titles {
        record.period.get_or_insert(period);
    }
    Ok(titles)
}

fn print_ranking(ranking: &Ranking) {
    println!("{:>4}  {:>8}  {:>5}  {:>9}  {:<16}  Title", "#", "Score", "Conf", "Votes", "Sources");
    for entry in &ranking.entries {
        let sources: Vec<&str> = entry.score.contributing_sources().map(|s| s.as_str()).collect();
        println!(
            "{:>4}  {:>8.4}  {:>5.2}  {:>9}  {:<16}  {}",
            entry.rank,
            entry.score.composite_score,
            entry.score.confidence,
            entry.score.total_votes,
            sources.join(","),
            entry.title
        );
    }

    if !ranking.unranked.is_empty() {
        println!("\nUnranked ({}):", ranking.unranked.len());
        for title in &ranking.unranked {
            let observed: Vec<&str> = title.observed_sources.iter().map(|s| s.as_str()).collect();
            println!("  {} [{}]", title.title, observed.join(","));
        }
    }
}

fn print_work_list(items: &[WorkItem]) {
    for item in items {
        let rank = item.rank.map_or_else(|| "-".to_string(), |r| r.to_string());
        println!(
            "{:>4}  {:<10}  {}  ({}, {} sources)",
            rank,
            item.source_id,
            item.title.title,
            item.title_id(),
            item.observed_count
        );
    }
}

pub async fn analyze(app: &App, period: &str, seed: Option<&Path>, skip_retry: bool) -> Result<()> {
    let period = AnalysisPeriod::parse(period)?;
    let titles = match seed {
        Some(path) => load_seed(path, period)?,
        None => app.pipeline.discover_titles(period).await?,
    };
    info!(period = %period, titles = titles.len(), "Analysis started");

    let mut store = app.load_store(period).await?;
    let progress = (!app.json).then(|| spawn_progress(app.pipeline.events()));
    let interrupt = spawn_interrupt(app.pipeline.cancellation_token());

    let result = app.pipeline.run(&mut store, titles, !skip_retry).await;
    interrupt.abort();
    if let Some(progress) = progress {
        progress.abort();
    }

    // Whatever was merged before a cancellation is kept
    db::save_store(&app.pool, &store).await?;
    let run: PipelineRun = result?;

    let (report, path) = app.write_report(period, &run.ranking, &store)?;
    app.print_result(&report, &run.ranking, &path)?;

    if !app.json {
        println!(
            "Collected {}/{} ({} not found, {} failed)",
            run.collect.collected, run.collect.attempted, run.collect.not_found, run.collect.failed
        );
        if let Some(retry) = &run.retry {
            println!(
                "Retry pass: {} resolved, {} unresolved",
                retry.resolved_count(),
                retry.unresolved_count()
            );
        }
        if !run.missing.is_empty() {
            println!("{} observations still missing; run `anirank complete`", run.missing.len());
        }
    }
    Ok(())
}

pub async fn rank(app: &App, period: Option<&str>, from_report: bool) -> Result<()> {
    let (period, store) = if from_report {
        let dir = app.config.storage.results_path();
        let path = latest_report(&dir)?.ok_or_else(|| anyhow!("No ranking report in {}", dir.display()))?;
        let previous = RankingReport::load(&path)?;
        info!(report = %path.display(), "Rescoring from report");
        (previous.analysis_period(), previous.to_store())
    } else {
        let period = period_or_current(period)?;
        (period, app.load_store(period).await?)
    };

    let scorer = app.pipeline.scorer().await;
    let ranking = app.pipeline.rank(&scorer, &store, Stage::Rerank);

    let (report, path) = app.write_report(period, &ranking, &store)?;
    app.print_result(&report, &ranking, &path)
}

pub async fn missing(app: &App, period: Option<&str>) -> Result<()> {
    let store = app.load_store(period_or_current(period)?).await?;
    let scorer = app.pipeline.scorer().await;
    let ranking = app.pipeline.rank(&scorer, &store, Stage::Score);
    let items = app.pipeline.detect_missing(&store, &ranking);

    if app.json {
        let list: Vec<_> = items
            .iter()
            .map(|item| {
                json!({
                    "title_id": item.title_id(),
                    "title": item.title.title,
                    "source_id": item.source_id,
                    "rank": item.rank,
                    "total_votes": item.total_votes,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else if items.is_empty() {
        println!("Nothing missing");
    } else {
        print_work_list(&items);
    }
    Ok(())
}

/// Score followed by optional votes, e.g. "8.2" or "8.2 1500"
fn parse_entry(input: &str) -> std::result::Result<ManualDecision, ValidationError> {
    let mut parts = input.split_whitespace();
    let score = parse_score(parts.next().unwrap_or_default())?;
    let votes = parse_votes(parts.next().unwrap_or_default())?;
    Ok(ManualDecision::Enter { score, votes })
}

pub async fn complete(app: &App, period: Option<&str>) -> Result<()> {
    let period = period_or_current(period)?;
    let mut store = app.load_store(period).await?;
    let scorer = app.pipeline.scorer().await;
    let ranking = app.pipeline.rank(&scorer, &store, Stage::Score);
    let items = app.pipeline.detect_missing(&store, &ranking);

    let scales = ScoreScale::from_config(&app.config);
    let mut session = ManualSession::from_work_items(&items, &scales, app.pipeline.settings().default_manual_votes);
    let coordinator = ManualCoordinator::new(Some(app.pool.clone()), scorer.clone(), app.pipeline.events().clone());

    info!(session_id = %session.id, entries = session.remaining(), "Manual completion started");
    app.pipeline.events().stage_started(Stage::ManualCompletion, session.remaining());
    println!(
        "{} missing entries. Enter \"score [votes]\" (default votes {}), \"s\" skip, \"n\" skip title, \"q\" quit.",
        session.remaining(),
        session.default_votes()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(entry) = session.current().cloned() {
        let rank = entry.rank.map_or_else(|| "-".to_string(), |r| format!("#{r}"));
        let localized = entry
            .title_localized
            .as_deref()
            .map(|t| format!(" / {t}"))
            .unwrap_or_default();
        print!(
            "[{rank}] {}{localized} on {} ({}-{}) > ",
            entry.title, entry.source_id, entry.scale.min, entry.scale.max
        );
        std::io::stdout().flush()?;

        let decision = match lines.next_line().await?.as_deref().map(str::trim) {
            None | Some("q") | Some("quit") => ManualDecision::Quit,
            Some("") | Some("s") => ManualDecision::SkipEntry,
            Some("n") => ManualDecision::SkipTitle,
            Some(input) => match parse_entry(input) {
                Ok(decision) => decision,
                Err(e) => {
                    println!("  {e}");
                    continue;
                }
            },
        };

        let (next, effect) = session.apply(decision, Utc::now());
        session = next;
        match &effect {
            ManualEffect::Upsert(_) => match coordinator.handle(&mut store, &effect).await? {
                Some(composite) => println!(
                    "  saved; composite {:.4} (confidence {:.2}, {} sources)",
                    composite.composite_score, composite.confidence, composite.contributing_source_count
                ),
                None => println!("  saved; title still unranked"),
            },
            ManualEffect::Rejected(e) => println!("  {e}"),
            ManualEffect::Skipped(count) => println!("  skipped {count}"),
            ManualEffect::Finished => {}
        }
    }

    app.pipeline
        .events()
        .stage_completed(Stage::ManualCompletion, session.accepted(), session.skipped());
    info!(
        session_id = %session.id,
        accepted = session.accepted(),
        skipped = session.skipped(),
        "Manual completion finished"
    );

    let ranking = app.pipeline.rank(&scorer, &store, Stage::Rerank);
    let (report, path) = app.write_report(period, &ranking, &store)?;
    app.print_result(&report, &ranking, &path)
}

pub async fn remove(app: &App, selectors: &str, yes: bool, period: Option<&str>) -> Result<()> {
    let period = period_or_current(period)?;
    let mut store = app.load_store(period).await?;
    let scorer = app.pipeline.scorer().await;
    let snapshot = app.pipeline.rank(&scorer, &store, Stage::Score);

    let plan = snapshot.resolve(&parse_selectors(selectors)?)?;
    if !app.json {
        for target in &plan.targets {
            println!("{:>4}  {}  ({})", target.position, target.title, target.title_id);
        }
    }

    if !yes {
        print!("Remove {} titles? [y/N] ", plan.len());
        std::io::stdout().flush()?;
        let answer = BufReader::new(tokio::io::stdin()).lines().next_line().await?;
        if !matches!(answer.as_deref().map(str::trim), Some("y") | Some("Y") | Some("yes")) {
            println!("Aborted");
            return Ok(());
        }
    }

    let (plan, ranking) = app.pipeline.remove(&mut store, &scorer, &snapshot, selectors)?;
    db::titles::delete_titles(&app.pool, &plan.title_ids()).await?;

    let (report, path) = app.write_report(period, &ranking, &store)?;
    app.print_result(&report, &ranking, &path)
}
