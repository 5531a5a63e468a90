//! `stencil stats`: engine statistics.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use stencil_engine::EngineStats;

use super::EngineArgs;

/// Arguments for `stencil stats`.
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Warm the cache before reporting.
    #[arg(long)]
    pub warm: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct CacheRow {
    #[tabled(rename = "template")]
    name: String,
    #[tabled(rename = "cached")]
    cached: bool,
    #[tabled(rename = "age (s)")]
    age: String,
    #[tabled(rename = "hits")]
    hits: u64,
    #[tabled(rename = "misses")]
    misses: u64,
    #[tabled(rename = "precompiles")]
    precompiles: u64,
}

impl StatsArgs {
    pub async fn run(self, engine_args: &EngineArgs) -> Result<()> {
        let engine = engine_args.engine()?;
        if self.warm {
            engine.warmup(None).await?;
        }
        let stats = engine.stats();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&stats).context("failed to serialize stats")?
            );
            return Ok(());
        }
        print_report(stats);
        Ok(())
    }
}

fn print_report(stats: EngineStats) {
    let cache = &stats.cache;
    println!("{}", "CACHE".bold());
    println!(
        "  {}/{} cached | ttl {}s | hit rate {:.1}% | {} expired",
        cache.size,
        cache.max_size,
        cache.ttl_secs,
        cache.hit_rate * 100.0,
        cache.expired,
    );
    if !cache.entries.is_empty() {
        let rows: Vec<CacheRow> = cache
            .entries
            .iter()
            .map(|e| CacheRow {
                name: e.name.to_string(),
                cached: e.cached,
                age: e.age_secs.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
                hits: e.access.hits,
                misses: e.access.misses,
                precompiles: e.access.precompiles,
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    let s = &stats.scheduler;
    println!("{}", "GENERATIONS".bold());
    println!(
        "  {} running / {} max | {} queued | {} submitted | {} deduplicated",
        s.running, s.max_concurrent, s.queued, s.submitted, s.deduplicated
    );
    println!(
        "  {} succeeded | {} failed | {} timed out | {} cancelled",
        s.succeeded, s.failed, s.timed_out, s.cancelled
    );

    let r = &stats.recovery;
    println!("{}", "RECOVERY".bold());
    println!(
        "  {} errors | {} recovered | success rate {:.1}%",
        r.total,
        r.recovered,
        r.success_rate * 100.0
    );
    for (kind, count) in &r.by_kind {
        println!("  {kind}: {count}");
    }
    println!("{} registered hook(s)", stats.registered_hooks);
}
