use anyhow::Result;
use clap::{Parser, Subcommand};
use sqlx::Row;
use std::io::Write;

use crate::consolidate::{self, ConsolidateOptions};
use crate::core::types::{GateVerdict, MergeStrategy};
use crate::core::Context;
use crate::crawl::{self, CrawlOptions};
use crate::db::{self, graph};
use crate::fetch::HttpFetcher;
use crate::gate::{build_gate, VERDICT_NO, VERDICT_YES};
use crate::harvest::{self, HarvestOptions};
use crate::lexicon;
use crate::readable::{self, CleanExtractorCli, ReadableOptions};

// ---------------------------------------------------------------------------
// CLI — `<object> <verb>` commands with a typed dispatch table. Exit codes
// follow the historical convention the tooling depends on: 1 means "ran
// successfully", 0 means "no-op / not found / user aborted".
// ---------------------------------------------------------------------------

pub const EXIT_OK: i32 = 1;
pub const EXIT_NOOP: i32 = 0;

#[derive(Parser, Debug)]
#[command(name = "landgraph", version, about = "Research-oriented web intelligence engine")]
pub struct Cli {
    #[command(subcommand)]
    pub object: Object,
}

#[derive(Subcommand, Debug)]
pub enum Object {
    /// Database lifecycle
    Db {
        #[command(subcommand)]
        verb: DbVerb,
    },
    /// Research projects and their corpus
    Land {
        #[command(subcommand)]
        verb: LandVerb,
    },
    /// Domain metadata harvesting
    Domain {
        #[command(subcommand)]
        verb: DomainVerb,
    },
    /// Logical-domain heuristics maintenance
    Heuristic {
        #[command(subcommand)]
        verb: HeuristicVerb,
    },
}

#[derive(Subcommand, Debug)]
pub enum DbVerb {
    /// Destroy and recreate the schema (asks for typed confirmation)
    Setup,
    /// Apply pending migrations; idempotent
    Migrate,
}

#[derive(Subcommand, Debug)]
pub enum LandVerb {
    /// Create a new land
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        desc: String,
        /// Comma-separated language codes; the first is primary
        #[arg(long, default_value = "fr")]
        lang: String,
    },
    /// Print land summaries
    List {
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a land, or prune low-relevance expressions with --maxrel
    Delete {
        #[arg(long)]
        name: String,
        #[arg(long)]
        maxrel: Option<i64>,
    },
    /// Add comma-separated terms to the land lexicon
    Addterm {
        #[arg(long)]
        land: String,
        #[arg(long)]
        terms: String,
    },
    /// Bulk insert seed URLs at depth 0
    Addurl {
        #[arg(long)]
        land: String,
        /// Comma-separated URLs
        #[arg(long)]
        urls: Option<String>,
        /// File with one URL per line
        #[arg(long)]
        path: Option<std::path::PathBuf>,
    },
    /// Breadth-first crawl of pending expressions
    Crawl {
        #[arg(long)]
        name: String,
        /// Cap on attempts (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Re-crawl expressions with this stored http status
        #[arg(long)]
        http: Option<String>,
        #[arg(long)]
        depth: Option<i64>,
    },
    /// Reprocess fetched expressions through the clean extractor
    Readable {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long)]
        depth: Option<i64>,
        #[arg(long, default_value = "smart_merge")]
        merge: String,
        /// Consult the relevance gate while merging (true|false)
        #[arg(long, default_value_t = false, action = clap::ArgAction::Set)]
        llm: bool,
    },
    /// Rebuild links, media and relevance from stored readable content
    Consolidate {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long)]
        depth: Option<i64>,
        #[arg(long, default_value_t = 0)]
        minrel: i64,
    },
    /// LLM-based operations (nested sub-verbs)
    Llm {
        #[command(subcommand)]
        verb: LlmVerb,
    },
}

#[derive(Subcommand, Debug)]
pub enum LlmVerb {
    /// Bulk relevance validation of expressions through the gate
    Validate {
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Also re-validate expressions previously marked "non"
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DomainVerb {
    /// Harvest homepage metadata for pending domains
    Crawl {
        #[arg(long, default_value_t = 0)]
        limit: usize,
        #[arg(long)]
        http: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum HeuristicVerb {
    /// Re-run logical-domain extraction over every expression
    Update,
}

/// Ask for a typed `Y` before destructive operations.
fn confirm(message: &str) -> bool {
    print!("{}", message);
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    answer.trim() == "Y"
}

/// Dispatch a parsed command. Returns the process exit code.
pub async fn dispatch(ctx: &Context, cli: Cli) -> Result<i32> {
    match cli.object {
        Object::Db { verb } => match verb {
            DbVerb::Setup => {
                if !confirm("Database will be destroyed and recreated, type 'Y' to proceed: ") {
                    return Ok(EXIT_NOOP);
                }
                db::setup(&ctx.db).await?;
                println!("Database setup complete");
                Ok(EXIT_OK)
            }
            DbVerb::Migrate => {
                db::migrate(&ctx.db).await?;
                println!("Migrations applied");
                Ok(EXIT_OK)
            }
        },
        Object::Land { verb } => land_dispatch(ctx, verb).await,
        Object::Domain { verb } => match verb {
            DomainVerb::Crawl { limit, http } => {
                let fetcher = HttpFetcher::new(ctx.http.clone());
                let options = HarvestOptions {
                    limit,
                    http_status: http,
                };
                let processed = harvest::crawl_domains(ctx, &fetcher, &options).await?;
                println!("{} domains processed", processed);
                Ok(EXIT_OK)
            }
        },
        Object::Heuristic { verb } => match verb {
            HeuristicVerb::Update => {
                let updated = harvest::update_heuristics(ctx).await?;
                println!("{} expressions reassigned", updated);
                Ok(EXIT_OK)
            }
        },
    }
}

async fn land_dispatch(ctx: &Context, verb: LandVerb) -> Result<i32> {
    match verb {
        LandVerb::Create { name, desc, lang } => {
            let land = db::create_land(&ctx.db, &name, &desc, &lang).await?;
            std::fs::create_dir_all(ctx.land_dir(land.id))?;
            println!("Land \"{}\" created", name);
            Ok(EXIT_OK)
        }
        LandVerb::List { name } => {
            let lands = db::list_lands(&ctx.db, name.as_deref()).await?;
            if lands.is_empty() {
                println!("No land found");
                return Ok(EXIT_NOOP);
            }
            for land in &lands {
                let summary = db::land_summary(&ctx.db, land).await?;
                println!(
                    "{} [{}] — {} ({} expressions, {} remaining, {} terms)",
                    land.name,
                    land.lang,
                    land.description,
                    summary.expressions,
                    summary.remaining,
                    summary.terms
                );
            }
            Ok(EXIT_OK)
        }
        LandVerb::Delete { name, maxrel } => {
            if !confirm("Land and/or underlying objects will be deleted, type 'Y' to proceed: ") {
                return Ok(EXIT_NOOP);
            }
            let Some(land) = db::find_land(&ctx.db, &name).await? else {
                println!("Land \"{}\" not found", name);
                return Ok(EXIT_NOOP);
            };
            match maxrel {
                Some(maxrel) if maxrel > 0 => {
                    let deleted = db::prune_low_relevance(&ctx.db, &land, maxrel).await?;
                    println!("{} expressions deleted", deleted);
                }
                _ => {
                    db::delete_land(&ctx.db, &land).await?;
                    println!("Land {} deleted", name);
                }
            }
            Ok(EXIT_OK)
        }
        LandVerb::Addterm { land, terms } => {
            let Some(land) = db::find_land(&ctx.db, &land).await? else {
                println!("Land \"{}\" not found", land);
                return Ok(EXIT_NOOP);
            };
            let added = lexicon::add_terms(ctx, &land, &terms).await?;
            lexicon::recompute_land_relevance(ctx, &land).await?;
            println!("{} terms added to land {}", added, land.name);
            Ok(EXIT_OK)
        }
        LandVerb::Addurl { land, urls, path } => {
            let Some(land) = db::find_land(&ctx.db, &land).await? else {
                println!("Land \"{}\" not found", land);
                return Ok(EXIT_NOOP);
            };
            let mut candidates: Vec<String> = Vec::new();
            if let Some(urls) = urls {
                candidates.extend(urls.split(',').map(|u| u.trim().to_string()));
            }
            if let Some(path) = path {
                let contents = std::fs::read_to_string(&path)?;
                candidates.extend(contents.lines().map(|l| l.trim().to_string()));
            }
            let mut count = 0usize;
            for url in candidates.iter().filter(|u| !u.is_empty()) {
                if graph::ensure_expression(&ctx.db, &ctx.heuristics, &land, url, 0)
                    .await?
                    .is_some()
                {
                    count += 1;
                }
            }
            println!("{} URLs added to land {}", count, land.name);
            Ok(EXIT_OK)
        }
        LandVerb::Crawl {
            name,
            limit,
            http,
            depth,
        } => {
            let Some(land) = db::find_land(&ctx.db, &name).await? else {
                println!("Land \"{}\" not found", name);
                return Ok(EXIT_NOOP);
            };
            let fetcher = HttpFetcher::new(ctx.http.clone());
            let gate = build_gate(ctx);
            let options = CrawlOptions {
                limit,
                http_status: http,
                depth,
            };
            let stats = crawl::crawl_land(ctx, &fetcher, gate.as_ref(), &land, &options).await?;
            println!(
                "{} processed, {} errors ({} attempted)",
                stats.processed,
                stats.errors(),
                stats.attempted
            );
            Ok(EXIT_OK)
        }
        LandVerb::Readable {
            name,
            limit,
            depth,
            merge,
            llm,
        } => {
            let Some(land) = db::find_land(&ctx.db, &name).await? else {
                println!("Land \"{}\" not found", name);
                return Ok(EXIT_NOOP);
            };
            let Some(merge) = MergeStrategy::parse_str(&merge) else {
                println!("Invalid merge strategy \"{}\"", merge);
                return Ok(EXIT_NOOP);
            };
            let extractor = CleanExtractorCli::new(ctx.config.clean_extractor.clone());
            let fetcher = HttpFetcher::new(ctx.http.clone());
            let gate = build_gate(ctx);
            let options = ReadableOptions {
                limit,
                depth,
                merge,
                use_gate: llm,
            };
            let stats =
                readable::process_land(ctx, &extractor, &fetcher, gate.as_ref(), &land, &options)
                    .await?;
            println!(
                "{} processed, {} errors ({} attempted)",
                stats.processed,
                stats.errors(),
                stats.attempted
            );
            Ok(EXIT_OK)
        }
        LandVerb::Consolidate {
            name,
            limit,
            depth,
            minrel,
        } => {
            let Some(land) = db::find_land(&ctx.db, &name).await? else {
                println!("Land \"{}\" not found", name);
                return Ok(EXIT_NOOP);
            };
            let options = ConsolidateOptions {
                limit,
                depth,
                min_relevance: minrel,
            };
            let stats = consolidate::consolidate_land(ctx, &land, &options).await?;
            println!(
                "{} processed, {} errors ({} attempted)",
                stats.processed,
                stats.errors(),
                stats.attempted
            );
            Ok(EXIT_OK)
        }
        LandVerb::Llm { verb } => match verb {
            LlmVerb::Validate { name, limit, force } => llm_validate(ctx, &name, limit, force).await,
        },
    }
}

/// Bulk gate validation: verdicts are stored on the expression, and a "non"
/// forces relevance to 0.
async fn llm_validate(ctx: &Context, name: &str, limit: usize, force: bool) -> Result<i32> {
    let gate = build_gate(ctx);
    if !gate.is_enabled() {
        println!("Relevance gate not configured — aborting");
        return Ok(EXIT_NOOP);
    }
    let Some(land) = db::find_land(&ctx.db, name).await? else {
        println!("Land \"{}\" not found", name);
        return Ok(EXIT_NOOP);
    };

    let min_chars = ctx.config.relevance_gate.readable_min_chars.unwrap_or(0) as i64;
    let mut sql = String::from(
        "SELECT id, title, readable FROM expression \
         WHERE land_id = ? AND readable IS NOT NULL AND LENGTH(readable) >= ?",
    );
    if force {
        sql.push_str(" AND (validllm IS NULL OR validllm NOT IN ('oui') )");
    } else {
        sql.push_str(" AND (validllm IS NULL OR validllm NOT IN ('oui', 'non'))");
    }
    sql.push_str(" ORDER BY id");
    if limit > 0 {
        sql.push_str(" LIMIT ?");
    }
    let mut query = sqlx::query(&sql).bind(land.id).bind(min_chars);
    if limit > 0 {
        query = query.bind(limit as i64);
    }
    let rows = query.fetch_all(&ctx.db).await?;

    let mut examined = 0usize;
    let mut updated = 0usize;
    for row in rows {
        examined += 1;
        let id: i64 = row.get("id");
        let title: Option<String> = row.get("title");
        let readable: Option<String> = row.get("readable");
        let verdict = gate
            .verdict(
                &land,
                title.as_deref().unwrap_or(""),
                readable.as_deref().unwrap_or(""),
            )
            .await;
        match verdict {
            GateVerdict::Relevant => {
                sqlx::query("UPDATE expression SET validllm = ?, validmodel = ? WHERE id = ?")
                    .bind(VERDICT_YES)
                    .bind(gate.model_name())
                    .bind(id)
                    .execute(&ctx.db)
                    .await?;
                updated += 1;
            }
            GateVerdict::NotRelevant => {
                sqlx::query(
                    "UPDATE expression SET validllm = ?, validmodel = ?, relevance = 0, \
                     approved_at = NULL WHERE id = ?",
                )
                .bind(VERDICT_NO)
                .bind(gate.model_name())
                .bind(id)
                .execute(&ctx.db)
                .await?;
                updated += 1;
            }
            GateVerdict::Unknown => {}
        }
    }
    println!(
        "LLM validation finished: examined={}, updated={}, model={}, force={}",
        examined,
        updated,
        gate.model_name(),
        force
    );
    Ok(EXIT_OK)
}
