//! ₿ satsdesk CLI — market lookups and diagnostics through the dispatch router.
//!
//! Usage:
//!   satsdesk onboard        — Create a default configuration
//!   satsdesk status         — Show configuration and router health
//!   satsdesk tools          — List registered tools
//!   satsdesk price          — Fetch the BTC price (twice, to show the cache)
//!   satsdesk fees           — Fetch recommended on-chain fee rates
//!   satsdesk demo           — Offline walkthrough of events, caching and health

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use satsdesk_core::bus::SubscribeOptions;
use satsdesk_core::config::Config;
use satsdesk_core::router::Router;
use satsdesk_core::tools::market::{BitcoinPriceTool, FeeEstimateTool};
use satsdesk_core::tools::FnTool;

#[derive(Parser)]
#[command(
    name = "satsdesk",
    version,
    about = "Task routing, caching and events for Bitcoin-education tooling"
)]
struct Cli {
    /// Config file (default: ~/.satsdesk/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or reset the default configuration
    Onboard,

    /// Show configuration and router health
    Status,

    /// List registered tools
    Tools {
        /// Only show tools in this category
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Fetch the current bitcoin price through the router
    Price {
        /// Quote currency
        #[arg(short = 'C', long, default_value = "usd")]
        currency: String,

        /// Number of identical calls (repeats are served from the cache)
        #[arg(short, long, default_value_t = 2)]
        repeat: u32,
    },

    /// Fetch recommended fee rates through the router
    Fees,

    /// Run an offline demo of priority events, caching and health reporting
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Onboard) => cmd_onboard()?,
        Some(Commands::Status) => cmd_status(cli.config.as_deref()).await?,
        Some(Commands::Tools { category }) => cmd_tools(cli.config.as_deref(), category.as_deref()).await?,
        Some(Commands::Price { currency, repeat }) => {
            cmd_price(cli.config.as_deref(), &currency, repeat).await?
        }
        Some(Commands::Fees) => cmd_fees(cli.config.as_deref()).await?,
        Some(Commands::Demo) | None => cmd_demo().await?,
    }

    Ok(())
}

// ── Shared Setup ────────────────────────────────────────────────────

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load_from(p),
        None => Config::load(),
    }
}

/// Build an initialized router with the market tools registered.
async fn setup_router(config: &Config) -> Result<Arc<Router>> {
    let router = Arc::new(Router::new());
    router.register_tool(Arc::new(BitcoinPriceTool::new(&config.market)?));
    router.register_tool(Arc::new(FeeEstimateTool::new(&config.market)?));
    router.initialize(config.router.clone()).await?;
    debug!(tools = router.list_tools().len(), "Router ready");
    Ok(router)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── Onboard Command ─────────────────────────────────────────────────

fn cmd_onboard() -> Result<()> {
    let path = Config::write_default_template()?;
    println!();
    println!("  ✅ Configuration created at:");
    println!("     {}", path.display());
    println!();
    println!("  Next steps:");
    println!("  1. Adjust cache budget and health thresholds if needed");
    println!("  2. Run `satsdesk price` to fetch the BTC price");
    println!();
    Ok(())
}

// ── Status Command ──────────────────────────────────────────────────

async fn cmd_status(path: Option<&std::path::Path>) -> Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(Config::default_path);
    let config = load_config(path)?;

    println!();
    println!("  ₿ satsdesk status");
    println!("  ─────────────────────────────────────");

    if config_path.exists() {
        println!("  Config:    {}", config_path.display());
    } else {
        println!("  Config:    ⚠️  Not found, using defaults (run `satsdesk onboard`)");
    }

    let r = &config.router;
    println!(
        "  Caching:   {}",
        if r.enable_caching {
            format!("✅ {} KiB budget, {}s default TTL", r.cache.max_size / 1024, r.cache.default_ttl)
        } else {
            "❌ disabled".into()
        }
    );
    println!("  Events:    {}", if r.enable_events { "✅ enabled" } else { "❌ disabled" });
    println!(
        "  Health:    degraded ≥ {:.0}%, warn ≥ {:.0}%, unhealthy ≥ {:.0}%",
        r.error_rate_thresholds.warning * 100.0,
        r.error_rate_thresholds.degraded * 100.0,
        r.error_rate_thresholds.unhealthy * 100.0
    );

    let router = setup_router(&config).await?;
    let health = router.get_health();
    println!("  Router:    {} ({} tools)", health.status, router.list_tools().len());
    router.shutdown().await;

    println!();
    Ok(())
}

// ── Tools Command ───────────────────────────────────────────────────

async fn cmd_tools(path: Option<&std::path::Path>, category: Option<&str>) -> Result<()> {
    let config = load_config(path)?;
    let router = setup_router(&config).await?;

    let tools = match category {
        Some(c) => router.get_tools_by_category(c),
        None => router.list_tools(),
    };

    if tools.is_empty() {
        println!("  No tools registered.");
    } else {
        println!();
        for tool in &tools {
            let cache = match (tool.cacheable, tool.ttl_secs) {
                (true, Some(ttl)) => format!("cached {ttl}s"),
                (true, None) => "cached".to_string(),
                (false, _) => "uncached".to_string(),
            };
            println!("  {:<20} [{}] {}  {}", tool.name, tool.category, cache, tool.tags.join(", "));
        }
        println!();
    }

    router.shutdown().await;
    Ok(())
}

// ── Market Commands ─────────────────────────────────────────────────

async fn cmd_price(path: Option<&std::path::Path>, currency: &str, repeat: u32) -> Result<()> {
    let config = load_config(path)?;
    let router = setup_router(&config).await?;

    if let Some(bus) = router.events() {
        bus.subscribe("tool:cache:hit", SubscribeOptions::new(), |event| async move {
            println!("  ⚡ served from cache ({})", event.payload["toolName"]);
            Ok(())
        });
    }

    let args = json!({ "vs_currency": currency });
    for _ in 0..repeat.max(1) {
        let price = router.execute_tool("get_bitcoin_price", args.clone()).await?;
        print_json(&price)?;
    }

    let metrics = router.get_metrics();
    println!(
        "  {} upstream call(s), avg {:.0} ms",
        metrics.request_count, metrics.average_response_time
    );

    router.shutdown().await;
    Ok(())
}

async fn cmd_fees(path: Option<&std::path::Path>) -> Result<()> {
    let config = load_config(path)?;
    let router = setup_router(&config).await?;

    let fees = router.execute_tool("get_fee_estimates", json!({})).await?;
    print_json(&fees)?;

    router.shutdown().await;
    Ok(())
}

// ── Demo Command ────────────────────────────────────────────────────

async fn cmd_demo() -> Result<()> {
    let config = Config::default();
    let router = Arc::new(Router::new());
    router.initialize(config.router.clone()).await?;
    let bus = router.events().ok_or_else(|| anyhow::anyhow!("events are disabled"))?;

    println!();
    println!("  ₿ satsdesk demo");
    println!("  ─────────────────────────────────────");

    // Priority delivery
    for (priority, label) in [(1, "analytics"), (10, "audit log"), (5, "notifier")] {
        bus.subscribe("tool:execution:*", SubscribeOptions::new().priority(priority), move |event| async move {
            println!("    [{priority:>2}] {label:<10} ← {}", event.name);
            Ok(())
        });
    }
    // A broken listener must not disturb the others.
    bus.subscribe("tool:*", SubscribeOptions::new().priority(7), |_| async {
        Err::<(), _>(anyhow::anyhow!("listener offline"))
    });

    let renders = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&renders);
    router.register_tool(Arc::new(
        FnTool::new("render_lesson", "design", move |args: Value| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!({ "lesson": args["topic"], "slides": 12 }))
            }
        })
        .tags(["lesson", "bitcoin"])
        .cacheable(Some(Duration::from_secs(300))),
    ));
    router.register_tool(Arc::new(FnTool::new("flaky_feed", "market", |args: Value| async move {
        if args["attempt"].as_u64().unwrap_or(0) % 3 == 0 {
            Err(anyhow::anyhow!("feed timed out"))
        } else {
            Ok(json!({ "ok": true }))
        }
    })));

    println!("\n  1. Same lesson rendered twice:");
    let lesson = json!({ "topic": "What is a UTXO?" });
    router.execute_tool("render_lesson", lesson.clone()).await?;
    router.execute_tool("render_lesson", lesson.clone()).await?;
    println!("     handler ran {} time(s)", renders.load(Ordering::SeqCst));

    println!("\n  2. Invalidate everything tagged `lesson` and render again:");
    let removed = router.invalidate_cache_tags(&["lesson"]);
    router.execute_tool("render_lesson", lesson).await?;
    println!("     removed {removed} entry, handler ran {} time(s)", renders.load(Ordering::SeqCst));

    println!("\n  3. Batch of flaky feed calls:");
    let calls = (0..6)
        .map(|attempt| ("flaky_feed".to_string(), json!({ "attempt": attempt })))
        .collect();
    let results = router.execute_batch(calls).await;
    let failed = results.iter().filter(|r| r.is_err()).count();
    println!("     {failed}/{} failed", results.len());

    println!("\n  4. Health:");
    print_json(&serde_json::to_value(router.get_health())?)?;

    router.shutdown().await;
    println!();
    Ok(())
}
