//! satsdesk-core: the dispatch layer every satsdesk tool and agent call
//! passes through.
//!
//! - [`config`] — Typed configuration loading from JSON
//! - [`cache`] — Tag-addressable TTL cache with LRU eviction under a byte budget
//! - [`bus`] — Priority-ordered publish/subscribe with per-handler failure isolation
//! - [`tools`] — `Tool`/`Agent` contracts, closure adapters, registry and market-data tools
//! - [`router`] — Registry + cache + bus behind a single observable entry point
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use satsdesk_core::config::Config;
//! use satsdesk_core::router::Router;
//! use satsdesk_core::tools::market::BitcoinPriceTool;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let router = Router::new();
//! router.register_tool(Arc::new(BitcoinPriceTool::new(&config.market)?));
//! router.initialize(config.router).await?;
//!
//! let price = router
//!     .execute_tool("get_bitcoin_price", serde_json::json!({"vs_currency": "usd"}))
//!     .await?;
//! println!("{price}");
//! router.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod router;
pub mod tools;

pub use error::{CacheError, RouterError};
