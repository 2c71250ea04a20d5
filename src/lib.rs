//! # ore-engine
//!
//! Client-side accrual and reconciliation engine for an idle mining game.
//!
//! Energy regenerates locally once per second while the game is in the
//! foreground. Claims convert it into score optimistically and are confirmed
//! by the authoritative store. Progress is saved on a fixed cadence and on
//! lifecycle edges, and every resume starts with the store recomputing what
//! was mined while the player was away.
//!
//! ```rust,no_run
//! use ore_engine::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo(store: Arc<dyn AuthoritativeStore>) -> anyhow::Result<()> {
//! let config = Config::default();
//! let session = MiningSession::new(&config, store, Arc::new(SystemClock));
//! let handle = session.handle();
//! let (lifecycle, rx) = tokio::sync::mpsc::channel(8);
//! tokio::spawn(session.run(rx));
//!
//! handle.claim().await;
//! lifecycle.send(LifecycleEvent::Teardown).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod mining;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;
pub mod task;
pub mod time;
pub mod types;

pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{EngineError, StoreError};
    pub use crate::identity::PlayerIdentity;
    pub use crate::mining::{ClaimOutcome, GrantOutcome};
    pub use crate::session::{LifecycleEvent, MiningSession, SessionHandle};
    pub use crate::store::{AuthoritativeStore, HttpStore, MemoryStore};
    pub use crate::time::{Clock, ManualClock, SystemClock};
    pub use crate::types::{EngineEvent, ResourceSnapshot, SessionPhase, Tiers};
}
