//! # wand
//!
//! Magic-link gated reverse proxy.
//!
//! An operator issues a link to a private origin; whoever opens the link
//! gets a session cookie and is proxied to that origin until the session
//! runs out. Links carry a use count and an expiry, and can only point at
//! targets outside the denylist.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wand::prelude::*;
//!
//! # async fn example() -> Result<(), WandError> {
//! let server = WandServer::builder()
//!     .domain("wand.example")
//!     .bind("0.0.0.0:443")
//!     .build()
//!     .await?;
//!
//! let link = server
//!     .issuance()
//!     .issue("intranet.local:8080", false, &IssueOptions::default())?;
//! println!("{}", link.url);
//!
//! server.run().await
//! # }
//! ```

pub mod config;
mod error;
pub mod handler;
mod server;

pub use error::WandError;
pub use server::{ShutdownHandle, WandServer, WandServerBuilder};

/// Re-exports of the most commonly used types.
pub mod prelude {
    pub use crate::config::Args;
    pub use crate::handler::{IssuanceEndpoint, IssuanceRenderer, JsonRenderer};
    pub use crate::{ShutdownHandle, WandError, WandServer, WandServerBuilder};

    pub use wand_issue::{Denylist, IssuanceService, IssueError, IssueOptions, IssueParams, IssuedLink};
    pub use wand_proxy::{CredentialCookie, ProxyError};
    pub use wand_reaper::{ReaperConfig, ReaperMetrics};
    pub use wand_session::{
        AuthError, Clock, ManualClock, SessionError, SystemClock, Target, TargetError,
    };
}
