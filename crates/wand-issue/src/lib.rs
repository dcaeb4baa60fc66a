//! Link issuance for wand.
//!
//! Turns a requested target plus optional knobs into a stored link and the
//! public URL that redeems it:
//!
//! ```text
//! IssueParams (query string)
//!     │ IssueOptions::from_params     default / clamp each option
//!     ▼
//! IssuanceService::issue
//!     │ Target::parse                 normalize, reject non-origins
//!     │ Denylist::contains            reject forbidden origins
//!     │ LinkRegistry::create          mint token, store link
//!     ▼
//! IssuedLink { url: "https://<domain>/<token>", .. }
//! ```
//!
//! Out-of-range options are clamped, never rejected. Malformed or
//! forbidden targets are rejected and nothing is stored.

mod denylist;
mod error;
mod options;
mod service;

pub use denylist::Denylist;
pub use error::IssueError;
pub use options::{
    Bounds, IssueOptions, IssueParams, LINK_EXPIRY, LINK_USES, SESSION_DURATION,
};
pub use service::{IssuanceService, IssuedLink};
