//! # CardVault Common Library
//!
//! Shared code for the CardVault services:
//! - Error and result types
//! - Card, batch and collection domain models
//! - Clock abstraction used for expiry checks
//! - Configuration file and root folder resolution

pub mod config;
pub mod error;
pub mod models;
pub mod time;

pub use error::{Error, Result};
pub use models::{Batch, CardEntry, Collection, CollectionCard, UserId};
pub use time::{Clock, ManualClock, SystemClock};
