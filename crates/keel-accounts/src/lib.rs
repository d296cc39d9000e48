//! # keel-accounts
//!
//! Financial accounts as mutable-looking entities on the append-only store.
//!
//! - **Model**: [`Account`] and its inputs; `external_id` and `currency`
//!   are immutable after create
//! - **Versioning**: [`versioned`] conditional updates keyed on
//!   `(id, expected_version)`, confirmed by reading the row back
//! - **Repository**: [`AccountRepository`] create / get / update / list
//!
//! ## Crate Position
//!
//! Depends on: keel-core, keel-store.
//! Depended on by: keel-cli.

#![deny(unsafe_code)]

pub mod errors;
pub mod model;
pub mod repository;
pub mod versioned;

pub use errors::{RepoError, Result};
pub use model::{
    Account, AccountFilter, AccountPage, AccountStatus, AccountType, AccountUpdate, NewAccount,
};
pub use repository::AccountRepository;
