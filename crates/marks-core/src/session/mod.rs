//! Session domain module.
//!
//! This module contains the authentication session model and the traits the
//! rest of the system uses to obtain and read it.
//!
//! # Module Structure
//!
//! - `model`: Session domain model (`Session`, `SignInGrant`)
//! - `provider`: Identity boundary (`IdentityProvider`) and the ambient
//!   credential seam (`CredentialSource`)
//!
//! # Usage
//!
//! ```ignore
//! use marks_core::session::{Session, IdentityProvider, CredentialSource};
//! ```

mod model;
mod provider;

// Re-export public API
pub use model::{Session, SignInGrant};
pub use provider::{CredentialSource, IdentityProvider};
