//! # reverie-shared
//!
//! Building blocks shared by the store and the journal services: typed ids,
//! the symmetric cipher used for journal fields, password key derivation,
//! recovery-key hashing, POV fingerprints and the POV block parser.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod pov;
pub mod types;

pub use error::CryptoError;
pub use types::{BlockId, EntryId, ReplyId, UserId};
