/// AMPChat Crypto Library
///
/// Signed capability tokens for AMP email links. A token binds one user to one
/// conversation until an expiry, and is checked by recomputing an HMAC-SHA256
/// over its fields with a process-wide secret. Nothing here touches storage or
/// the network.

pub mod token;

pub use token::{CapabilityToken, TokenCodec, TokenError};
