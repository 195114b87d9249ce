//! Token issuance and validation.

pub mod claims;
pub mod service;

pub use claims::TokenClaims;
pub use service::{
    MintDenial, MintOutcome, MintRequest, MintedToken, TokenService, ValidateDenial,
    ValidateOutcome, ValidateRequest, ValidatedToken,
};
