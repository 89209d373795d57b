pub mod geo;
pub mod notifier;
pub mod token_issuer;
pub mod verification;
