//! Cooperative cancellation for running streamlets.

mod token;

pub use token::CancellationToken;
