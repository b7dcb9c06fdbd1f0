#![deny(clippy::all)]

pub mod error;
mod pty;

pub use error::PtyError;
pub use pty::PtyHandle;

pub type Result<T> = std::result::Result<T, PtyError>;
