//! Sons: user-defined automation rules.

pub mod model;
pub mod service;

pub use model::{Action, NewSon, Son};
pub use service::SonService;
