mod alias;
mod endpoint;

pub use alias::{alias_for, default_alias, Alias, ALIAS_DIR};
pub use endpoint::{Endpoint, FlushOutcome, ReadOutcome};
