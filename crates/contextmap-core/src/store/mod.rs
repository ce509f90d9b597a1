mod anchor;
mod context;

pub use anchor::{extract_anchor, Anchor};
pub use context::ContextStore;
