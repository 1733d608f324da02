mod resolve;

pub use resolve::{resolve_name, resolve_short_alias};
