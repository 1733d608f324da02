mod checksum;
mod plugin_id;

pub use checksum::{sha256_hex, verify_sha256};
pub use plugin_id::compute_plugin_id;
