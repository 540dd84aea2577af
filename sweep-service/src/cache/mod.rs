// Cache Module
// Cache keys, output directory naming and reuse detection

pub mod key;
pub mod store;

pub use key::{CacheKey, InputLineage, KEY_LEN};
pub use store::{CacheError, CachePolicy, Workspace, JOB_CONFIG_FILE, SUCCESS_MARKER};
