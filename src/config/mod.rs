pub mod relay;

pub use relay::{load_config_default, load_config_from, RelayConfig};
