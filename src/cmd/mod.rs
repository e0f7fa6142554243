//! CLI command implementations.
//!
//! | Module   | Commands handled       |
//! |----------|------------------------|
//! | `serve`  | `Serve`                |
//! | `job`    | `Generate`, `Iterate`  |
//! | `config` | `Config`               |

pub mod config;
pub mod job;
pub mod serve;

pub use config::cmd_config;
pub use job::{cmd_generate, cmd_iterate};
pub use serve::cmd_serve;
