//! CLI command implementations.
//!
//! | Module   | Commands handled        |
//! |----------|-------------------------|
//! | `serve`  | `Serve`                 |
//! | `db`     | `Migrate`, `Bootstrap`  |
//! | `config` | `Config`                |

pub mod config;
pub mod db;
pub mod serve;

pub use config::cmd_config;
pub use db::{cmd_bootstrap, cmd_migrate};
pub use serve::cmd_serve;
