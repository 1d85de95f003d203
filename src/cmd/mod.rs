//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module      | Commands handled   |
//! |-------------|--------------------|
//! | `procedure` | `Procedure`        |
//! | `multi`     | `Multi`            |
//! | `env`       | `Env`              |
//! | `summary`   | `Summary`          |

pub mod env;
pub mod multi;
pub mod procedure;
pub mod summary;

pub use env::cmd_env;
pub use multi::{MultiOptions, cmd_multi};
pub use procedure::cmd_procedure;
pub use summary::cmd_summary;
