//! CLI command implementations.
//!
//! | Module   | Commands handled      |
//! |----------|-----------------------|
//! | `serve`  | `Serve`               |
//! | `jobs`   | `Enqueue`, `Status`   |
//! | `parse`  | `Parse`               |

pub mod jobs;
pub mod parse;
pub mod serve;

pub use jobs::{cmd_enqueue, cmd_status};
pub use parse::cmd_parse;
pub use serve::cmd_serve;
