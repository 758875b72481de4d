//! Built-in toolkits.

mod calculator;
mod files;
mod http;

pub use calculator::calculator_toolkit;
pub use files::files_toolkit;
pub use http::{http_toolkit, HttpConfig};
