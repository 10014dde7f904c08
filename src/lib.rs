pub mod api;
pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod fc;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod state;
pub mod stream;

mod util;
