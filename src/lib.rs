#![forbid(unsafe_code)]

pub mod catalog;
pub mod cli;
pub mod crawl;
pub mod error;
pub mod formats;
pub mod logging;
pub mod normalize;
pub mod reviews;
pub mod snapshot;
pub mod steam;
