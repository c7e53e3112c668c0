pub mod config;
pub mod dag;
pub mod error;
pub mod export;
pub mod fetch;
pub mod history;
pub mod load;
pub mod pipeline;
pub mod process;
