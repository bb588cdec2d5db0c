pub mod config;
pub mod logging;
pub mod normalization;
pub mod pipeline;
pub mod providers;
pub mod stages;
pub mod watchlist;

pub mod util {
    pub mod env;
}
