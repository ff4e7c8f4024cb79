pub mod config;
pub mod domain;
pub mod download;
pub mod engine;
pub mod error;
pub mod fetch_state;
pub mod invalidate;
pub mod normalize;
pub mod otf;
pub mod output;
pub mod params;
pub mod plan;
pub mod precomputed;
pub mod query;
pub mod registry;
pub mod router;
pub mod widgets;
