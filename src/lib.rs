mod data_url;
mod ort_service;
mod routes;
mod telemetry;

pub mod app;
pub mod config;
pub mod detection;
pub mod labels;
pub mod model_handle;
pub mod model_service;
pub mod server;

pub use app::start_app;
