mod app;
mod faults;
pub mod fixtures;

pub use app::TestApp;
pub use faults::FaultyStorage;
