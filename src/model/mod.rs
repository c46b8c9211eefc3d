mod attention;
mod bdh;
mod config;
mod state;

pub use bdh::BDH;
pub use config::BDHConfig;
pub use state::{LayerState, ModelState};
