mod error;
pub mod models;
mod server;
pub mod services;
pub mod state;
pub(crate) mod utils;

pub use error::ApiError;
pub use server::{ServerError, router, run};
pub use state::{AppState, StoreOpenError, Stores};
pub use utils::parse_handle;
