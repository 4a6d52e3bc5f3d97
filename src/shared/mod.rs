pub mod config;
pub mod debounce;
pub mod history;
pub mod live;
pub mod models;
pub mod ranking;
pub mod search;
pub mod storage;
pub mod store;

pub use config::*;
pub use history::*;
pub use live::*;
pub use models::*;
pub use search::*;
pub use storage::*;
pub use store::*;
