pub mod config;
pub mod errors;
pub mod format;
pub mod media_host;
pub mod models;
pub mod progress;
pub mod response;
pub mod store;
pub mod uploader;
pub mod validate;

pub use config::*;
pub use errors::*;
pub use format::*;
pub use media_host::*;
pub use models::*;
pub use progress::*;
pub use response::*;
pub use store::*;
pub use uploader::*;
pub use validate::*;
