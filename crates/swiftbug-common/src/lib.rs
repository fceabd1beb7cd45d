pub mod buffer;
pub mod error;
pub mod protocol;
pub mod settings;

pub use buffer::BoundedBuffer;
pub use error::backend_error::BackendError;
pub use settings::{Settings, SettingsPatch};
