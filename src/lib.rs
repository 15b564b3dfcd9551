pub mod api;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod loader;
pub mod runtime;
pub mod value;

pub use bridge::Bridge;
pub use config::{BridgeConfig, LoaderConfig};
pub use dispatch::{Dispatcher, Target};
pub use error::{CallError, Error, Result, Stage};
pub use loader::{InvokeFailure, Loader, LoaderContext, LoaderFactory};
pub use value::{FunctionHandle, Kind, Param, Signature, Value};
