pub mod config;
pub mod error;
pub mod frame;
pub mod proxy;
pub mod server;

pub use config::{Config, ProxyOptions};
pub use error::{Error, Result};
pub use frame::Frame;
pub use proxy::{
    handler_fn, CommandHandler, CommandRegistry, HandlerError, ProxyError, ProxyEvent, Session,
    StompProxy,
};
pub use server::ProxyListener;
