//! Shared building blocks for the botgate crates: configuration, the error
//! type, an injectable clock and a transport-neutral view of a request.

mod clock;
mod config;
mod error;
mod request;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::*;
pub use error::{BotgateError, BotgateResult};
pub use request::RequestMeta;
