pub mod api;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod orchestration;
pub mod signals;
pub mod tuning;

pub use config::Config;
pub use domain::{Decimal, InstId, PerSide, PosSide, Side, TimeMs};
pub use engine::{EngineError, EventLog};
pub use error::AppError;
pub use gateway::{ExchangeGateway, MockGateway, OkxGateway, OrderRouter};
pub use orchestration::{ControlLoop, StatusHandle};
pub use signals::{CandleSignalSource, SignalSource};
pub use tuning::{Tuning, TuningFile};
