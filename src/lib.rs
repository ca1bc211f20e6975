//! YDS Logger
//!
//! Reads the Yamaha diagnostic (YDS) K-Line bus through an L9637D
//! transceiver, decodes live engine data, learns gear ratios and serves the
//! values to dashboard apps by emulating an ELM327 adapter.

pub mod clock;
pub mod commands;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod elm;
pub mod framer;
pub mod gateway;
pub mod gear;
pub mod liveness;
pub mod serial;
pub mod storage;
pub mod tcp;
pub mod telemetry;
pub mod transport;
pub mod validators;


pub use clock::{MockClock, SystemClock, TimeSource};
pub use config::{Config, ConfigError};
pub use framer::{checksum, BusMode, Frame, FrameEvent, Framer, FramerConfig, FramerState};
pub use gateway::{Gateway, Tick};
pub use gear::{classify, GearLearner, LearnEvent, RatioTable};
pub use serial::{ByteSource, SerialBus};
pub use storage::{KvStore, MemoryStore, SqliteStore, StorageError};
pub use tcp::TcpBridge;
pub use telemetry::{FixedHealth, HealthProbe, Telemetry};
pub use transport::{Inbound, Outbound, QueueTransport, Transport};
