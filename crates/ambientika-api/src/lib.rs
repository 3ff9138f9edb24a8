// ambientika-api: Async Rust client for the Ambientika cloud device service

pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use client::AmbientikaClient;
pub use error::Error;
pub use models::{
    DeviceDto, DeviceStatusDto, HouseDto, Level, RoomDto, WireRole, ZoneDto,
};
pub use transport::{ClientConfig, TlsMode};

/// Default cloud endpoint for the Ambientika service.
pub const DEFAULT_BASE_URL: &str = "https://app.ambientika.eu:4521/";
