#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod attempt;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod settings;
pub mod transport;

pub type Result<T> = std::result::Result<T, error::Error>;

pub use attempt::Attempt;
pub use client::SessionClient;
pub use config::{ConnectionParams, EndpointConfig};
pub use error::{Error, Fault, Kind};
pub use message::Message;
