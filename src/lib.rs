//! Decoder for PX4's ULog flight-log binary format.
//!
//! Hand a [`byte_source::ByteSource`] to [`engine::UlogEngine`], call
//! `open()`, then query the header, subscriptions, and time range, or
//! stream messages out of the Data section with `read_messages`.

pub mod byte_source;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod index;
pub mod message;
pub mod reader;
pub mod records;

pub use byte_source::ByteSource;
pub use engine::{
    DataSectionMessage, Header, InfoValue, MessageIter, ParamEntry, ParamValue,
    ReadMessagesOptions, Subscription, UlogEngine, UlogEngineOptions,
};
pub use error::{Result, UlogError};
pub use message::Value;
