//! OKX REST API
//!
//! Signed request/response client for `https://www.okx.com/api/v5`.
//!
//! - `client`: signing, transport and envelope decoding
//! - `error`: REST error type
//! - `public`: public market endpoints

pub mod client;
pub mod error;
pub mod public;

pub use client::{HttpMethod, RestClient, RestRequest, RestSettings};
pub use error::RestError;
pub use public::{GetInstruments, Instrument, InstrumentType};
