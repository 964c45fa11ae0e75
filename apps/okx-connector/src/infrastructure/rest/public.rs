//! Public market endpoints.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::client::{HttpMethod, RestRequest};
use crate::infrastructure::okx::messages::de_opt_decimal;

/// Instrument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstrumentType {
    /// Spot.
    Spot,
    /// Margin.
    Margin,
    /// Perpetual swap.
    Swap,
    /// Expiry futures.
    Futures,
    /// Options.
    Option,
}

/// `GET /api/v5/public/instruments`
///
/// ```rust
/// use okx_connector::infrastructure::rest::{GetInstruments, InstrumentType};
///
/// let request = GetInstruments::new(InstrumentType::Spot).with_inst_id("BTC-USDT");
/// assert_eq!(request.inst_id.as_deref(), Some("BTC-USDT"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInstruments {
    /// Instrument type (required).
    pub inst_type: InstrumentType,
    /// Underlying, for futures/swap/option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uly: Option<String>,
    /// Instrument family, for futures/swap/option.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inst_family: Option<String>,
    /// Single instrument.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,
}

impl GetInstruments {
    /// All instruments of a type.
    #[must_use]
    pub const fn new(inst_type: InstrumentType) -> Self {
        Self {
            inst_type,
            uly: None,
            inst_family: None,
            inst_id: None,
        }
    }

    /// Restrict to one instrument.
    #[must_use]
    pub fn with_inst_id(mut self, inst_id: impl Into<String>) -> Self {
        self.inst_id = Some(inst_id.into());
        self
    }

    /// Restrict to one underlying.
    #[must_use]
    pub fn with_uly(mut self, uly: impl Into<String>) -> Self {
        self.uly = Some(uly.into());
        self
    }

    /// Restrict to one instrument family.
    #[must_use]
    pub fn with_inst_family(mut self, inst_family: impl Into<String>) -> Self {
        self.inst_family = Some(inst_family.into());
        self
    }
}

impl RestRequest for GetInstruments {
    type Data = Instrument;
    const METHOD: HttpMethod = HttpMethod::Get;
    const PATH: &'static str = "/api/v5/public/instruments";
}

/// Instrument definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    /// Instrument identifier.
    pub inst_id: String,
    /// Instrument type.
    pub inst_type: InstrumentType,
    /// Underlying (derivatives).
    #[serde(default)]
    pub uly: String,
    /// Instrument family (derivatives).
    #[serde(default)]
    pub inst_family: String,
    /// Base currency (spot/margin).
    #[serde(default)]
    pub base_ccy: String,
    /// Quote currency (spot/margin).
    #[serde(default)]
    pub quote_ccy: String,
    /// Settlement currency (derivatives).
    #[serde(default)]
    pub settle_ccy: String,
    /// Contract value.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub ct_val: Option<Decimal>,
    /// Contract multiplier.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub ct_mult: Option<Decimal>,
    /// Contract value currency.
    #[serde(default)]
    pub ct_val_ccy: String,
    /// Option type, `C` or `P`.
    #[serde(default)]
    pub opt_type: String,
    /// Strike price.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub stk: Option<Decimal>,
    /// Listing time, epoch millis.
    #[serde(default)]
    pub list_time: String,
    /// Expiry time, epoch millis.
    #[serde(default)]
    pub exp_time: String,
    /// Maximum leverage.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub lever: Option<Decimal>,
    /// Tick size.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub tick_sz: Option<Decimal>,
    /// Lot size.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub lot_sz: Option<Decimal>,
    /// Minimum order size.
    #[serde(default, deserialize_with = "de_opt_decimal")]
    pub min_sz: Option<Decimal>,
    /// Contract type, `linear` or `inverse`.
    #[serde(default)]
    pub ct_type: String,
    /// Futures alias (`this_week`, ...).
    #[serde(default)]
    pub alias: String,
    /// Trading state (`live`, `suspend`, `preopen`, `test`).
    pub state: String,
}

impl Instrument {
    /// Whether the instrument is currently tradable.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state == "live"
    }
}
