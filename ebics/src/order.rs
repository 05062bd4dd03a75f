//! Order catalogue: order types, their parameters and the per-version
//! support matrix.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::PreconditionError;
use crate::version::{Version, VersionDescriptor};

macro_rules! order_types {
    ($($name:ident => $doc:literal,)*) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum OrderType {
            $(#[doc = $doc] $name,)*
        }

        impl OrderType {
            pub const ALL: &'static [OrderType] = &[$(OrderType::$name,)*];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(OrderType::$name => stringify!($name),)*
                }
            }
        }

        impl FromStr for OrderType {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $(stringify!($name) => Ok(OrderType::$name),)*
                    other => Err(format!("unknown order type `{}`", other)),
                }
            }
        }
    };
}

order_types! {
    INI => "Send the user's signature key.",
    HIA => "Send the user's authentication and encryption keys.",
    HPB => "Fetch the bank's authentication and encryption keys.",
    HPD => "Bank parameters.",
    HKD => "Customer and subscriber information.",
    HTD => "Subscriber information.",
    HAA => "Available order types.",
    PTK => "Customer protocol, text format.",
    HAC => "Customer protocol, XML format.",
    STA => "SWIFT MT940 statement.",
    VMK => "SWIFT MT942 interim statement.",
    Z52 => "camt.052, Swiss variant.",
    Z53 => "camt.053, Swiss variant.",
    Z54 => "camt.054, Swiss variant.",
    C52 => "camt.052 account report.",
    C53 => "camt.053 statement.",
    C54 => "camt.054 debit/credit notification.",
    FDL => "Download with a free file format.",
    FUL => "Upload with a free file format.",
    CCT => "SEPA credit transfer.",
    CDD => "SEPA core direct debit.",
    CDB => "SEPA B2B direct debit.",
    CIP => "SEPA instant credit transfer.",
    XE2 => "Swiss credit transfer (pain.001).",
    XE3 => "Swiss direct debit (pain.008).",
    YCT => "Universal credit transfer.",
    BTD => "Business transaction download (3.0).",
    BTU => "Business transaction upload (3.0).",
    HVU => "VEU overview.",
    HVZ => "VEU overview with additional information.",
    HVD => "VEU state of an order.",
    HVT => "VEU transaction details.",
    HVE => "VEU signature addition.",
    HVS => "VEU cancellation.",
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    KeyManagement,
    Download,
    Upload,
}

impl OrderType {
    pub fn direction(self) -> Direction {
        use OrderType::*;
        match self {
            INI | HIA | HPB => Direction::KeyManagement,
            FUL | CCT | CDD | CDB | CIP | XE2 | XE3 | YCT | BTU | HVE | HVS => Direction::Upload,
            _ => Direction::Download,
        }
    }

    /// HVE and HVS carry an electronic signature but no order data.
    pub fn is_signature_only(self) -> bool {
        matches!(self, OrderType::HVE | OrderType::HVS)
    }

    pub fn is_supported_by(self, version: Version) -> bool {
        use OrderType::*;
        match self {
            INI | HIA | HPB | HPD | HKD | HTD | HAA | PTK | HAC => true,
            HVU | HVZ | HVD | HVT | HVE | HVS => true,
            BTD | BTU => version == Version::H005,
            STA | VMK | Z52 | Z53 | Z54 | C52 | C53 | C54 | FDL | FUL | CCT | CDD | CDB | CIP | XE2 | XE3
            | YCT => version != Version::H005,
        }
    }

    fn uses_file_format(self) -> bool {
        matches!(self, OrderType::FDL | OrderType::FUL)
    }

    fn uses_service(self) -> bool {
        matches!(self, OrderType::BTD | OrderType::BTU)
    }

    fn uses_veu_params(self) -> bool {
        matches!(self, OrderType::HVD | OrderType::HVT | OrderType::HVE | OrderType::HVS)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }
}

/// `FileFormat` of FDL/FUL orders, e.g. `pain.001.001.03` for `CH`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormat {
    pub format: String,
    pub country_code: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageName {
    pub name: String,
    pub version: Option<String>,
    pub variant: Option<String>,
    pub format: Option<String>,
}

impl MessageName {
    pub fn new(name: impl Into<String>) -> Self {
        MessageName {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Business transaction description of EBICS 3.0 (BTD/BTU, VEU).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub scope: Option<String>,
    pub option: Option<String>,
    /// `containerType` of the `Container` element, e.g. `ZIP`.
    pub container: Option<String>,
    pub message: MessageName,
}

impl Service {
    pub fn new(name: impl Into<String>, message: MessageName) -> Self {
        Service {
            name: name.into(),
            message,
            ..Default::default()
        }
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn option(mut self, option: impl Into<String>) -> Self {
        self.option = Some(option.into());
        self
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }
}

/// The order a VEU request refers to: an order type before 3.0, a
/// service description from 3.0 on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VeuTarget {
    OrderType(String),
    Service(Service),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HvtFlags {
    pub complete_order_data: bool,
    pub fetch_limit: u32,
    pub fetch_offset: u32,
}

impl Default for HvtFlags {
    fn default() -> Self {
        HvtFlags {
            complete_order_data: true,
            fetch_limit: 100,
            fetch_offset: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VeuParams {
    pub partner_id: String,
    pub target: VeuTarget,
    pub order_id: String,
    /// Only used by HVT.
    pub flags: Option<HvtFlags>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderParams {
    #[default]
    None,
    FileFormat(FileFormat),
    Service(Service),
    Veu(VeuParams),
}

impl OrderParams {
    fn name(&self) -> &'static str {
        match self {
            OrderParams::None => "no",
            OrderParams::FileFormat(_) => "file format",
            OrderParams::Service(_) => "service",
            OrderParams::Veu(_) => "VEU",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub order_type: OrderType,
    pub params: OrderParams,
    pub range: Option<DateRange>,
    /// Uploads without electronic signature go out as unsigned requests.
    pub signed: bool,
}

impl Order {
    pub fn new(order_type: OrderType) -> Self {
        Order {
            order_type,
            params: OrderParams::None,
            range: None,
            signed: true,
        }
    }

    pub fn with_range(mut self, range: DateRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_params(mut self, params: OrderParams) -> Self {
        self.params = params;
        self
    }

    pub fn unsigned(mut self) -> Self {
        self.signed = false;
        self
    }

    pub fn fdl(format: FileFormat) -> Self {
        Order::new(OrderType::FDL).with_params(OrderParams::FileFormat(format))
    }

    pub fn ful(format: FileFormat) -> Self {
        Order::new(OrderType::FUL).with_params(OrderParams::FileFormat(format))
    }

    pub fn btd(service: Service) -> Self {
        Order::new(OrderType::BTD).with_params(OrderParams::Service(service))
    }

    pub fn btu(service: Service) -> Self {
        Order::new(OrderType::BTU).with_params(OrderParams::Service(service))
    }

    pub fn veu(order_type: OrderType, params: VeuParams) -> Self {
        Order::new(order_type).with_params(OrderParams::Veu(params))
    }

    pub fn direction(&self) -> Direction {
        self.order_type.direction()
    }

    /// `OrderAttribute` of pre-3.0 order details.
    pub fn attribute(&self) -> &'static str {
        match self.order_type.direction() {
            Direction::KeyManagement if self.order_type != OrderType::HPB => "DZNNN",
            Direction::KeyManagement | Direction::Download => "DZHNN",
            Direction::Upload if self.order_type.is_signature_only() || !self.signed => "UZHNN",
            Direction::Upload => "OZHNN",
        }
    }

    /// Rejects combinations the protocol version cannot express. Runs
    /// before any envelope is built.
    pub fn validate(&self, descriptor: &VersionDescriptor) -> Result<(), PreconditionError> {
        let order_type = self.order_type;
        if !order_type.is_supported_by(descriptor.version) {
            return Err(PreconditionError::UnsupportedOrderType {
                order_type,
                version: descriptor.version,
            });
        }
        let params_fit = match &self.params {
            OrderParams::None => {
                !order_type.uses_file_format() && !order_type.uses_service() && !order_type.uses_veu_params()
            }
            OrderParams::FileFormat(_) => order_type.uses_file_format(),
            OrderParams::Service(_) => order_type.uses_service(),
            OrderParams::Veu(veu) => {
                order_type.uses_veu_params()
                    && match veu.target {
                        VeuTarget::Service(_) => descriptor.version == Version::H005,
                        VeuTarget::OrderType(_) => descriptor.version != Version::H005,
                    }
            }
        };
        if !params_fit {
            return Err(PreconditionError::InvalidOrderParams {
                order_type,
                params: self.params.name(),
            });
        }
        if self.range.is_some() && order_type.direction() != Direction::Download {
            return Err(PreconditionError::InvalidOrderParams {
                order_type,
                params: "date range",
            });
        }
        if !self.signed && (order_type.direction() != Direction::Upload || !descriptor.unsigned_requests) {
            return Err(PreconditionError::UnsupportedEnvelope {
                kind: crate::version::EnvelopeKind::Unsigned,
                version: descriptor.version,
            });
        }
        Ok(())
    }
}
