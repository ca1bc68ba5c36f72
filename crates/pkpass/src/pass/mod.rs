//! Pass content model and its serialized form.
//!
//! The packaging pipeline only ever sees a [`PassDocument`]: the already
//! serialized `pass.json` bytes. [`Pass`] is the typed way of producing one.
//! A pass has exactly one [`PassStyle`]; the wire format expresses the style
//! as a single top-level key (`boardingPass`, `coupon`, `eventTicket`,
//! `generic` or `storeCard`), and deserialization rejects documents with zero
//! or several of them.
//!
//! # Examples
//!
//! ```
//! use pkpass::pass::{Field, Pass, PassDocument, PassFields, PassStyle};
//!
//! let pass = Pass::builder(PassStyle::Generic(
//!     PassFields::default().primary(Field::new("member", "Jane Doe")),
//! ))
//! .pass_type_identifier("pass.com.example.member")
//! .team_identifier("A1B2C3D4E5")
//! .serial_number("0001")
//! .organization_name("Example")
//! .description("Membership card")
//! .build()?;
//!
//! let document = PassDocument::from_pass(&pass)?;
//! assert!(document.as_bytes().starts_with(b"{"));
//! # Ok::<(), pkpass::Error>(())
//! ```

pub mod fields;

pub use fields::{
    Barcode, BarcodeFormat, BoardingPass, Color, Field, FieldValue, Location, PassFields,
    TextAlignment, TransitType,
};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Wire format version; the only one wallets accept.
pub const FORMAT_VERSION: u8 = 1;

const MIN_AUTH_TOKEN_LEN: usize = 16;

/// Serialized `pass.json` bytes handed to the pipeline.
///
/// The pipeline never mutates or re-encodes these bytes; they are written to
/// the bundle verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDocument(Vec<u8>);

impl PassDocument {
    /// Wrap caller-provided JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pass`] if the bytes are not valid JSON.
    pub fn from_json_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        let bytes = bytes.into();
        serde_json::from_slice::<serde::de::IgnoredAny>(&bytes)
            .map_err(|e| Error::Pass(format!("pass.json is not valid JSON: {e}")))?;
        Ok(Self(bytes))
    }

    /// Serialize a typed pass.
    pub fn from_pass(pass: &Pass) -> Result<Self> {
        serde_json::to_vec_pretty(pass)
            .map(Self)
            .map_err(|e| Error::staging("Failed to serialize pass", e))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Parse the document back into a typed pass.
    pub fn parse(&self) -> Result<Pass> {
        serde_json::from_slice(&self.0).map_err(|e| Error::Pass(e.to_string()))
    }
}

/// Visual style of a pass, with the field groups that style carries.
#[derive(Debug, Clone, PartialEq)]
pub enum PassStyle {
    BoardingPass(BoardingPass),
    Coupon(PassFields),
    EventTicket(PassFields),
    Generic(PassFields),
    StoreCard(PassFields),
}

impl PassStyle {
    /// Top-level JSON key for this style.
    pub fn key(&self) -> &'static str {
        match self {
            PassStyle::BoardingPass(_) => "boardingPass",
            PassStyle::Coupon(_) => "coupon",
            PassStyle::EventTicket(_) => "eventTicket",
            PassStyle::Generic(_) => "generic",
            PassStyle::StoreCard(_) => "storeCard",
        }
    }

    pub fn fields(&self) -> &PassFields {
        match self {
            PassStyle::BoardingPass(boarding) => &boarding.fields,
            PassStyle::Coupon(fields)
            | PassStyle::EventTicket(fields)
            | PassStyle::Generic(fields)
            | PassStyle::StoreCard(fields) => fields,
        }
    }
}

/// Registration endpoint for pass updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebService {
    pub url: String,
    pub authentication_token: String,
}

/// Typed pass content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPass", into = "RawPass")]
pub struct Pass {
    pub pass_type_identifier: String,
    pub serial_number: String,
    pub team_identifier: String,
    pub organization_name: String,
    pub description: String,
    pub logo_text: Option<String>,
    pub foreground_color: Option<Color>,
    pub background_color: Option<Color>,
    pub label_color: Option<Color>,
    pub barcodes: Vec<Barcode>,
    pub locations: Vec<Location>,
    pub relevant_date: Option<String>,
    pub expiration_date: Option<String>,
    pub voided: bool,
    pub web_service: Option<WebService>,
    pub style: PassStyle,
}

impl Pass {
    pub fn builder(style: PassStyle) -> PassBuilder {
        PassBuilder::new(style)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("passTypeIdentifier", &self.pass_type_identifier),
            ("serialNumber", &self.serial_number),
            ("teamIdentifier", &self.team_identifier),
            ("organizationName", &self.organization_name),
            ("description", &self.description),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Pass(format!("{name} is required")));
            }
        }

        if let Some(service) = &self.web_service {
            if service.authentication_token.len() < MIN_AUTH_TOKEN_LEN {
                return Err(Error::Pass(format!(
                    "authenticationToken must be at least {MIN_AUTH_TOKEN_LEN} characters"
                )));
            }
        }

        let mut keys = std::collections::HashSet::new();
        for field in self.style.fields().all() {
            if !keys.insert(field.key.as_str()) {
                return Err(Error::Pass(format!("duplicate field key {:?}", field.key)));
            }
        }

        Ok(())
    }
}

/// Builder enforcing the required top-level keys.
#[derive(Debug, Clone)]
pub struct PassBuilder {
    pass: Pass,
}

impl PassBuilder {
    pub fn new(style: PassStyle) -> Self {
        Self {
            pass: Pass {
                pass_type_identifier: String::new(),
                serial_number: String::new(),
                team_identifier: String::new(),
                organization_name: String::new(),
                description: String::new(),
                logo_text: None,
                foreground_color: None,
                background_color: None,
                label_color: None,
                barcodes: Vec::new(),
                locations: Vec::new(),
                relevant_date: None,
                expiration_date: None,
                voided: false,
                web_service: None,
                style,
            },
        }
    }

    pub fn pass_type_identifier(mut self, value: impl Into<String>) -> Self {
        self.pass.pass_type_identifier = value.into();
        self
    }

    pub fn serial_number(mut self, value: impl Into<String>) -> Self {
        self.pass.serial_number = value.into();
        self
    }

    pub fn team_identifier(mut self, value: impl Into<String>) -> Self {
        self.pass.team_identifier = value.into();
        self
    }

    pub fn organization_name(mut self, value: impl Into<String>) -> Self {
        self.pass.organization_name = value.into();
        self
    }

    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.pass.description = value.into();
        self
    }

    pub fn logo_text(mut self, value: impl Into<String>) -> Self {
        self.pass.logo_text = Some(value.into());
        self
    }

    pub fn colors(mut self, foreground: Color, background: Color, label: Color) -> Self {
        self.pass.foreground_color = Some(foreground);
        self.pass.background_color = Some(background);
        self.pass.label_color = Some(label);
        self
    }

    pub fn barcode(mut self, barcode: Barcode) -> Self {
        self.pass.barcodes.push(barcode);
        self
    }

    pub fn location(mut self, location: Location) -> Self {
        self.pass.locations.push(location);
        self
    }

    /// W3C date string, e.g. `2026-10-19T19:30:00-07:00`.
    pub fn relevant_date(mut self, value: impl Into<String>) -> Self {
        self.pass.relevant_date = Some(value.into());
        self
    }

    pub fn expiration_date(mut self, value: impl Into<String>) -> Self {
        self.pass.expiration_date = Some(value.into());
        self
    }

    pub fn voided(mut self, voided: bool) -> Self {
        self.pass.voided = voided;
        self
    }

    pub fn web_service(mut self, url: impl Into<String>, token: impl Into<String>) -> Self {
        self.pass.web_service = Some(WebService {
            url: url.into(),
            authentication_token: token.into(),
        });
        self
    }

    /// Validate and return the pass.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Pass`] if a required key is empty, the web service
    /// token is too short, or two fields share a key.
    pub fn build(self) -> Result<Pass> {
        self.pass.validate()?;
        Ok(self.pass)
    }
}

/// `pass.json` as it appears on the wire.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPass {
    format_version: u8,
    pass_type_identifier: String,
    serial_number: String,
    team_identifier: String,
    organization_name: String,
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    logo_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    foreground_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    background_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label_color: Option<Color>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    barcodes: Vec<Barcode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    locations: Vec<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relevant_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    voided: bool,
    #[serde(rename = "webServiceURL", default, skip_serializing_if = "Option::is_none")]
    web_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    authentication_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    boarding_pass: Option<BoardingPass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    coupon: Option<PassFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_ticket: Option<PassFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    generic: Option<PassFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    store_card: Option<PassFields>,
}

impl TryFrom<RawPass> for Pass {
    type Error = Error;

    fn try_from(raw: RawPass) -> Result<Self> {
        if raw.format_version != FORMAT_VERSION {
            return Err(Error::Pass(format!(
                "unsupported formatVersion {}",
                raw.format_version
            )));
        }

        let mut styles = Vec::with_capacity(1);
        if let Some(fields) = raw.boarding_pass {
            styles.push(PassStyle::BoardingPass(fields));
        }
        if let Some(fields) = raw.coupon {
            styles.push(PassStyle::Coupon(fields));
        }
        if let Some(fields) = raw.event_ticket {
            styles.push(PassStyle::EventTicket(fields));
        }
        if let Some(fields) = raw.generic {
            styles.push(PassStyle::Generic(fields));
        }
        if let Some(fields) = raw.store_card {
            styles.push(PassStyle::StoreCard(fields));
        }
        if styles.len() != 1 {
            return Err(Error::Pass(format!(
                "exactly one style key is required, found {}",
                styles.len()
            )));
        }
        let style = styles.remove(0);

        let web_service = match (raw.web_service_url, raw.authentication_token) {
            (Some(url), Some(authentication_token)) => Some(WebService {
                url,
                authentication_token,
            }),
            (None, None) => None,
            _ => {
                return Err(Error::Pass(
                    "webServiceURL and authenticationToken must be set together".into(),
                ))
            }
        };

        let pass = Pass {
            pass_type_identifier: raw.pass_type_identifier,
            serial_number: raw.serial_number,
            team_identifier: raw.team_identifier,
            organization_name: raw.organization_name,
            description: raw.description,
            logo_text: raw.logo_text,
            foreground_color: raw.foreground_color,
            background_color: raw.background_color,
            label_color: raw.label_color,
            barcodes: raw.barcodes,
            locations: raw.locations,
            relevant_date: raw.relevant_date,
            expiration_date: raw.expiration_date,
            voided: raw.voided,
            web_service,
            style,
        };
        pass.validate()?;
        Ok(pass)
    }
}

impl From<Pass> for RawPass {
    fn from(pass: Pass) -> Self {
        let (web_service_url, authentication_token) = match pass.web_service {
            Some(service) => (Some(service.url), Some(service.authentication_token)),
            None => (None, None),
        };

        let mut raw = RawPass {
            format_version: FORMAT_VERSION,
            pass_type_identifier: pass.pass_type_identifier,
            serial_number: pass.serial_number,
            team_identifier: pass.team_identifier,
            organization_name: pass.organization_name,
            description: pass.description,
            logo_text: pass.logo_text,
            foreground_color: pass.foreground_color,
            background_color: pass.background_color,
            label_color: pass.label_color,
            barcodes: pass.barcodes,
            locations: pass.locations,
            relevant_date: pass.relevant_date,
            expiration_date: pass.expiration_date,
            voided: pass.voided,
            web_service_url,
            authentication_token,
            boarding_pass: None,
            coupon: None,
            event_ticket: None,
            generic: None,
            store_card: None,
        };

        match pass.style {
            PassStyle::BoardingPass(fields) => raw.boarding_pass = Some(fields),
            PassStyle::Coupon(fields) => raw.coupon = Some(fields),
            PassStyle::EventTicket(fields) => raw.event_ticket = Some(fields),
            PassStyle::Generic(fields) => raw.generic = Some(fields),
            PassStyle::StoreCard(fields) => raw.store_card = Some(fields),
        }

        raw
    }
}
