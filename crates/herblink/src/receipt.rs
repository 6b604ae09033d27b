//! QR receipts for stored submissions.

use chrono::{DateTime, SecondsFormat, Utc};
use qrcode::render::{svg, unicode};
use qrcode::QrCode;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::submission::SubmissionRecord;

/// Value of the receipt's `type` field.
const RECEIPT_TYPE: &str = "herb_submission";

/// Scheme of the deep link embedded in the receipt.
const LINK_PREFIX: &str = "herblink://herb/";

/// The payload encoded in a submission's QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Remote id once synced, otherwise the local id.
    pub herb_id: String,
    /// Herb named in the submission.
    pub herb_name: String,
    /// When the submission was recorded, RFC 3339.
    pub timestamp: String,
    /// Always `herb_submission`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Deep link to the submission.
    pub url: String,
}

impl Receipt {
    /// Build the receipt for a record.
    #[must_use]
    pub fn for_record(record: &SubmissionRecord) -> Self {
        let herb_id = record
            .remote_id
            .clone()
            .unwrap_or_else(|| record.local_id.clone());
        Self::new(herb_id, &record.details.herb_name, record.created_at)
    }

    fn new(herb_id: String, herb_name: &str, at: DateTime<Utc>) -> Self {
        Self {
            url: format!("{LINK_PREFIX}{herb_id}"),
            herb_id,
            herb_name: herb_name.to_string(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            kind: RECEIPT_TYPE,
        }
    }

    /// The JSON text encoded in the QR code.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn qr_code(&self) -> Result<QrCode> {
        QrCode::new(self.to_json()?.as_bytes()).map_err(|e| Error::QrEncode(e.to_string()))
    }

    /// Render the QR code with Unicode half blocks for a terminal.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn render_terminal(&self) -> Result<String> {
        Ok(self
            .qr_code()?
            .render::<unicode::Dense1x2>()
            .dark_color(unicode::Dense1x2::Light)
            .light_color(unicode::Dense1x2::Dark)
            .build())
    }

    /// Render the QR code as an SVG document.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded.
    pub fn render_svg(&self) -> Result<String> {
        Ok(self
            .qr_code()?
            .render::<svg::Color<'_>>()
            .min_dimensions(200, 200)
            .dark_color(svg::Color("#1b5e20"))
            .light_color(svg::Color("#ffffff"))
            .build())
    }
}
