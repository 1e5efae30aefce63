use serde::{Deserialize, Serialize};
use serde_json::Number;
use thiserror::Error;

/// Invoice fields extracted from document text.
///
/// Every field is optional: unknown values are `null` rather than invented.
/// Amounts stay as JSON numbers so that exports reproduce them exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceExtract {
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub invoice_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub seller_name: Option<String>,
    #[serde(default)]
    pub seller_vat_id: Option<String>,
    #[serde(default)]
    pub buyer_name: Option<String>,
    #[serde(default)]
    pub buyer_vat_id: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub subtotal: Option<Number>,
    #[serde(default)]
    pub vat_total: Option<Number>,
    #[serde(default)]
    pub total: Option<Number>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub line_items: Vec<LineItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<Number>,
    #[serde(default)]
    pub unit_price: Option<Number>,
    #[serde(default)]
    pub line_total: Option<Number>,
    #[serde(default)]
    pub vat_rate: Option<Number>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<LineItem>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<LineItem>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("response is not valid JSON: {0}")]
    NotJson(String),

    #[error("response does not match the invoice schema: {0}")]
    Schema(String),
}

/// Remove a surrounding markdown code fence (```` ``` ```` or ```` ```json ````).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse generator output into an [`InvoiceExtract`].
///
/// The output must be a JSON object; type mismatches (e.g. a string total)
/// are schema violations.
pub fn parse_generated(raw: &str) -> Result<InvoiceExtract, ExtractError> {
    let cleaned = strip_code_fences(raw);
    let value: serde_json::Value =
        serde_json::from_str(cleaned).map_err(|e| ExtractError::NotJson(e.to_string()))?;
    if !value.is_object() {
        return Err(ExtractError::Schema("expected a JSON object".into()));
    }
    serde_json::from_value(value).map_err(|e| ExtractError::Schema(e.to_string()))
}
