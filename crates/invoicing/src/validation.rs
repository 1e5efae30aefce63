//! Business checks on an extracted invoice.
//!
//! Validation never fails hard: every problem becomes an issue string in the
//! report so that downstream consumers can decide what to do with it.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::extract::InvoiceExtract;

const TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

impl ValidationReport {
    fn from_issues(issues: Vec<String>) -> Self {
        Self {
            is_valid: issues.is_empty(),
            issues,
        }
    }
}

fn amount(value: &Option<Number>) -> Option<f64> {
    value.as_ref().and_then(Number::as_f64)
}

pub fn validate(invoice: &InvoiceExtract) -> ValidationReport {
    let mut issues = Vec::new();

    match amount(&invoice.total) {
        Some(total) if total > 0.0 => {}
        Some(_) => issues.push("total must be positive".to_string()),
        None => issues.push("total is missing".to_string()),
    }

    match invoice.invoice_date.as_deref() {
        None | Some("") => issues.push("invoice date is missing".to_string()),
        Some(date) if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() => {
            issues.push(format!("invoice date '{date}' is not YYYY-MM-DD"));
        }
        Some(_) => {}
    }

    if let Some(due) = invoice.due_date.as_deref().filter(|d| !d.is_empty()) {
        if NaiveDate::parse_from_str(due, "%Y-%m-%d").is_err() {
            issues.push(format!("due date '{due}' is not YYYY-MM-DD"));
        }
    }

    if let Some(currency) = invoice.currency.as_deref() {
        let iso = currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase());
        if !iso {
            issues.push(format!("currency '{currency}' is not an ISO 4217 code"));
        }
    }

    if let (Some(subtotal), Some(vat), Some(total)) = (
        amount(&invoice.subtotal),
        amount(&invoice.vat_total),
        amount(&invoice.total),
    ) {
        if (subtotal + vat - total).abs() > TOLERANCE {
            issues.push(format!(
                "subtotal {subtotal} + vat {vat} does not equal total {total}"
            ));
        }
    }

    for (index, line) in invoice.line_items.iter().enumerate() {
        if let (Some(qty), Some(price), Some(line_total)) = (
            amount(&line.quantity),
            amount(&line.unit_price),
            amount(&line.line_total),
        ) {
            if (qty * price - line_total).abs() > TOLERANCE {
                issues.push(format!(
                    "line {}: {qty} x {price} does not equal {line_total}",
                    index + 1
                ));
            }
        }
    }

    ValidationReport::from_issues(issues)
}
