//! CSV rendering of an extracted invoice.
//!
//! Layout: a header row and one value row for the invoice, a blank line, then
//! a header row and one row per line item.

use serde_json::Number;

use crate::extract::InvoiceExtract;

const INVOICE_HEADER: &str = "invoiceNumber,invoiceDate,dueDate,sellerName,sellerVatId,buyerName,buyerVatId,currency,subtotal,vatTotal,total";
const LINE_HEADER: &str = "description,quantity,unitPrice,lineTotal,vatRate";

/// Quote a field when it contains a quote, comma or line break.
pub fn escape_field(value: &str) -> String {
    if value.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(escape_field).unwrap_or_default()
}

fn number(value: &Option<Number>) -> String {
    value.as_ref().map(Number::to_string).unwrap_or_default()
}

pub fn render_csv(invoice: &InvoiceExtract) -> String {
    let mut out = String::new();

    out.push_str(INVOICE_HEADER);
    out.push('\n');
    let row = [
        text(&invoice.invoice_number),
        text(&invoice.invoice_date),
        text(&invoice.due_date),
        text(&invoice.seller_name),
        text(&invoice.seller_vat_id),
        text(&invoice.buyer_name),
        text(&invoice.buyer_vat_id),
        text(&invoice.currency),
        number(&invoice.subtotal),
        number(&invoice.vat_total),
        number(&invoice.total),
    ];
    out.push_str(&row.join(","));
    out.push('\n');

    out.push('\n');

    out.push_str(LINE_HEADER);
    out.push('\n');
    for item in &invoice.line_items {
        let row = [
            text(&item.description),
            number(&item.quantity),
            number(&item.unit_price),
            number(&item.line_total),
            number(&item.vat_rate),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::parse_generated;
    use proptest::prelude::*;

    #[test]
    fn plain_fields_are_left_alone() {
        assert_eq!(escape_field("ACME Ltd"), "ACME Ltd");
    }

    #[test]
    fn special_characters_are_quoted() {
        assert_eq!(escape_field("ACME, Inc"), "\"ACME, Inc\"");
        assert_eq!(escape_field("the \"best\""), "\"the \"\"best\"\"\"");
        assert_eq!(escape_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn renders_invoice_then_line_items() {
        let invoice = parse_generated(
            r#"{
                "invoiceNumber": "INV-1",
                "sellerName": "Widgets, Ltd",
                "currency": "EUR",
                "total": 42.5,
                "lineItems": [
                    { "description": "Bolt", "quantity": 10, "unitPrice": 0.5, "lineTotal": 5 },
                    { "description": "Nut \"M8\"", "quantity": 5 }
                ]
            }"#,
        )
        .unwrap();

        let csv = render_csv(&invoice);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], INVOICE_HEADER);
        assert_eq!(lines[1], "INV-1,,,\"Widgets, Ltd\",,,,EUR,,,42.5");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], LINE_HEADER);
        assert_eq!(lines[4], "Bolt,10,0.5,5,");
        assert_eq!(lines[5], "\"Nut \"\"M8\"\"\",5,,,");
        assert_eq!(lines.len(), 6);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn escaped_fields_unquote_to_the_original(value in ".*") {
            let escaped = escape_field(&value);
            let unquoted = match escaped.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
                Some(inner) if escaped.len() >= 2 && value.contains(['"', ',', '\n', '\r']) => {
                    inner.replace("\"\"", "\"")
                }
                _ => escaped.clone(),
            };
            prop_assert_eq!(unquoted, value);
        }
    }
}
