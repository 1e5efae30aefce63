//! Prompts sent to the text generator for invoice extraction.

/// System-level instructions.
pub const INSTRUCTIONS: &str = "\
You extract structured invoice data from plain text and answer with JSON only.
Rules:
1. Output a single JSON object. No markdown, no code fences, no commentary.
2. Use null for anything the text does not state. Never guess values.
3. Dates use ISO 8601 (YYYY-MM-DD).
4. Currency uses ISO 4217 codes such as EUR, USD or GBP.
5. Numbers are plain decimals with '.' as the separator.";

const SCHEMA: &str = "\
Return an object with exactly these keys:
  invoiceNumber (string|null), invoiceDate (YYYY-MM-DD|null), dueDate (YYYY-MM-DD|null),
  sellerName (string|null), sellerVatId (string|null), buyerName (string|null),
  buyerVatId (string|null), currency (ISO 4217|null), subtotal (number|null),
  vatTotal (number|null), total (number|null), lineItems (array, possibly empty).
Each lineItems entry has:
  description (string|null), quantity (number|null), unitPrice (number|null),
  lineTotal (number|null), vatRate (number|null).";

/// User prompt embedding the document text.
pub fn build_prompt(document_text: &str) -> String {
    format!("{SCHEMA}\n\nDocument text:\n{document_text}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_the_text_after_the_schema() {
        let prompt = build_prompt("Invoice #9");
        assert!(prompt.starts_with("Return an object"));
        assert!(prompt.ends_with("Document text:\nInvoice #9"));
    }
}
