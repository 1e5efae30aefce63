//! Invoice extraction domain.
//!
//! Pure, deterministic logic shared by the invoice workflow steps: the shape
//! the generator must return, how its raw output is cleaned and checked,
//! business validation of an extracted invoice, and CSV rendering
//! (no IO, no HTTP, no storage).

pub mod csv;
pub mod extract;
pub mod prompt;
pub mod validation;

pub use csv::{escape_field, render_csv};
pub use extract::{ExtractError, InvoiceExtract, LineItem, parse_generated, strip_code_fences};
pub use validation::{ValidationReport, validate};
