//! # CSV record encoding
//!
//! The export wire format is deliberately preserved from the original
//! service: a field is double-quoted iff it contains a comma or a space,
//! fields are separated by `", "`, and records end with CRLF. Embedded
//! quotes are not escaped.

/// Encode one record, terminator included.
pub fn encode_record(fields: &[String]) -> String {
    let mut out = String::new();
    for (index, field) in fields.iter().enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        if field.contains(',') || field.contains(' ') {
            out.push('"');
            out.push_str(field);
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
    out
}
