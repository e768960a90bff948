use zoe::prelude::{CheckNucleotides, IsValidDNA};

pub mod tools;

pub use tools::ToolArgs;

/// Ensures the user has entered a valid non-empty adapter literal
pub(crate) fn validate_acgtn(value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        Err("Adapters cannot be empty!".to_string())
    } else if value.as_bytes().is_valid_dna(IsValidDNA::AcgtnNoGaps) {
        Ok(value.to_ascii_uppercase())
    } else {
        Err("Adapter literals must only consist of canonical (ACGTN) bases".to_string())
    }
}

/// Validates the expected error limit for merged reads to be a positive number
pub(crate) fn validate_max_ee(value: &str) -> Result<f64, String> {
    let parsed = value
        .parse::<f64>()
        .map_err(|_| format!("`{value}` is not a valid number."))?;
    if parsed.is_finite() && parsed > 0.0 {
        Ok(parsed)
    } else {
        Err(format!("merge-max-ee must be a positive number, but `{value}` was provided."))
    }
}
