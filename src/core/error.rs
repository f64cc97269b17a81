use thiserror::Error;

/// Failure classes surfaced by the access layer.
///
/// These are raised wrapped in an `eyre::Report`; use
/// `report.downcast_ref::<SeqError>()` to tell them apart. Errors coming from
/// the array container or the filesystem are not converted and pass through
/// as they were reported.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeqError {
    /// Malformed selection, unknown variable, shape mismatch or an invalid
    /// option combination. Raised when a variable is resolved, before any
    /// decoding happens.
    #[error("{0}")]
    Validation(String),

    /// Stored data contradicts itself (genotype outside the allele range,
    /// cardinality sum mismatch, allele remap failure).
    #[error("data integrity: {0}")]
    Integrity(String),

    /// A block transform returned something the chosen sink cannot take,
    /// or a writer call arrived out of order. `block` is the block or
    /// variant ordinal (0-based).
    #[error("block {block}: {message}")]
    Contract { block: usize, message: String },
}

impl SeqError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn contract(block: usize, msg: impl Into<String>) -> Self {
        Self::Contract {
            block,
            message: msg.into(),
        }
    }
}

/// Classify a report, if it carries a [`SeqError`].
pub fn error_kind(report: &color_eyre::Report) -> Option<&SeqError> {
    report.downcast_ref::<SeqError>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::{Report, WrapErr};

    #[test]
    fn test_downcast_through_context() {
        let result: color_eyre::Result<()> =
            Err(Report::new(SeqError::validation("bad mask"))).wrap_err("while reading");
        let err = result.unwrap_err();
        assert_eq!(
            error_kind(&err),
            Some(&SeqError::Validation("bad mask".to_string()))
        );
    }

    #[test]
    fn test_contract_message_names_block() {
        let err = SeqError::contract(3, "expected text lines");
        assert_eq!(err.to_string(), "block 3: expected text lines");
    }
}
