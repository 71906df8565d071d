use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building a simulation or writing its output.
///
/// Per-particle numerical failures are deliberately NOT represented here;
/// they terminate the affected particle with a [`crate::particle::StopId`]
/// and never abort the run.
#[derive(Debug, Error)]
pub enum Error {
    /// A field table file could not be parsed into a valid grid.
    #[error("field table '{file}': {reason}")]
    FieldTable { file: String, reason: String },

    /// Geometry definition problem (duplicate solid ids, bad materials).
    #[error("geometry definition: {0}")]
    Geometry(String),

    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Propagated I/O errors from the output sinks.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let e = Error::FieldTable {
            file: "bfield.tab".into(),
            reason: "column R is not monotone".into(),
        };
        let msg = format!("{}", e);
        assert!(msg.contains("bfield.tab"));
        assert!(msg.contains("monotone"));
    }

    #[test]
    fn test_geometry_error_display() {
        let e = Error::Geometry("duplicate solid id 3".into());
        assert!(format!("{}", e).contains("duplicate solid id 3"));
    }
}
