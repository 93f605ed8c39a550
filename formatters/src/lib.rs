//! Output formatters for the unified table

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod csv_format;
pub mod json_format;

use std::sync::Arc;

use mantis_core::{Formatter, FormatterFactory, MantisResult, Registry};

pub use csv_format::CsvFormatter;
pub use json_format::JsonFormatter;

/// Enumeration of built-in formatters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatterKind {
    /// Comma-separated values
    Csv,
    /// JSON array
    Json,
}

impl FormatterKind {
    /// Returns the name used in `formatter_modes`
    pub fn id(&self) -> &'static str {
        match self {
            FormatterKind::Csv => "CSV",
            FormatterKind::Json => "JSON",
        }
    }

    /// Returns the factory for this kind
    pub fn factory(&self) -> FormatterFactory {
        match self {
            FormatterKind::Csv => Arc::new(|| Box::new(CsvFormatter) as Box<dyn Formatter>),
            FormatterKind::Json => Arc::new(|| Box::new(JsonFormatter) as Box<dyn Formatter>),
        }
    }

    /// Returns all built-in kinds
    pub fn all() -> &'static [FormatterKind] {
        &[FormatterKind::Csv, FormatterKind::Json]
    }
}

impl std::fmt::Display for FormatterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Register every built-in formatter
pub fn register_all(registry: &mut Registry<FormatterFactory>) -> MantisResult<()> {
    for kind in FormatterKind::all() {
        registry.register(kind.id(), kind.factory())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mantis_core::Registries;

    #[test]
    fn test_register_all() {
        let mut registries = Registries::new();
        register_all(&mut registries.formatters).unwrap();
        assert_eq!(registries.formatters.names(), vec!["CSV", "JSON"]);

        let json = registries.formatter("JSON").unwrap();
        assert_eq!(json.extension(), "json");
        assert!(registries.formatter("PICKLE").is_none());
    }
}
