//! Export configuration.
//!
//! Configuration is resolved once at process startup and then passed into the exporters.
//! Exporters never read process-wide environment variables themselves, so an export behaves
//! the same inside a CLI run, a request handler or a test.

use crate::constants::{DEFAULT_BASE_URL, DEFAULT_FHIR_VERSION, DEFAULT_LIBRARY_VERSION};
use crate::{PathwayError, PathwayResult};

/// Export configuration resolved at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportConfig {
    base_url: String,
    fhir_version: String,
    library_version: String,
    publisher: Option<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            fhir_version: DEFAULT_FHIR_VERSION.into(),
            library_version: DEFAULT_LIBRARY_VERSION.into(),
            publisher: None,
        }
    }
}

impl ExportConfig {
    /// Create a new `ExportConfig`.
    ///
    /// A trailing `/` on `base_url` is removed.
    ///
    /// # Errors
    ///
    /// Returns [`PathwayError::InvalidInput`] if `base_url` is not an http(s) URL, or if
    /// `fhir_version`/`library_version` are empty.
    pub fn new(
        base_url: impl Into<String>,
        fhir_version: impl Into<String>,
        library_version: impl Into<String>,
        publisher: Option<String>,
    ) -> PathwayResult<Self> {
        let base_url = validate_base_url(&base_url.into())?;
        let fhir_version = fhir_version.into();
        let library_version = library_version.into();

        if fhir_version.trim().is_empty() {
            return Err(PathwayError::InvalidInput(
                "fhir_version cannot be empty".into(),
            ));
        }
        if library_version.trim().is_empty() {
            return Err(PathwayError::InvalidInput(
                "library_version cannot be empty".into(),
            ));
        }

        Ok(Self {
            base_url,
            fhir_version,
            library_version,
            publisher: publisher.filter(|p| !p.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn fhir_version(&self) -> &str {
        &self.fhir_version
    }

    pub fn library_version(&self) -> &str {
        &self.library_version
    }

    pub fn publisher(&self) -> Option<&str> {
        self.publisher.as_deref()
    }

    /// Canonical URL of a resource: `<base_url>/<resource_type>/<id>`.
    pub fn canonical(&self, resource_type: &str, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, resource_type, id)
    }
}

fn validate_base_url(raw: &str) -> PathwayResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"));

    match rest {
        Some(host) if !host.is_empty() && !host.contains(char::is_whitespace) => {
            Ok(trimmed.to_owned())
        }
        _ => Err(PathwayError::InvalidInput(format!(
            "base_url must be an http(s) URL, got '{raw}'"
        ))),
    }
}

/// Build an [`ExportConfig`] from optional raw environment values.
///
/// Missing or blank values fall back to the defaults.
///
/// # Errors
///
/// Returns [`PathwayError::InvalidInput`] if a supplied value is invalid.
pub fn export_config_from_env_values(
    base_url: Option<String>,
    fhir_version: Option<String>,
    publisher: Option<String>,
) -> PathwayResult<ExportConfig> {
    fn non_blank(value: Option<String>) -> Option<String> {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    ExportConfig::new(
        non_blank(base_url).unwrap_or_else(|| DEFAULT_BASE_URL.into()),
        non_blank(fhir_version).unwrap_or_else(|| DEFAULT_FHIR_VERSION.into()),
        DEFAULT_LIBRARY_VERSION,
        non_blank(publisher),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_example_base_url() {
        let cfg = ExportConfig::default();
        assert_eq!(cfg.base_url(), "http://example.com");
        assert_eq!(cfg.fhir_version(), "4.0.1");
        assert_eq!(
            cfg.canonical("Library", "LIBFoo"),
            "http://example.com/Library/LIBFoo"
        );
    }

    #[test]
    fn trailing_slash_is_removed() {
        let cfg = ExportConfig::new("https://fhir.example.org/", "4.0.1", "1.0", None)
            .expect("valid config");
        assert_eq!(cfg.base_url(), "https://fhir.example.org");
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = ExportConfig::new("ftp://x", "4.0.1", "1.0", None).expect_err("invalid");
        assert!(matches!(err, PathwayError::InvalidInput(_)));
        assert!(ExportConfig::new("http://", "4.0.1", "1.0", None).is_err());
    }

    #[test]
    fn env_values_fall_back_to_defaults() {
        let cfg = export_config_from_env_values(Some("  ".into()), None, Some("".into()))
            .expect("defaults");
        assert_eq!(cfg, ExportConfig::default());
    }

    #[test]
    fn env_values_override_defaults() {
        let cfg = export_config_from_env_values(
            Some("https://cpg.example.org".into()),
            Some("4.0.0".into()),
            Some("Example Health".into()),
        )
        .expect("valid");
        assert_eq!(cfg.base_url(), "https://cpg.example.org");
        assert_eq!(cfg.fhir_version(), "4.0.0");
        assert_eq!(cfg.publisher(), Some("Example Health"));
    }
}
