//! Constants used throughout the pathway core crate.

/// Key of the single entry node every pathway carries.
pub const START_KEY: &str = "Start";

/// Statement names emitted by the CQL compiler that never hold pathway logic.
///
/// The first ELM statement whose name is not in this list is taken to be the logic a
/// condition or action refers to.
pub const RESERVED_STATEMENT_NAMES: [&str; 6] = [
    "Patient",
    "MeetsInclusionCriteria",
    "InPopulation",
    "Recommendation",
    "Rationale",
    "Errors",
];

/// Default base URL for `fullUrl` and canonical references in exported bundles.
pub const DEFAULT_BASE_URL: &str = "http://example.com";

/// FHIR version written into generated `using FHIR` declarations.
pub const DEFAULT_FHIR_VERSION: &str = "4.0.1";

/// Version given to libraries synthesised during export.
pub const DEFAULT_LIBRARY_VERSION: &str = "1.0";

/// Prefix used when a label cannot be turned into a CQL identifier on its own.
pub const IDENTIFIER_FALLBACK: &str = "Pathway";

/// Suffix of the library holding criteria authored in the visual criteria builder.
pub const BUILDER_LIBRARY_SUFFIX: &str = "Criteria";

/// Suffix of the navigational library the CPG export builds for a pathway.
pub const NAVIGATION_LIBRARY_SUFFIX: &str = "Navigation";

/// Suffix of the library collecting precondition logic in an exported pathway.
pub const PRECONDITIONS_LIBRARY_SUFFIX: &str = "Preconditions";

/// Code systems the editor offers, as `(CQL name, system URL)`.
pub const KNOWN_CODE_SYSTEMS: [(&str, &str); 6] = [
    ("SNOMEDCT", "http://snomed.info/sct"),
    ("RXNORM", "http://www.nlm.nih.gov/research/umls/rxnorm"),
    ("LOINC", "http://loinc.org"),
    ("ICD10CM", "http://hl7.org/fhir/sid/icd-10-cm"),
    ("CPT", "http://www.ama-assn.org/go/cpt"),
    ("HCPCS", "https://www.cms.gov/Medicare/Coding/HCPCSReleaseCodeSets"),
];
