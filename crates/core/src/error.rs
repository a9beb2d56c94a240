use fhir::FhirError;

#[derive(Debug, thiserror::Error)]
pub enum PathwayError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("node '{0}' not found")]
    NodeNotFound(String),
    #[error("transition '{transition}' not found on node '{node}'")]
    TransitionNotFound { node: String, transition: String },
    #[error("action '{action}' not found on node '{node}'")]
    ActionNotFound { node: String, action: String },
    #[error("precondition '{0}' not found")]
    PreconditionNotFound(String),
    #[error("node '{key}' is a {actual} node, expected {expected}")]
    WrongNodeType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("transition from '{from}' points at missing node '{to}'")]
    DanglingTransition { from: String, to: String },
    #[error("the Start node cannot be {0}")]
    StartNodeProtected(&'static str),

    #[error("no non-reserved ELM statement found in {0}")]
    MissingElmStatement(String),
    #[error("node '{node}' has an unsupported action resource type '{resource_type}'")]
    UnsupportedResource { node: String, resource_type: String },
    #[error("action on node '{0}' has no coding")]
    MissingCoding(String),

    #[error("node '{label}' ({key}) has no recognised type")]
    MalformedNode { key: String, label: String },
    #[error("pathway contains a cycle through node '{0}'")]
    CycleDetected(String),
    #[error("pathway is invalid: {0}")]
    InvalidPathway(String),

    #[error("failed to import pathway: {0}")]
    Import(String),
    #[error("failed to read pathway file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to serialize pathway: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to allocate identifier: {0}")]
    IdAllocation(#[from] pathways_uuid::UuidError),

    #[error("FHIR error: {0}")]
    Fhir(#[from] FhirError),
}

pub type PathwayResult<T> = std::result::Result<T, PathwayError>;
