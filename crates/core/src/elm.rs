//! ELM (Expression Logical Model) documents and library merging.
//!
//! ELM is produced by an external CQL compiler and is treated as an opaque tree, except for
//! the collections merging needs to understand:
//!
//! | collection    | natural key |
//! |---------------|-------------|
//! | `usings`      | `uri`       |
//! | `includes`    | `path`      |
//! | `valueSets`   | `id`        |
//! | `codes`       | `name`      |
//! | `codeSystems` | `name`      |
//! | `statements`  | `name`      |
//!
//! Everything else is carried through the flattened `other` maps untouched.

use crate::constants::RESERVED_STATEMENT_NAMES;
use crate::{PathwayError, PathwayResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A compiled library document as emitted by the CQL-to-ELM translator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Elm {
    pub library: ElmLibrary,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElmLibrary {
    #[serde(default)]
    pub identifier: ElmIdentifier,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usings: Option<ElmDefs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub includes: Option<ElmDefs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_sets: Option<ElmDefs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codes: Option<ElmDefs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_systems: Option<ElmDefs>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statements: Option<ElmDefs>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElmIdentifier {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A `{ "def": [...] }` collection of opaque definitions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElmDefs {
    #[serde(default)]
    pub def: Vec<Value>,
}

impl Elm {
    /// An empty library with the given identifier, used as a merge accumulator.
    pub fn empty(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            library: ElmLibrary {
                identifier: ElmIdentifier {
                    id: id.into(),
                    version: Some(version.into()),
                },
                ..ElmLibrary::default()
            },
        }
    }

    /// The library identifier `id`, if one is set.
    pub fn library_id(&self) -> Option<&str> {
        let id = self.library.identifier.id.as_str();
        (!id.is_empty()).then_some(id)
    }

    /// All statement definitions, in document order.
    pub fn statements(&self) -> &[Value] {
        self.library
            .statements
            .as_ref()
            .map(|s| s.def.as_slice())
            .unwrap_or_default()
    }

    /// The first statement whose name is not one of the compiler's reserved names.
    ///
    /// When several non-reserved statements exist the first wins.
    pub fn non_reserved_statement(&self) -> Option<&Value> {
        let mut candidates = self
            .statements()
            .iter()
            .filter(|def| statement_name_of(def).is_some_and(|n| !is_reserved(n)));
        let first = candidates.next();
        if first.is_some() && candidates.next().is_some() {
            tracing::debug!(
                library = self.library.identifier.id.as_str(),
                "multiple non-reserved ELM statements, using the first"
            );
        }
        first
    }

    /// Name of [`Elm::non_reserved_statement`].
    ///
    /// # Errors
    ///
    /// Returns [`PathwayError::MissingElmStatement`] naming `context` if every statement is
    /// reserved or there are none.
    pub fn statement_name(&self, context: &str) -> PathwayResult<String> {
        self.non_reserved_statement()
            .and_then(statement_name_of)
            .map(str::to_owned)
            .ok_or_else(|| PathwayError::MissingElmStatement(context.to_owned()))
    }

    /// Insert `statement`, replacing any existing statement with the same name.
    pub fn upsert_statement(&mut self, statement: Value) {
        let defs = &mut self
            .library
            .statements
            .get_or_insert_with(ElmDefs::default)
            .def;
        let name = statement_name_of(&statement).map(str::to_owned);
        match name.and_then(|n| {
            defs.iter()
                .position(|d| statement_name_of(d) == Some(n.as_str()))
        }) {
            Some(idx) => defs[idx] = statement,
            None => defs.push(statement),
        }
    }
}

fn is_reserved(name: &str) -> bool {
    RESERVED_STATEMENT_NAMES.contains(&name)
}

/// The `name` field of a statement definition.
pub fn statement_name_of(def: &Value) -> Option<&str> {
    def.get("name").and_then(Value::as_str)
}

/// A copy of `statement` renamed to `name`.
pub fn renamed_statement(statement: &Value, name: &str) -> Value {
    let mut renamed = statement.clone();
    if let Value::Object(map) = &mut renamed {
        map.insert("name".into(), Value::String(name.to_owned()));
    }
    renamed
}

/// Merge the shared definitions of `source` into `target`.
///
/// For `usings`, `includes`, `valueSets`, `codes` and `codeSystems`, entries of `source` are
/// appended only when no entry of `target` has the same natural key. Merging the same source
/// twice leaves `target` unchanged the second time. Statements are not merged here; callers
/// pick and rename the statement they need and add it with [`Elm::upsert_statement`].
pub fn merge_elm(target: &mut Elm, source: &Elm) {
    let target = &mut target.library;
    let source = &source.library;

    merge_defs(&mut target.usings, source.usings.as_ref(), "uri");
    merge_defs(&mut target.includes, source.includes.as_ref(), "path");
    merge_defs(&mut target.value_sets, source.value_sets.as_ref(), "id");
    merge_defs(&mut target.codes, source.codes.as_ref(), "name");
    merge_defs(&mut target.code_systems, source.code_systems.as_ref(), "name");
}

fn merge_defs(target: &mut Option<ElmDefs>, source: Option<&ElmDefs>, key: &str) {
    let Some(source) = source else {
        return;
    };
    let target = target.get_or_insert_with(ElmDefs::default);

    for def in &source.def {
        let exists = match def.get(key) {
            Some(natural_key) => target.def.iter().any(|t| t.get(key) == Some(natural_key)),
            // Entries without a natural key are compared whole.
            None => target.def.contains(def),
        };
        if !exists {
            target.def.push(def.clone());
        }
    }
}
