//! Export to a FHIR Clinical Practice Guideline bundle.
//!
//! The node graph is compiled into one PlanDefinition whose nested `action` tree mirrors the
//! pathway, plus the ActivityDefinitions its actions instantiate and the Libraries holding
//! the CQL its conditions evaluate.
//!
//! Compilation runs in three steps:
//! 1. [`clean_pathway`] duplicates shared subgraphs so every node has a single parent.
//! 2. A breadth-first walk converts each node once its parent has been converted.
//! 3. The converted actions are assembled into a tree and wrapped in a transaction bundle.

use crate::config::ExportConfig;
use crate::constants::{NAVIGATION_LIBRARY_SUFFIX, START_KEY};
use crate::cql::{construct_cql_library, library_identifier, parse_library_header, qualify};
use crate::criteria::{find_by_id, find_by_library_id, Criteria, CriteriaLibrary};
use crate::graph::{
    codeable_concept_from_action, find_all_child_action_nodes, find_all_transitions, find_nearest_action_ancestor,
    find_parent, find_sub_pathway,
};
use crate::model::{Action, NodeKind, NodeMap, Pathway, PathwayNode};
use crate::validation::{detect_cycle, validate_pathway};
use crate::{PathwayError, PathwayResult};
use fhir::{
    ActionCondition, ActionRelationship, ActionResource, ActivityDefinition, Bundle, Library,
    PlanDefinition, PlanDefinitionAction, RelatedAction,
};
use indexmap::{IndexMap, IndexSet};
use pathways_uuid::UuidService;
use std::collections::VecDeque;
use std::sync::Arc;

/// Rewrite `nodes` so that no node has more than one incoming transition.
///
/// For each node with several parents, the first incoming transition (in map order) keeps
/// the node; every other one is pointed at a fresh copy of the subgraph under it. Copies get
/// new keys, and are themselves cleaned until nothing is shared.
///
/// # Errors
///
/// * [`PathwayError::CycleDetected`] if the graph has a cycle, which would make the
///   duplication endless.
/// * The errors of [`find_sub_pathway`].
pub fn clean_pathway(nodes: &NodeMap) -> PathwayResult<NodeMap> {
    if let Some(key) = detect_cycle(nodes) {
        return Err(PathwayError::CycleDetected(key));
    }

    let mut cleaned = nodes.clone();
    loop {
        let Some((shared, extra)) = cleaned.keys().find_map(|key| {
            let incoming = find_all_transitions(&cleaned, key);
            (incoming.len() > 1).then(|| {
                let extra: Vec<(String, String)> = incoming[1..]
                    .iter()
                    .map(|r| (r.source.to_owned(), r.transition.id.clone()))
                    .collect();
                (key.clone(), extra)
            })
        }) else {
            break;
        };

        for (source, transition_id) in extra {
            let copy = find_sub_pathway(&cleaned, &shared)?;
            tracing::debug!(
                node = shared.as_str(),
                parent = source.as_str(),
                copy = copy.root.as_str(),
                "duplicated shared subgraph"
            );
            let root = copy.root;
            cleaned.extend(copy.nodes);

            let parent = cleaned
                .get_mut(&source)
                .ok_or_else(|| PathwayError::NodeNotFound(source.clone()))?;
            for t in &mut Arc::make_mut(parent).transitions {
                if t.id == transition_id {
                    t.transition = root.clone();
                }
            }
        }
    }

    Ok(cleaned)
}

/// A converted node waiting to be placed in the action tree.
struct Emitted {
    /// Key of the emitted branch this action nests under, `None` for top level.
    container: Option<String>,
    action: PlanDefinitionAction,
}

/// Everything collected while walking the graph.
#[derive(Default)]
struct Compilation<'c> {
    emitted: IndexMap<String, Emitted>,
    /// ActivityDefinitions keyed by `(system, code)`.
    activities: IndexMap<(String, String), ActivityDefinition>,
    /// Criteria libraries referenced by conditions, by library id.
    criteria_libraries: IndexMap<String, &'c Criteria>,
    referenced_defines: IndexMap<String, String>,
    builder_defines: IndexMap<String, String>,
}

/// Compiles a pathway into a CPG transaction [`Bundle`].
pub struct CpgExporter<'a> {
    config: &'a ExportConfig,
    pathway: &'a Pathway,
    criteria: &'a [Criteria],
    navigation_library: String,
}

impl<'a> CpgExporter<'a> {
    pub fn new(config: &'a ExportConfig, pathway: &'a Pathway, criteria: &'a [Criteria]) -> Self {
        Self {
            config,
            pathway,
            criteria,
            navigation_library: library_identifier(&pathway.name, NAVIGATION_LIBRARY_SUFFIX),
        }
    }

    /// Compile the pathway. Either the whole bundle is produced or an error is returned.
    ///
    /// # Errors
    ///
    /// * The errors of [`validate_pathway`], including cycles.
    /// * [`PathwayError::MalformedNode`] for an untyped node reachable from Start.
    pub fn export(&self) -> PathwayResult<Bundle> {
        validate_pathway(self.pathway)?;
        let nodes = clean_pathway(&self.pathway.nodes)?;

        let mut compilation = Compilation::default();
        let mut queue: VecDeque<String> = VecDeque::from([START_KEY.to_owned()]);
        let mut visited: IndexSet<String> = IndexSet::new();

        while let Some(key) = queue.pop_front() {
            let parent = find_parent(&nodes, &key).map(str::to_owned);
            if let Some(parent) = parent.as_deref() {
                if !visited.contains(parent) {
                    queue.retain(|k| k != parent);
                    queue.push_front(parent.to_owned());
                    queue.push_back(key);
                    continue;
                }
            }

            let node = nodes
                .get(&key)
                .ok_or_else(|| PathwayError::NodeNotFound(key.clone()))?;
            if let Some(parent) = parent.as_deref() {
                self.convert_node(&mut compilation, &nodes, node, parent)?;
            }
            visited.insert(key.clone());

            for t in &node.transitions {
                if !visited.contains(&t.transition) && !queue.contains(&t.transition) {
                    queue.push_back(t.transition.clone());
                }
            }
        }

        let bundle = self.assemble(compilation)?;
        tracing::info!(
            pathway = self.pathway.id.as_str(),
            entries = bundle.entry.len(),
            "exported CPG bundle"
        );
        Ok(bundle)
    }

    pub fn export_json(&self) -> PathwayResult<String> {
        Ok(fhir::render_json(&self.export()?)?)
    }

    pub fn export_yaml(&self) -> PathwayResult<String> {
        Ok(fhir::render_yaml(&self.export()?)?)
    }

    fn convert_node(
        &self,
        compilation: &mut Compilation<'a>,
        nodes: &NodeMap,
        node: &PathwayNode,
        parent: &str,
    ) -> PathwayResult<()> {
        let parent_is_branch = nodes.get(parent).is_some_and(|p| p.is_branch_node());

        match &node.kind {
            NodeKind::Start => {}
            NodeKind::Branch => {
                // Top-level branches exist only as conditions on their children.
                if parent_is_branch {
                    let mut action = PlanDefinitionAction::new(node.key.clone());
                    action.title = Some(node.label.clone());
                    action.condition = self.condition_into(compilation, nodes, parent, &node.key);
                    let container = container_of(compilation, nodes, parent);
                    compilation
                        .emitted
                        .insert(node.key.clone(), Emitted { container, action });
                }
            }
            NodeKind::Action(payload) => {
                let mut action = PlanDefinitionAction::new(node.key.clone());
                action.title = Some(node.label.clone());

                match payload.action.as_slice() {
                    [single] => {
                        action.description = non_empty(&single.description);
                        action.definition_canonical =
                            Some(self.activity_for(compilation, node, single));
                    }
                    several => {
                        for item in several {
                            let mut child =
                                PlanDefinitionAction::new(format!("{}-{}", node.key, item.id));
                            child.title = non_empty(&item.description);
                            child.definition_canonical =
                                Some(self.activity_for(compilation, node, item));
                            action.action.push(child);
                        }
                    }
                }

                if parent_is_branch {
                    action.condition = self.condition_into(compilation, nodes, parent, &node.key);
                }
                if let Some(ancestor) = find_nearest_action_ancestor(nodes, &node.key) {
                    action
                        .related_action
                        .push(RelatedAction::new(ancestor, ActionRelationship::AfterEnd));
                }
                for child in find_all_child_action_nodes(nodes, &node.key) {
                    action
                        .related_action
                        .push(RelatedAction::new(child, ActionRelationship::BeforeStart));
                }

                let container = container_of(compilation, nodes, parent);
                compilation
                    .emitted
                    .insert(node.key.clone(), Emitted { container, action });
            }
            NodeKind::Reference(reference) => {
                tracing::debug!(
                    node = node.key.as_str(),
                    reference = reference.reference_id.as_str(),
                    "reference nodes are not exported"
                );
            }
            NodeKind::Null => {
                return Err(PathwayError::MalformedNode {
                    key: node.key.clone(),
                    label: node.label.clone(),
                });
            }
        }

        Ok(())
    }

    /// The applicability condition of the transition `parent -> key`, if it has one.
    fn condition_into(
        &self,
        compilation: &mut Compilation<'a>,
        nodes: &NodeMap,
        parent: &str,
        key: &str,
    ) -> Vec<ActionCondition> {
        let Some(condition) = nodes
            .get(parent)
            .and_then(|p| p.transitions.iter().find(|t| t.transition == key))
            .and_then(|t| t.condition.as_ref())
        else {
            return Vec::new();
        };

        let criteria = condition
            .criteria_source
            .as_deref()
            .and_then(|source| {
                let found = find_by_id(self.criteria, source);
                if found.is_none() {
                    tracing::warn!(
                        node = key,
                        criteria = source,
                        "condition references unknown criteria, exported without a library"
                    );
                }
                found
            });

        let expression = match criteria {
            Some(criteria) => {
                let statement = criteria.statement_name().to_owned();
                match criteria.library() {
                    CriteriaLibrary::External { id, .. } => {
                        compilation.criteria_libraries.insert(id.to_owned(), criteria);
                        // The navigation library can re-export one define per name.
                        match compilation.referenced_defines.get(&statement) {
                            Some(owner) if owner != id => tracing::warn!(
                                statement = statement.as_str(),
                                kept = owner.as_str(),
                                skipped = id,
                                "define name clash in navigation library"
                            ),
                            Some(_) => {}
                            None => {
                                compilation
                                    .referenced_defines
                                    .insert(statement.clone(), id.to_owned());
                            }
                        }
                        qualify(id, &statement)
                    }
                    CriteriaLibrary::Builder => {
                        compilation
                            .builder_defines
                            .insert(statement.clone(), criteria.cql.clone());
                        qualify(&self.navigation_library, &statement)
                    }
                }
            }
            None => condition.cql.clone(),
        };

        vec![ActionCondition::applicability(
            expression,
            non_empty(&condition.description),
        )]
    }

    /// Canonical URL of the ActivityDefinition for `item`, creating it on first use.
    fn activity_for(
        &self,
        compilation: &mut Compilation<'a>,
        node: &PathwayNode,
        item: &Action,
    ) -> String {
        let coding = codeable_concept_from_action(item)
            .and_then(|c| c.first_coding())
            .filter(|c| !c.code.is_empty());
        let dedup_key = match coding {
            Some(c) => (c.system.clone(), c.code.clone()),
            // Uncoded resources are never shared.
            None => (String::new(), format!("{}/{}", node.key, item.id)),
        };

        if let Some(existing) = compilation.activities.get(&dedup_key) {
            return existing.url.clone().unwrap_or_default();
        }

        let id = UuidService::new().to_string();
        let url = self.config.canonical(fhir::activity_definition::RESOURCE_TYPE, &id);
        let mut activity = ActivityDefinition::new(id, item.resource.resource_type());
        activity.url = Some(url.clone());
        activity.title = coding
            .and_then(|c| c.display.clone())
            .or_else(|| item.resource.title().map(str::to_owned))
            .or_else(|| non_empty(&node.label));
        activity.description = non_empty(&item.description);
        match &item.resource {
            ActionResource::MedicationRequest(r) => {
                activity.product_codeable_concept = Some(r.medication_codeable_concept.clone());
            }
            ActionResource::ServiceRequest(_) | ActionResource::CarePlan(_) => {
                activity.code = codeable_concept_from_action(item).cloned();
            }
            ActionResource::Unsupported(_) => {}
        }

        compilation.activities.insert(dedup_key, activity);
        url
    }

    fn assemble(&self, mut compilation: Compilation<'a>) -> PathwayResult<Bundle> {
        let mut libraries: Vec<Library> = Vec::new();
        let mut included: IndexMap<String, String> = IndexMap::new();

        for (id, criteria) in &compilation.criteria_libraries {
            let version = criteria
                .elm
                .as_ref()
                .and_then(|e| e.library.identifier.version.clone())
                .unwrap_or_else(|| "1".to_owned());
            included.insert(id.clone(), version.clone());

            let mut library = self.library(id, &version).with_cql(&criteria.cql);
            if let Some(elm) = &criteria.elm {
                let elm_json = serde_json::to_string(elm).map_err(PathwayError::Serialization)?;
                library = library.with_elm(&elm_json);
            }
            libraries.push(library);
        }

        for text in &self.pathway.library {
            let Some((name, version)) = parse_library_header(text) else {
                tracing::warn!(
                    pathway = self.pathway.id.as_str(),
                    "skipping CQL text without a library declaration"
                );
                continue;
            };
            if libraries.iter().any(|l| l.id == name) {
                continue;
            }
            let version = version.unwrap_or_else(|| self.config.library_version().to_owned());
            let mut library = self.library(&name, &version).with_cql(text);
            // Camino-exported pathways carry criteria CQL inline; its ELM is in the collection.
            let carried_elm =
                find_by_library_id(self.criteria, &name).and_then(|c| c.elm.as_ref());
            if let Some(elm) = carried_elm {
                let elm_json = serde_json::to_string(elm).map_err(PathwayError::Serialization)?;
                library = library.with_elm(&elm_json);
            }
            libraries.push(library);
        }

        let navigation_cql = construct_cql_library(
            self.config,
            &self.navigation_library,
            &included,
            &compilation.referenced_defines,
            &compilation.builder_defines,
        );
        let navigation = self
            .library(&self.navigation_library, self.config.library_version())
            .with_cql(&navigation_cql);
        libraries.insert(0, navigation);

        let mut top: Vec<PlanDefinitionAction> = Vec::new();
        while let Some((key, Emitted { container, action })) = compilation.emitted.pop() {
            let parent = match container {
                Some(c) => compilation.emitted.get_mut(&c),
                None => None,
            };
            match parent {
                Some(parent) => parent.action.action.insert(0, action),
                None => {
                    tracing::debug!(node = key.as_str(), "top-level action");
                    top.insert(0, action);
                }
            }
        }

        let mut plan = PlanDefinition::clinical_protocol(self.pathway.id.clone());
        plan.url = Some(
            self.config
                .canonical(fhir::plan_definition::RESOURCE_TYPE, &self.pathway.id),
        );
        plan.version = Some(self.config.library_version().to_owned());
        plan.name = Some(library_identifier(&self.pathway.name, ""));
        plan.title = Some(self.pathway.name.clone());
        plan.description = non_empty(&self.pathway.description);
        plan.publisher = self.config.publisher().map(str::to_owned);
        plan.date = Some(chrono::Utc::now().date_naive().to_string());
        plan.library = libraries
            .iter()
            .filter_map(|l| l.url.clone())
            .collect();
        plan.action = top;

        let mut bundle = Bundle::transaction(UuidService::new().to_string());
        let base_url = self.config.base_url();
        for library in libraries {
            bundle.push_put(base_url, library);
        }
        for activity in compilation.activities.into_values() {
            bundle.push_put(base_url, activity);
        }
        bundle.push_put(base_url, plan);
        Ok(bundle)
    }

    fn library(&self, id: &str, version: &str) -> Library {
        let mut library = Library::logic_library(id);
        library.url = Some(self.config.canonical(fhir::library::RESOURCE_TYPE, id));
        library.name = Some(id.to_owned());
        library.version = Some(version.to_owned());
        library.publisher = self.config.publisher().map(str::to_owned);
        library
    }
}

/// The nearest emitted branch above `parent` (inclusive), where a new action nests.
fn container_of(compilation: &Compilation<'_>, nodes: &NodeMap, parent: &str) -> Option<String> {
    let mut seen: IndexSet<&str> = IndexSet::new();
    let mut current = Some(parent);
    while let Some(key) = current {
        if !seen.insert(key) {
            return None;
        }
        let is_branch = nodes.get(key).is_some_and(|n| n.is_branch_node());
        if is_branch && compilation.emitted.contains_key(key) {
            return Some(key.to_owned());
        }
        current = find_parent(nodes, key);
    }
    None
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{
        add_node, add_node_action, add_transition, create_new_pathway, make_node_action,
        make_node_branch, make_node_reference, set_node_label, set_transition_condition,
    };
    use crate::cql::tests::service_request_action;
    use crate::criteria::tests::{builder_criteria, library_criteria};
    use crate::elm::tests::sample_elm;
    use crate::graph::tests::graph;
    use fhir::library::CQL_CONTENT_TYPE;

    fn action_node(p: &Pathway, label: &str, code: &str) -> PathwayResult<(Pathway, String)> {
        let (p, key) = add_node(p)?;
        let p = make_node_action(&p, &key)?;
        let p = set_node_label(&p, &key, label)?;
        let p = add_node_action(&p, &key, service_request_action("", "http://snomed.info/sct", code))?;
        Ok((p, key))
    }

    fn branch_node(p: &Pathway, label: &str) -> PathwayResult<(Pathway, String)> {
        let (p, key) = add_node(p)?;
        let p = make_node_branch(&p, &key)?;
        let p = set_node_label(&p, &key, label)?;
        Ok((p, key))
    }

    fn bundle(p: &Pathway, criteria: &[Criteria]) -> Bundle {
        let config = ExportConfig::default();
        CpgExporter::new(&config, p, criteria).export().expect("export")
    }

    fn plan(bundle: &Bundle) -> &PlanDefinition {
        let plans: Vec<&PlanDefinition> = bundle.plan_definitions().collect();
        assert_eq!(plans.len(), 1);
        plans[0]
    }

    #[test]
    fn branch_then_service_request() {
        let p = create_new_pathway("N", Some("d"), Some("1"));
        let (p, branch) = branch_node(&p, "Branch").expect("branch");
        let (p, act) = action_node(&p, "Surgery", "392021009").expect("action");
        let p = add_transition(&p, START_KEY, &branch).expect("edge");
        let p = add_transition(&p, &branch, &act).expect("edge");
        let tid = p.nodes[&branch].transitions[0].id.clone();
        let p = set_transition_condition(
            &p,
            &branch,
            &tid,
            "Male",
            &sample_elm("LIBFoo", "isMale"),
            None,
            Some("c1"),
        )
        .expect("condition");
        let criteria = vec![library_criteria("c1", "LIBFoo", "isMale")];

        let bundle = bundle(&p, &criteria);

        let activities: Vec<&ActivityDefinition> = bundle.activity_definitions().collect();
        assert_eq!(activities.len(), 1);
        let coding = activities[0]
            .code
            .as_ref()
            .and_then(|c| c.first_coding())
            .expect("coding");
        assert_eq!(coding.code, "392021009");
        assert_eq!(activities[0].kind, "ServiceRequest");

        let plan = plan(&bundle);
        assert_eq!(plan.action.len(), 1);
        let top = &plan.action[0];
        assert_eq!(top.id, act);
        assert_eq!(top.condition.len(), 1);
        assert_eq!(top.condition[0].expression.expression, "LIBFoo.isMale");
        assert_eq!(top.condition[0].expression.language, "text/cql");
        assert_eq!(top.definition_canonical, activities[0].url);

        for entry in &bundle.entry {
            assert!(entry.full_url.starts_with("http://example.com/"));
            assert_eq!(entry.request.method, "PUT");
        }
        assert_eq!(bundle.bundle_type, "transaction");
        assert_eq!(
            plan.library.first().map(String::as_str),
            Some("http://example.com/Library/NNavigation")
        );
    }

    #[test]
    fn libraries_cover_criteria_and_navigation() {
        let p = create_new_pathway("Breast Cancer", None, Some("bc"));
        let (p, branch) = branch_node(&p, "Branch").expect("branch");
        let (p, a) = action_node(&p, "A", "1").expect("action");
        let (p, b) = action_node(&p, "B", "2").expect("action");
        let p = add_transition(&p, START_KEY, &branch).expect("edge");
        let p = add_transition(&p, &branch, &a).expect("edge");
        let p = add_transition(&p, &branch, &b).expect("edge");
        let ids: Vec<String> = p.nodes[&branch]
            .transitions
            .iter()
            .map(|t| t.id.clone())
            .collect();
        let male = sample_elm("LIBFoo", "isMale");
        let adult = sample_elm("B", "isAdult");
        let p = set_transition_condition(&p, &branch, &ids[0], "", &male, None, Some("lib"))
            .expect("condition");
        let p = set_transition_condition(&p, &branch, &ids[1], "", &adult, None, Some("builder"))
            .expect("condition");
        let criteria = vec![
            library_criteria("lib", "LIBFoo", "isMale"),
            builder_criteria("builder", "isAdult", "AgeInYears() >= 18"),
        ];

        let bundle = bundle(&p, &criteria);
        let libraries: Vec<&Library> = bundle.libraries().collect();
        let ids: Vec<&str> = libraries.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["BreastCancerNavigation", "LIBFoo"]);

        let nav = libraries[0]
            .content_text(CQL_CONTENT_TYPE)
            .expect("decode")
            .expect("cql");
        assert!(nav.contains("include \"LIBFoo\" version '1' called LIBFoo"));
        assert!(nav.contains("define \"isMale\": LIBFoo.\"isMale\""));
        assert!(nav.contains("define \"isAdult\": AgeInYears() >= 18"));
        assert!(libraries[1].content_text(fhir::library::ELM_CONTENT_TYPE).expect("decode").is_some());

        let plan = plan(&bundle);
        assert_eq!(plan.action[1].condition[0].expression.expression, "BreastCancerNavigation.isAdult");
    }

    #[test]
    fn carried_library_text_gets_criteria_elm() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, a) = action_node(&p, "A", "1").expect("action");
        let p = add_transition(&p, START_KEY, &a).expect("edge");
        let criteria = vec![library_criteria("c1", "LIBFoo", "isMale")];
        let mut p = p;
        p.library = vec![criteria[0].cql.clone(), "library Local version '2'\n".to_owned()];

        let bundle = bundle(&p, &criteria);
        let libraries: Vec<&Library> = bundle.libraries().collect();
        let ids: Vec<&str> = libraries.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["NNavigation", "LIBFoo", "Local"]);
        let elm = |l: &Library| l.content_text(fhir::library::ELM_CONTENT_TYPE).expect("decode");
        assert!(elm(libraries[1]).is_some());
        assert!(elm(libraries[2]).is_none());
        assert_eq!(libraries[2].version.as_deref(), Some("2"));
    }

    #[test]
    fn clashing_define_names_keep_first_library() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, branch) = branch_node(&p, "Branch").expect("branch");
        let (p, a) = action_node(&p, "A", "1").expect("action");
        let (p, b) = action_node(&p, "B", "2").expect("action");
        let p = add_transition(&p, START_KEY, &branch).expect("edge");
        let p = add_transition(&p, &branch, &a).expect("edge");
        let p = add_transition(&p, &branch, &b).expect("edge");
        let ids: Vec<String> = p.nodes[&branch]
            .transitions
            .iter()
            .map(|t| t.id.clone())
            .collect();
        let foo = sample_elm("LIBFoo", "isMale");
        let bar = sample_elm("LIBBar", "isMale");
        let p = set_transition_condition(&p, &branch, &ids[0], "", &foo, None, Some("foo"))
            .expect("condition");
        let p = set_transition_condition(&p, &branch, &ids[1], "", &bar, None, Some("bar"))
            .expect("condition");
        let criteria = vec![
            library_criteria("foo", "LIBFoo", "isMale"),
            library_criteria("bar", "LIBBar", "isMale"),
        ];

        let bundle = bundle(&p, &criteria);
        let libraries: Vec<&Library> = bundle.libraries().collect();
        let nav = libraries[0]
            .content_text(CQL_CONTENT_TYPE)
            .expect("decode")
            .expect("cql");
        assert_eq!(nav.matches("define \"isMale\"").count(), 1);
        assert!(nav.contains("define \"isMale\": LIBFoo.\"isMale\""));
        assert!(nav.contains("include \"LIBBar\" version '1' called LIBBar"));

        // Conditions reference their own library directly.
        let plan = plan(&bundle);
        let conditions: Vec<&str> = plan
            .action
            .iter()
            .map(|a| a.condition[0].expression.expression.as_str())
            .collect();
        assert_eq!(conditions, ["LIBFoo.isMale", "LIBBar.isMale"]);
    }

    #[test]
    fn nested_branches_group_children() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, outer) = branch_node(&p, "Outer").expect("branch");
        let (p, inner) = branch_node(&p, "Inner").expect("branch");
        let (p, first) = action_node(&p, "First", "1").expect("action");
        let (p, second) = action_node(&p, "Second", "2").expect("action");
        let p = add_transition(&p, START_KEY, &outer).expect("edge");
        let p = add_transition(&p, &outer, &inner).expect("edge");
        let p = add_transition(&p, &inner, &first).expect("edge");
        let p = add_transition(&p, &inner, &second).expect("edge");

        let bundle = bundle(&p, &[]);
        let plan = plan(&bundle);
        assert_eq!(plan.action.len(), 1);
        let group = &plan.action[0];
        assert_eq!(group.id, inner);
        let children: Vec<&str> = group.action.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(children, [first.as_str(), second.as_str()]);
    }

    #[test]
    fn sequential_actions_are_related() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, first) = action_node(&p, "First", "1").expect("action");
        let (p, branch) = branch_node(&p, "Branch").expect("branch");
        let (p, second) = action_node(&p, "Second", "2").expect("action");
        let p = add_transition(&p, START_KEY, &first).expect("edge");
        let p = add_transition(&p, &first, &branch).expect("edge");
        let p = add_transition(&p, &branch, &second).expect("edge");

        let bundle = bundle(&p, &[]);
        let plan = plan(&bundle);
        assert_eq!(plan.action.len(), 2);

        let first_action = plan.find_action(&first).expect("first");
        assert_eq!(
            first_action.related_action,
            [RelatedAction::new(second.clone(), ActionRelationship::BeforeStart)]
        );
        let second_action = plan.find_action(&second).expect("second");
        assert_eq!(
            second_action.related_action,
            [RelatedAction::new(first.clone(), ActionRelationship::AfterEnd)]
        );
    }

    #[test]
    fn identical_codes_share_an_activity_definition() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, a) = action_node(&p, "A", "392021009").expect("action");
        let (p, b) = action_node(&p, "B", "392021009").expect("action");
        let p = add_transition(&p, START_KEY, &a).expect("edge");
        let p = add_transition(&p, &a, &b).expect("edge");

        let bundle = bundle(&p, &[]);
        assert_eq!(bundle.activity_definitions().count(), 1);
        let plan = plan(&bundle);
        assert_eq!(plan.action[0].definition_canonical, plan.action[1].definition_canonical);
    }

    #[test]
    fn several_actions_become_child_actions() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, a) = action_node(&p, "A", "1").expect("action");
        let p = add_node_action(&p, &a, service_request_action("", "http://loinc.org", "2"))
            .expect("second action");
        let p = add_transition(&p, START_KEY, &a).expect("edge");

        let bundle = bundle(&p, &[]);
        let plan = plan(&bundle);
        assert_eq!(plan.action[0].action.len(), 2);
        assert!(plan.action[0].definition_canonical.is_none());
        assert_eq!(bundle.activity_definitions().count(), 2);
    }

    #[test]
    fn reference_node_emits_nothing() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, a) = action_node(&p, "A", "1").expect("action");
        let (p, reference) = add_node(&p).expect("node");
        let p = make_node_reference(&p, &reference, "other-pathway", "Other").expect("reference");
        let (p, b) = action_node(&p, "B", "2").expect("action");
        let p = add_transition(&p, START_KEY, &a).expect("edge");
        let p = add_transition(&p, &a, &reference).expect("edge");
        let p = add_transition(&p, &reference, &b).expect("edge");

        let bundle = bundle(&p, &[]);
        let plan = plan(&bundle);
        let ids: Vec<&str> = plan.action.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, [a.as_str(), b.as_str()]);
        assert!(plan.find_action(&reference).is_none());

        // Neither walk crosses the reference node.
        assert!(plan.action[0].related_action.is_empty());
        assert!(plan.action[1].related_action.is_empty());
        assert_eq!(bundle.activity_definitions().count(), 2);
    }

    #[test]
    fn untyped_node_aborts_export() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, key) = add_node(&p).expect("node");
        let p = set_node_label(&p, &key, "Unfinished").expect("label");
        let p = add_transition(&p, START_KEY, &key).expect("edge");

        let config = ExportConfig::default();
        let err = CpgExporter::new(&config, &p, &[]).export().expect_err("malformed");
        assert!(matches!(
            err,
            PathwayError::MalformedNode { ref label, .. } if label == "Unfinished"
        ));
    }

    #[test]
    fn dangling_criteria_source_keeps_raw_cql() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, branch) = branch_node(&p, "Branch").expect("branch");
        let (p, act) = action_node(&p, "A", "1").expect("action");
        let p = add_transition(&p, START_KEY, &branch).expect("edge");
        let p = add_transition(&p, &branch, &act).expect("edge");
        let tid = p.nodes[&branch].transitions[0].id.clone();
        let elm = sample_elm("L", "isMale");
        let p = set_transition_condition(&p, &branch, &tid, "", &elm, None, Some("gone"))
            .expect("condition");

        let bundle = bundle(&p, &[]);
        assert_eq!(plan(&bundle).action[0].condition[0].expression.expression, "isMale");
    }

    #[test]
    fn export_leaves_input_untouched() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, a) = action_node(&p, "A", "1").expect("action");
        let p = add_transition(&p, START_KEY, &a).expect("edge");
        let before = p.clone();
        bundle(&p, &[]);
        assert_eq!(p, before);
    }

    #[test]
    fn bundle_renders_as_json_and_yaml() {
        let p = create_new_pathway("N", None, Some("1"));
        let (p, a) = action_node(&p, "A", "1").expect("action");
        let p = add_transition(&p, START_KEY, &a).expect("edge");
        let config = ExportConfig::default();
        let exporter = CpgExporter::new(&config, &p, &[]);

        let json = exporter.export_json().expect("json");
        let parsed = Bundle::parse(&json).expect("bundle");
        assert_eq!(parsed.plan_definitions().count(), 1);

        let yaml = exporter.export_yaml().expect("yaml");
        assert!(yaml.contains("resourceType: Bundle"));
    }

    #[test]
    fn clean_duplicates_shared_subgraph() {
        let nodes = graph(&[
            ("Start", "start", &["a", "b"]),
            ("a", "action", &["c"]),
            ("b", "action", &["c"]),
            ("c", "branch", &["d"]),
            ("d", "action", &[]),
        ]);
        let cleaned = clean_pathway(&nodes).expect("clean");

        assert_eq!(cleaned.len(), 7);
        for key in cleaned.keys() {
            assert!(find_all_transitions(&cleaned, key).len() <= 1, "{key} has several parents");
        }
        assert_eq!(cleaned["a"].transitions[0].transition, "c");
        assert_eq!(cleaned["c"].transitions[0].transition, "d");

        let copy = cleaned["b"].transitions[0].transition.clone();
        assert_ne!(copy, "c");
        let copy_node = &cleaned[&copy];
        assert_eq!(copy_node.label, "c");
        assert!(copy_node.is_branch_node());
        let copy_child = &copy_node.transitions[0].transition;
        assert_ne!(copy_child, "d");
        assert_eq!(cleaned[copy_child].label, "d");
        assert!(cleaned[copy_child].transitions.is_empty());

        // The input map is unchanged.
        assert_eq!(nodes["b"].transitions[0].transition, "c");
    }

    #[test]
    fn clean_handles_nested_merges() {
        let nodes = graph(&[
            ("Start", "start", &["a", "b"]),
            ("a", "branch", &["m"]),
            ("b", "branch", &["m"]),
            ("m", "branch", &["x", "y"]),
            ("x", "action", &["z"]),
            ("y", "action", &["z"]),
            ("z", "action", &[]),
        ]);
        let cleaned = clean_pathway(&nodes).expect("clean");
        for key in cleaned.keys() {
            assert!(find_all_transitions(&cleaned, key).len() <= 1);
        }
        let labels = |label: &str| cleaned.values().filter(|n| n.label == label).count();
        assert_eq!(labels("m"), 2);
        assert_eq!(labels("z"), 4);
    }

    #[test]
    fn clean_rejects_cycles() {
        let nodes = graph(&[("Start", "start", &["a"]), ("a", "action", &["b"]), ("b", "action", &["a"])]);
        assert!(matches!(clean_pathway(&nodes), Err(PathwayError::CycleDetected(_))));
    }
}
