use std::collections::BTreeMap;

use serde::Serialize;

use crate::classset::{ClassId, ClassSet, FieldId, MethodId};
use crate::ir::{LabelId, NodeId};

/// Resolved bindings from patch names to concrete entities.
///
/// Scopes nest: lookups of classes, methods and fields fall back to the
/// parent, so a speculative child can be thrown away or merged into a
/// longer-lived scope. Instruction and label maps are per scope only.
#[derive(Clone, Debug, Default)]
pub struct PatchScope<'p> {
    parent: Option<&'p PatchScope<'p>>,
    classes: BTreeMap<String, ClassId>,
    methods: BTreeMap<MethodId, String>,
    fields: BTreeMap<FieldId, String>,
    instructions: BTreeMap<NodeId, BTreeMap<usize, usize>>,
    labels: BTreeMap<NodeId, BTreeMap<String, LabelId>>,
}

impl<'p> PatchScope<'p> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(parent: &'p PatchScope<'p>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Detached copy of the class, method and field bindings visible from
    /// this scope, parents included.
    pub fn duplicate<'q>(&self) -> PatchScope<'q> {
        let mut copy = match self.parent {
            Some(parent) => parent.duplicate(),
            None => PatchScope::default(),
        };
        copy.classes.extend(self.classes.clone());
        copy.methods.extend(self.methods.clone());
        copy.fields.extend(self.fields.clone());
        copy
    }

    /// This scope's own bindings and maps, without the parent link.
    pub fn detach<'q>(self) -> PatchScope<'q> {
        PatchScope {
            parent: None,
            classes: self.classes,
            methods: self.methods,
            fields: self.fields,
            instructions: self.instructions,
            labels: self.labels,
        }
    }

    /// Bind `name` to `class`. Returns whether `name` was already bound here.
    pub fn put_class(&mut self, name: &str, class: ClassId) -> bool {
        self.classes.insert(name.to_string(), class).is_some()
    }

    pub fn get_class(&self, name: &str) -> Option<ClassId> {
        self.classes
            .get(name)
            .copied()
            .or_else(|| self.parent.and_then(|parent| parent.get_class(name)))
    }

    /// Patch name bound to `class` in this scope.
    pub fn class_binding(&self, class: ClassId) -> Option<&str> {
        self.classes
            .iter()
            .find(|(_, bound)| **bound == class)
            .map(|(name, _)| name.as_str())
    }

    /// Bind a concrete method to a patch `name` and raw `desc`. Returns
    /// whether the method was already bound here.
    pub fn put_method(&mut self, method: MethodId, name: &str, desc: &str) -> bool {
        self.methods.insert(method, format!("{name}{desc}")).is_some()
    }

    /// Method of `owner` bound to the patch `name` and raw `desc`.
    pub fn get_method(&self, class_set: &ClassSet, owner: ClassId, name: &str, desc: &str) -> Option<MethodId> {
        let joined = format!("{name}{desc}");
        self.methods
            .iter()
            .find(|(method, key)| {
                **key == joined && class_set.try_method(**method).is_some_and(|wrapper| wrapper.has(owner))
            })
            .map(|(method, _)| *method)
            .or_else(|| {
                self.parent
                    .and_then(|parent| parent.get_method(class_set, owner, name, desc))
            })
    }

    /// Patch `name+desc` bound to `method`.
    pub fn method_binding(&self, method: MethodId) -> Option<&str> {
        match self.methods.get(&method) {
            Some(key) => Some(key),
            None => self.parent.and_then(|parent| parent.method_binding(method)),
        }
    }

    pub fn put_field(&mut self, field: FieldId, name: &str, desc: &str) -> bool {
        self.fields.insert(field, format!("{name}::{desc}")).is_some()
    }

    pub fn get_field(&self, class_set: &ClassSet, owner: ClassId, name: &str, desc: &str) -> Option<FieldId> {
        let joined = format!("{name}::{desc}");
        self.fields
            .iter()
            .find(|(field, key)| {
                **key == joined && class_set.try_field(**field).is_some_and(|wrapper| wrapper.has(owner))
            })
            .map(|(field, _)| *field)
            .or_else(|| {
                self.parent
                    .and_then(|parent| parent.get_field(class_set, owner, name, desc))
            })
    }

    pub fn field_binding(&self, field: FieldId) -> Option<&str> {
        match self.fields.get(&field) {
            Some(key) => Some(key),
            None => self.parent.and_then(|parent| parent.field_binding(field)),
        }
    }

    /// Patch instruction id to concrete index map of a matched method.
    pub fn instruction_map(&self, method: NodeId) -> Option<&BTreeMap<usize, usize>> {
        self.instructions.get(&method)
    }

    pub fn put_instruction_map(&mut self, method: NodeId, map: BTreeMap<usize, usize>) {
        self.instructions.insert(method, map);
    }

    pub fn clear_instructions(&mut self, method: NodeId) {
        self.instructions.remove(&method);
    }

    pub fn label(&self, method: NodeId, name: &str) -> Option<LabelId> {
        self.labels.get(&method)?.get(name).copied()
    }

    pub fn put_label(&mut self, method: NodeId, name: &str, label: LabelId) {
        self.labels
            .entry(method)
            .or_default()
            .insert(name.to_string(), label);
    }

    pub fn clear_labels(&mut self, method: NodeId) {
        self.labels.remove(&method);
    }

    pub(crate) fn labels_of(&self, method: NodeId) -> BTreeMap<String, LabelId> {
        self.labels.get(&method).cloned().unwrap_or_default()
    }

    pub(crate) fn restore_labels(&mut self, method: NodeId, labels: BTreeMap<String, LabelId>) {
        self.labels.insert(method, labels);
    }

    /// Take over every binding of `other`, replacing existing ones.
    pub fn merge(&mut self, other: PatchScope<'_>) {
        self.classes.extend(other.classes);
        self.methods.extend(other.methods);
        self.fields.extend(other.fields);
        self.instructions.extend(other.instructions);
        self.labels.extend(other.labels);
    }

    /// Bindings in concrete terms, for reporting.
    pub fn mappings(&self, class_set: &ClassSet) -> ScopeMappings {
        let mut mappings = ScopeMappings::default();
        self.collect_mappings(class_set, &mut mappings);
        mappings
    }

    fn collect_mappings(&self, class_set: &ClassSet, mappings: &mut ScopeMappings) {
        if let Some(parent) = self.parent {
            parent.collect_mappings(class_set, mappings);
        }
        for (name, class) in &self.classes {
            mappings
                .classes
                .insert(name.clone(), class_set.name(*class).to_string());
        }
        for (method, key) in &self.methods {
            let wrapper = class_set.method(*method);
            let owner = owner_name(class_set, wrapper.owners());
            mappings
                .methods
                .insert(format!("{owner}.{}{}", wrapper.name, wrapper.desc), key.clone());
        }
        for (field, key) in &self.fields {
            let wrapper = class_set.field(*field);
            let owner = owner_name(class_set, wrapper.owners());
            mappings
                .fields
                .insert(format!("{owner}.{}::{}", wrapper.name, wrapper.desc), key.clone());
        }
    }
}

/// Lowest-sorting owner name, so shared wrappers report stably.
fn owner_name(class_set: &ClassSet, owners: impl Iterator<Item = ClassId>) -> String {
    owners
        .map(|owner| class_set.name(owner))
        .min()
        .unwrap_or("<none>")
        .to_string()
}

/// Serializable view of a scope's class, method and field bindings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScopeMappings {
    pub classes: BTreeMap<String, String>,
    pub methods: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ClassNode, FieldNode, MethodNode};
    use crate::opcodes::ACC_PUBLIC;

    fn class_set() -> ClassSet {
        let mut set = ClassSet::new();
        set.add(
            ClassNode::new(ACC_PUBLIC, "a", Some("java/lang/Object"))
                .with_method(MethodNode::new(ACC_PUBLIC, "b", "()V"))
                .with_field(FieldNode::new(ACC_PUBLIC, "c", "I")),
            false,
        );
        set
    }

    #[test]
    fn child_lookups_fall_back_to_parent() {
        let set = class_set();
        let class = set.lookup("a").expect("class");
        let method = set.find_method(class, "b", "()V").expect("method");

        let mut root = PatchScope::new();
        root.put_class("Foo", class);
        root.put_method(method, "run", "()V");

        let child = PatchScope::child(&root);
        assert_eq!(child.get_class("Foo"), Some(class));
        assert_eq!(child.get_method(&set, class, "run", "()V"), Some(method));
        assert_eq!(child.method_binding(method), Some("run()V"));
        assert_eq!(child.get_method(&set, class, "run", "(I)V"), None);
    }

    #[test]
    fn put_reports_duplicate_bindings() {
        let set = class_set();
        let class = set.lookup("a").expect("class");
        let field = set.find_field(class, "c", "I").expect("field");

        let mut scope = PatchScope::new();
        assert!(!scope.put_class("Foo", class));
        assert!(scope.put_class("Foo", class));
        assert!(!scope.put_field(field, "count", "I"));
        assert!(scope.put_field(field, "other", "I"));
        assert_eq!(scope.get_field(&set, class, "other", "I"), Some(field));
    }

    #[test]
    fn merge_and_duplicate_keep_bindings() {
        let set = class_set();
        let class = set.lookup("a").expect("class");

        let root = PatchScope::new();
        let mut trial = PatchScope::child(&root);
        trial.put_class("Foo", class);
        trial.put_label(NodeId(0), "start", LabelId(2));

        let mut merged = root.duplicate();
        merged.merge(trial);
        assert_eq!(merged.get_class("Foo"), Some(class));
        assert_eq!(merged.label(NodeId(0), "start"), Some(LabelId(2)));

        let copy = merged.duplicate();
        assert_eq!(copy.get_class("Foo"), Some(class));
        assert_eq!(copy.label(NodeId(0), "start"), None);
    }

    #[test]
    fn mappings_report_concrete_names() {
        let set = class_set();
        let class = set.lookup("a").expect("class");
        let method = set.find_method(class, "b", "()V").expect("method");

        let mut scope = PatchScope::new();
        scope.put_class("Foo", class);
        scope.put_method(method, "run", "()V");
        let mappings = scope.mappings(&set);

        assert_eq!(mappings.classes.get("Foo").map(String::as_str), Some("a"));
        assert_eq!(
            mappings.methods.get("a.b()V").map(String::as_str),
            Some("run()V")
        );
        let json = serde_json::to_value(&mappings).expect("json");
        assert_eq!(json["classes"]["Foo"], "a");
    }
}
