//! Resolution of weak patch names to concrete classes and members.
//!
//! Patch classes linked by supertypes, member types or instruction
//! references form a group. For each group the candidates of every weak
//! class, method and field are narrowed by propagation from a seed class,
//! then assignments are enumerated odometer-style until one passes the full
//! structural and instruction checks.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::check::{check_attributes, check_fields, check_method, check_method_instructions, check_methods};
use crate::classset::{ClassId, ClassSet, FieldId};
use crate::descriptor::{JavaType, MethodType};
use crate::error::{PatchError, Result};
use crate::instruction::MemberReference;
use crate::ir::{Constant, Insn, MethodNode, NodeId};
use crate::logging::{LoggedClass, StateLogger};
use crate::patch::{Ident, Mode, PatchClass, PatchClasses};
use crate::scope::PatchScope;

/// One weak class name of the patch and its candidate classes.
#[derive(Debug)]
pub struct MatchClass {
    name: String,
    super_class: Option<usize>,
    interfaces: Vec<usize>,
    methods: Vec<usize>,
    fields: Vec<usize>,
    matches: Vec<ClassId>,
    checked: BTreeSet<ClassId>,
}

impl MatchClass {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_class: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            matches: Vec::new(),
            checked: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn matches(&self) -> &[ClassId] {
        &self.matches
    }

    fn add_match(&mut self, class: ClassId) {
        if !self.checked.contains(&class) && !self.matches.contains(&class) {
            self.matches.push(class);
        }
    }

    fn unchecked(&self) -> Vec<ClassId> {
        self.matches
            .iter()
            .copied()
            .filter(|class| !self.checked.contains(class))
            .collect()
    }
}

/// A weak method of a [`MatchClass`]. Candidates pair the concrete class the
/// method was seen through with the method body.
#[derive(Debug)]
pub struct MatchMethod {
    owner: usize,
    name: String,
    desc: String,
    ty: Option<MethodType>,
    matches: Vec<(ClassId, NodeId)>,
    checked: BTreeSet<(ClassId, NodeId)>,
}

impl MatchMethod {
    fn add_match(&mut self, candidate: (ClassId, NodeId)) {
        if !self.checked.contains(&candidate) && !self.matches.contains(&candidate) {
            self.matches.push(candidate);
        }
    }

    fn unchecked(&self) -> Vec<(ClassId, NodeId)> {
        self.matches
            .iter()
            .copied()
            .filter(|candidate| !self.checked.contains(candidate))
            .collect()
    }

    fn candidates(&self, owner: ClassId) -> Vec<NodeId> {
        self.matches
            .iter()
            .filter(|(class, _)| *class == owner)
            .map(|(_, node)| *node)
            .collect()
    }
}

/// A weak field of a [`MatchClass`].
#[derive(Debug)]
pub struct MatchField {
    owner: usize,
    name: String,
    desc: String,
    ty: Option<JavaType>,
    matches: Vec<(ClassId, FieldId)>,
    checked: BTreeSet<(ClassId, FieldId)>,
}

impl MatchField {
    fn add_match(&mut self, candidate: (ClassId, FieldId)) {
        if !self.checked.contains(&candidate) && !self.matches.contains(&candidate) {
            self.matches.push(candidate);
        }
    }

    fn unchecked(&self) -> Vec<(ClassId, FieldId)> {
        self.matches
            .iter()
            .copied()
            .filter(|candidate| !self.checked.contains(candidate))
            .collect()
    }

    fn candidates(&self, owner: ClassId) -> Vec<FieldId> {
        self.matches
            .iter()
            .filter(|(class, _)| *class == owner)
            .map(|(_, field)| *field)
            .collect()
    }
}

/// Patch classes resolved together, in discovery order.
#[derive(Clone, Debug, Default)]
pub struct MatchGroup {
    classes: Vec<usize>,
}

/// A candidate found while checking, applied once the check succeeds.
enum Pending {
    Class(usize, ClassId),
    Method(usize, (ClassId, NodeId)),
    Field(usize, (ClassId, FieldId)),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tick {
    Class(usize),
    Field(usize),
    Method(usize),
}

pub struct MatchGenerator<'a> {
    class_set: &'a ClassSet,
    patch: &'a PatchClasses,
    classes: Vec<MatchClass>,
    class_names: BTreeMap<String, usize>,
    methods: Vec<MatchMethod>,
    fields: Vec<MatchField>,
    groups: Vec<MatchGroup>,
    logger: StateLogger,
}

impl<'a> MatchGenerator<'a> {
    /// Build the groups of `patch` and narrow their candidates against
    /// `class_set`.
    pub fn new(class_set: &'a ClassSet, patch: &'a PatchClasses, trace: bool) -> Self {
        let mut generator = Self {
            class_set,
            patch,
            classes: Vec::new(),
            class_names: BTreeMap::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            groups: Vec::new(),
            logger: StateLogger::new(trace),
        };
        generator.generate_groups();
        generator.reduce_groups();
        generator
    }

    /// Class names of each non-empty group.
    pub fn group_names(&self) -> Vec<Vec<&str>> {
        self.groups
            .iter()
            .filter(|group| !group.classes.is_empty())
            .map(|group| {
                group
                    .classes
                    .iter()
                    .map(|class| self.classes[*class].name.as_str())
                    .collect()
            })
            .collect()
    }

    pub fn class(&self, name: &str) -> Option<&MatchClass> {
        self.class_names.get(name).map(|index| &self.classes[*index])
    }

    /// Concrete names of the candidates for the weak class `name`.
    pub fn candidate_names(&self, name: &str) -> Vec<&str> {
        self.class(name)
            .map(|class| {
                class
                    .matches
                    .iter()
                    .map(|id| self.class_set.name(*id))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn class_index(&mut self, name: &str) -> usize {
        if let Some(index) = self.class_names.get(name) {
            return *index;
        }
        let index = self.classes.len();
        self.classes.push(MatchClass::new(name));
        self.class_names.insert(name.to_string(), index);
        index
    }

    fn method_index(&mut self, owner: usize, name: &str, desc: &str) -> usize {
        let existing = self.classes[owner]
            .methods
            .iter()
            .copied()
            .find(|method| self.methods[*method].name == name && self.methods[*method].desc == desc);
        if let Some(index) = existing {
            return index;
        }
        let index = self.methods.len();
        self.methods.push(MatchMethod {
            owner,
            name: name.to_string(),
            desc: desc.to_string(),
            ty: MethodType::parse(desc).ok(),
            matches: Vec::new(),
            checked: BTreeSet::new(),
        });
        self.classes[owner].methods.push(index);
        index
    }

    fn field_index(&mut self, owner: usize, name: &str, desc: &str) -> usize {
        let existing = self.classes[owner]
            .fields
            .iter()
            .copied()
            .find(|field| self.fields[*field].name == name && self.fields[*field].desc == desc);
        if let Some(index) = existing {
            return index;
        }
        let index = self.fields.len();
        self.fields.push(MatchField {
            owner,
            name: name.to_string(),
            desc: desc.to_string(),
            ty: JavaType::parse(desc).ok(),
            matches: Vec::new(),
            checked: BTreeSet::new(),
        });
        self.classes[owner].fields.push(index);
        index
    }

    fn group_add(&mut self, group: usize, class: usize) {
        let name = &self.classes[class].name;
        let hidden = self
            .class_set
            .by_name(name)
            .is_some_and(|wrapper| wrapper.is_hidden());
        if name == "*" || hidden {
            return;
        }
        if !self.groups[group].classes.contains(&class) {
            self.groups[group].classes.push(class);
        }
    }

    fn generate_groups(&mut self) {
        let mut visited: BTreeMap<usize, usize> = BTreeMap::new();
        let patch = self.patch;
        for patch_class in patch.classes.iter().filter(|class| class.mode != Mode::Add) {
            let start = self.class_index(patch_class.ident.name());
            if visited.contains_key(&start) {
                continue;
            }
            let group = self.groups.len();
            self.groups.push(MatchGroup::default());
            visited.insert(start, group);
            let mut stack = vec![start];

            while let Some(current) = stack.pop() {
                let group = visited.get(&current).copied().unwrap_or(group);
                let Some(patch_class) = patch.get_class(&self.classes[current].name) else {
                    continue;
                };
                if patch_class.mode == Mode::Add {
                    continue;
                }
                self.group_add(group, current);
                self.link_class(patch_class, current, group, &mut visited, &mut stack);
            }
        }
        debug!(
            "{} match groups",
            self.groups.iter().filter(|group| !group.classes.is_empty()).count()
        );
    }

    fn link_class(
        &mut self,
        patch_class: &PatchClass,
        current: usize,
        group: usize,
        visited: &mut BTreeMap<usize, usize>,
        stack: &mut Vec<usize>,
    ) {
        for modifier in patch_class.supers.iter().filter(|modifier| modifier.mode != Mode::Add) {
            let super_class = self.class_index(modifier.ident.name());
            self.classes[current].super_class = Some(super_class);
            self.visit(super_class, group, visited, stack);
        }
        for modifier in patch_class.interfaces.iter().filter(|modifier| modifier.mode != Mode::Add) {
            let interface = self.class_index(modifier.ident.name());
            self.classes[current].interfaces.push(interface);
            self.visit(interface, group, visited, stack);
        }
        for field in patch_class.fields.iter().filter(|field| field.mode != Mode::Add) {
            self.field_index(current, field.ident.name(), &field.desc_raw);
            if let Some(name) = root_weak_name(&field.desc) {
                let class = self.class_index(&name);
                self.visit(class, group, visited, stack);
            }
        }
        for method in patch_class.methods.iter().filter(|method| method.mode != Mode::Add) {
            self.method_index(current, method.ident.name(), &method.desc_raw);
            let types = method.desc.args.iter().chain(std::iter::once(&method.desc.ret));
            for name in types.filter_map(root_weak_name) {
                let class = self.class_index(&name);
                self.visit(class, group, visited, stack);
            }
            for instruction in method.instructions.iter().filter(|instruction| instruction.mode != Mode::Add) {
                let Some(handler) = instruction.instruction.handler() else {
                    continue;
                };
                for name in handler.referenced_classes(instruction) {
                    let class = self.class_index(&name);
                    self.visit(class, group, visited, stack);
                }
                for reference in handler.referenced_methods(instruction) {
                    let owner = self.class_index(&reference.owner);
                    self.method_index(owner, &reference.name, &reference.desc);
                }
                for reference in handler.referenced_fields(instruction) {
                    let owner = self.class_index(&reference.owner);
                    self.field_index(owner, &reference.name, &reference.desc);
                }
            }
        }
    }

    /// Queue `class` for the current group, merging groups that turn out to
    /// be connected.
    fn visit(&mut self, class: usize, group: usize, visited: &mut BTreeMap<usize, usize>, stack: &mut Vec<usize>) {
        if self.patch.get_class(&self.classes[class].name).is_none() {
            return;
        }
        match visited.get(&class).copied() {
            None => {
                visited.insert(class, group);
                stack.push(class);
            }
            Some(other) if other != group => {
                let moved = std::mem::take(&mut self.groups[other].classes);
                for member in &moved {
                    if !self.groups[group].classes.contains(member) {
                        self.groups[group].classes.push(*member);
                    }
                }
                for owner in visited.values_mut() {
                    if *owner == other {
                        *owner = group;
                    }
                }
            }
            Some(_) => {}
        }
    }

    fn reduce_groups(&mut self) {
        let class_set = self.class_set;
        let all_classes = class_set.class_ids(true);
        for group in 0..self.groups.len() {
            let members = self.groups[group].classes.clone();
            let Some(&first) = members.first() else {
                continue;
            };
            for class in &all_classes {
                self.classes[first].add_match(*class);
            }
            self.logger
                .println(format!("Adding all classes to {}", self.classes[first].name));

            loop {
                let mut progress = false;

                while let Some(class) = members.iter().copied().find(|class| !self.classes[*class].unchecked().is_empty()) {
                    progress = true;
                    self.logger.println(format!("Checking {}", self.classes[class].name));
                    self.logger.indent();
                    for candidate in self.classes[class].unchecked() {
                        self.check_class_candidate(class, candidate);
                    }
                    self.logger.unindent();
                }

                while let Some(field) = self.group_fields(&members).into_iter().find(|field| !self.fields[*field].unchecked().is_empty()) {
                    progress = true;
                    let owner = &self.classes[self.fields[field].owner].name;
                    self.logger.println(format!("Checking {owner}.{}", self.fields[field].name));
                    self.logger.indent();
                    for candidate in self.fields[field].unchecked() {
                        self.check_field_candidate(field, candidate);
                    }
                    self.logger.unindent();
                }

                while let Some(method) = self.group_methods(&members).into_iter().find(|method| !self.methods[*method].unchecked().is_empty()) {
                    progress = true;
                    let owner = &self.classes[self.methods[method].owner].name;
                    self.logger.println(format!(
                        "Checking {owner}::{}{}",
                        self.methods[method].name, self.methods[method].desc
                    ));
                    self.logger.indent();
                    for candidate in self.methods[method].unchecked() {
                        self.check_method_candidate(method, candidate);
                    }
                    self.logger.unindent();
                }

                if !progress {
                    let widen: Vec<usize> = members
                        .iter()
                        .copied()
                        .filter(|class| {
                            let class = &self.classes[*class];
                            class.matches.is_empty() && class.checked.len() < all_classes.len()
                        })
                        .collect();
                    for class in &widen {
                        self.logger
                            .println(format!("Widening {} to every class", self.classes[*class].name));
                        for candidate in &all_classes {
                            self.classes[*class].add_match(*candidate);
                        }
                    }
                    progress = widen
                        .iter()
                        .any(|class| !self.classes[*class].unchecked().is_empty());
                }
                if !progress {
                    break;
                }
            }

            self.prune(&members);
        }
    }

    fn group_fields(&self, members: &[usize]) -> Vec<usize> {
        members
            .iter()
            .flat_map(|class| self.classes[*class].fields.iter().copied())
            .collect()
    }

    fn group_methods(&self, members: &[usize]) -> Vec<usize> {
        members
            .iter()
            .flat_map(|class| self.classes[*class].methods.iter().copied())
            .collect()
    }

    /// Drop candidate classes that lost every candidate of one of their
    /// methods or fields.
    fn prune(&mut self, members: &[usize]) {
        for &class in members {
            let candidates = self.classes[class].matches.clone();
            for candidate in candidates {
                let incomplete = self.classes[class]
                    .methods
                    .iter()
                    .any(|method| !self.methods[*method].matches.iter().any(|(owner, _)| *owner == candidate))
                    || self.classes[class]
                        .fields
                        .iter()
                        .any(|field| !self.fields[*field].matches.iter().any(|(owner, _)| *owner == candidate));
                if !incomplete {
                    continue;
                }
                self.logger.println_with(|| {
                    format!("Removing {} from {}", self.class_set.name(candidate), self.classes[class].name)
                });
                self.classes[class].matches.retain(|id| *id != candidate);
                for method in self.classes[class].methods.clone() {
                    self.methods[method].matches.retain(|(owner, _)| *owner != candidate);
                }
                for field in self.classes[class].fields.clone() {
                    self.fields[field].matches.retain(|(owner, _)| *owner != candidate);
                }
            }
        }
    }

    fn check_class_candidate(&mut self, class: usize, candidate: ClassId) {
        let class_set = self.class_set;
        self.classes[class].checked.insert(candidate);
        let Some(wrapper) = class_set.get(candidate) else {
            return;
        };
        self.logger.println(format!("- {}", wrapper.node.name));
        self.logger.indent();

        if let Some(super_class) = self.classes[class].super_class {
            let parent = class_set
                .super_class(candidate)
                .filter(|parent| class_set.get(*parent).is_some_and(|parent| !parent.is_hidden()));
            if let Some(parent) = parent {
                self.logger.println_with(|| adding(class_set.name(parent), &self.classes[super_class].name));
                self.classes[super_class].add_match(parent);
            }
        }
        for interface in &wrapper.node.interfaces {
            let Some(id) = class_set.lookup(interface) else {
                continue;
            };
            if class_set.get(id).is_some_and(|interface| interface.is_hidden()) {
                continue;
            }
            self.logger.println(format!(
                "Adding {interface} as a possible match for {} interfaces",
                self.classes[class].interfaces.len()
            ));
            for linked in self.classes[class].interfaces.clone() {
                self.classes[linked].add_match(id);
            }
        }

        self.logger.println("Adding methods/fields to be tested");
        for field in self.classes[class].fields.clone() {
            for id in wrapper.fields() {
                self.fields[field].add_match((candidate, *id));
            }
        }
        for method in self.classes[class].methods.clone() {
            for node in &wrapper.node.methods {
                self.methods[method].add_match((candidate, node.id));
            }
        }
        self.logger.unindent();
    }

    fn check_field_candidate(&mut self, field: usize, candidate: (ClassId, FieldId)) {
        let class_set = self.class_set;
        self.fields[field].checked.insert(candidate);
        let wrapper = class_set.field(candidate.1);
        self.logger
            .println(format!("- {}.{}", class_set.name(candidate.0), wrapper.name));
        self.logger.indent();

        let expected = self.fields[field].ty.clone();
        let actual = JavaType::parse(&wrapper.desc).ok();
        match (expected, actual) {
            (Some(expected), Some(actual)) if expected.sort() == actual.sort() => {
                if let (Some(name), Some(concrete)) = (weak_class_name(&expected), actual.class_name()) {
                    if let Some(found) = visible_class(class_set, concrete) {
                        self.logger.println(adding(concrete, &name));
                        let target = self.class_index(&name);
                        self.classes[target].add_match(found);
                    }
                }
            }
            (expected, actual) => {
                if let (Some(expected), Some(actual)) = (&expected, &actual) {
                    self.logger.println(StateLogger::type_mismatch(expected, actual));
                }
                self.fields[field].matches.retain(|existing| *existing != candidate);
            }
        }
        self.logger.unindent();
    }

    fn check_method_candidate(&mut self, method: usize, candidate: (ClassId, NodeId)) {
        self.methods[method].checked.insert(candidate);
        let class_set = self.class_set;
        let Some(node) = class_set.method_by_node(candidate.0, candidate.1) else {
            self.remove_method_match(method, candidate);
            return;
        };
        self.logger
            .println(format!("- {}::{}{}", class_set.name(candidate.0), node.name, node.desc));
        self.logger.indent();
        let pending = self.method_candidate_matches(method, node);
        self.logger.unindent();

        match pending {
            Some(pending) => {
                self.logger.println(format!("Adding {} new matches", pending.len()));
                for pending in pending {
                    match pending {
                        Pending::Class(class, id) => self.classes[class].add_match(id),
                        Pending::Method(method, candidate) => self.methods[method].add_match(candidate),
                        Pending::Field(field, candidate) => self.fields[field].add_match(candidate),
                    }
                }
            }
            None => self.remove_method_match(method, candidate),
        }
    }

    fn remove_method_match(&mut self, method: usize, candidate: (ClassId, NodeId)) {
        self.methods[method].matches.retain(|existing| *existing != candidate);
    }

    /// Candidates implied by `node` if it can stand for `method`.
    fn method_candidate_matches(&mut self, method: usize, node: &MethodNode) -> Option<Vec<Pending>> {
        let class_set = self.class_set;
        let Ok(actual) = MethodType::parse(&node.desc) else {
            return None;
        };
        let Some(expected) = self.methods[method].ty.clone() else {
            return None;
        };
        if expected.args.len() != actual.args.len() {
            self.logger.println(format!(
                "Argument size mis-match {} != {}",
                expected.args.len(),
                actual.args.len()
            ));
            return None;
        }

        let mut pending = Vec::new();
        let pairs = std::iter::once((&expected.ret, &actual.ret)).chain(expected.args.iter().zip(&actual.args));
        for (expected, actual) in pairs {
            if expected.sort() != actual.sort() {
                self.logger.println(StateLogger::type_mismatch(expected, actual));
                return None;
            }
            let (Some(name), Some(concrete)) = (weak_class_name(expected), actual.class_name()) else {
                continue;
            };
            if let Some(found) = visible_class(class_set, concrete) {
                self.logger.println(adding(concrete, &name));
                let target = self.class_index(&name);
                pending.push(Pending::Class(target, found));
            }
        }

        let owner_name = self.classes[self.methods[method].owner].name.clone();
        let patch = self.patch;
        let Some(patch_method) = patch.get_class(&owner_name).and_then(|class| {
            class
                .methods
                .iter()
                .find(|candidate| {
                    candidate.ident.name() == self.methods[method].name && candidate.desc_raw == self.methods[method].desc
                })
        }) else {
            return Some(pending);
        };

        self.logger.println("Entering method");
        self.logger.indent();
        let ok = check_method(patch_method, &mut self.logger, class_set, None, node);
        self.logger.unindent();
        if !ok {
            return None;
        }

        let references = ConcreteReferences::collect(class_set, node);
        for instruction in patch_method
            .instructions
            .iter()
            .filter(|instruction| instruction.mode != Mode::Add)
        {
            let Some(handler) = instruction.instruction.handler() else {
                continue;
            };
            for name in handler.referenced_classes(instruction) {
                let target = self.class_index(&name);
                pending.extend(references.classes.iter().map(|id| Pending::Class(target, *id)));
            }
            for MemberReference { owner, name, desc } in handler.referenced_methods(instruction) {
                let owner = self.class_index(&owner);
                let target = self.method_index(owner, &name, &desc);
                pending.extend(references.methods.iter().map(|pair| Pending::Method(target, *pair)));
            }
            for MemberReference { owner, name, desc } in handler.referenced_fields(instruction) {
                let owner = self.class_index(&owner);
                let target = self.field_index(owner, &name, &desc);
                pending.extend(references.fields.iter().map(|pair| Pending::Field(target, *pair)));
            }
        }
        Some(pending)
    }

    /// Find the first assignment that passes every check, group by group,
    /// and return the bindings layered over `outer`.
    pub fn apply(mut self, outer: &PatchScope<'_>) -> Result<PatchScope<'static>> {
        let mut accepted = Vec::new();
        for group in 0..self.groups.len() {
            let members = self.groups[group].classes.clone();
            if members.is_empty() {
                continue;
            }
            if let Some(empty) = members.iter().find(|class| self.classes[**class].matches.is_empty()) {
                self.logger
                    .println(format!("No candidates for {}", self.classes[*empty].name));
                return Err(self.failure(0));
            }

            let ticks = self.tick_list(&members);
            let mut state = vec![0usize; ticks.len()];
            let mut count: u64 = 0;
            let resolved = loop {
                count += 1;
                let mut trial = PatchScope::child(outer);
                if self.generate_scope(&ticks, &state, &mut trial)? && self.test(&members, &mut trial) {
                    break Some(trial.detach());
                }
                if !self.advance(&ticks, &mut state) {
                    break None;
                }
            };
            match resolved {
                Some(scope) => {
                    debug!("group {group} resolved after {count} ticks");
                    accepted.push(scope);
                }
                None => return Err(self.failure(count)),
            }
        }

        let mut scope = outer.duplicate();
        for trial in accepted {
            scope.merge(trial);
        }
        Ok(scope)
    }

    fn failure(&mut self, ticks: u64) -> PatchError {
        for group in &self.groups {
            if group.classes.is_empty() {
                continue;
            }
            let classes = group
                .classes
                .iter()
                .map(|class| {
                    let class = &self.classes[*class];
                    LoggedClass {
                        name: class.name.clone(),
                        matches: class
                            .matches
                            .iter()
                            .map(|id| self.class_set.name(*id).to_string())
                            .collect(),
                    }
                })
                .collect();
            self.logger.add_group(classes);
        }
        self.logger.set_failed_ticks(ticks);
        std::mem::take(&mut self.logger).into_failure().into()
    }

    fn test(&mut self, members: &[usize], scope: &mut PatchScope<'_>) -> bool {
        let class_set = self.class_set;
        let patch = self.patch;
        let classes: Vec<&PatchClass> = members
            .iter()
            .filter_map(|class| patch.get_class(&self.classes[*class].name))
            .collect();
        let logger = &mut self.logger;
        classes.iter().all(|class| check_attributes(class, logger, scope, class_set))
            && classes.iter().all(|class| check_fields(class, logger, scope, class_set))
            && classes.iter().all(|class| check_methods(class, logger, scope, class_set))
            && classes
                .iter()
                .all(|class| check_method_instructions(class, logger, scope, class_set))
    }

    fn tick_list(&self, members: &[usize]) -> Vec<Tick> {
        let mut ticks = Vec::new();
        for &class in members {
            ticks.push(Tick::Class(class));
            ticks.extend(self.classes[class].fields.iter().map(|field| Tick::Field(*field)));
            ticks.extend(self.classes[class].methods.iter().map(|method| Tick::Method(*method)));
        }
        ticks
    }

    /// Concrete class currently selected by the nearest class entry at or
    /// before `index`.
    fn selected_owner(&self, ticks: &[Tick], state: &[usize], index: usize) -> Option<ClassId> {
        (0..=index).rev().find_map(|i| match ticks[i] {
            Tick::Class(class) => self.classes[class].matches.get(state[i]).copied(),
            _ => None,
        })
    }

    /// Advance the odometer; `false` once every combination was tried.
    fn advance(&self, ticks: &[Tick], state: &mut [usize]) -> bool {
        for i in (0..ticks.len()).rev() {
            let len = match ticks[i] {
                Tick::Class(class) => self.classes[class].matches.len(),
                Tick::Field(field) => self
                    .selected_owner(ticks, state, i)
                    .map_or(0, |owner| self.fields[field].candidates(owner).len()),
                Tick::Method(method) => self
                    .selected_owner(ticks, state, i)
                    .map_or(0, |owner| self.methods[method].candidates(owner).len()),
            };
            if state[i] + 1 >= len {
                state[i] = 0;
                continue;
            }
            state[i] += 1;
            return true;
        }
        false
    }

    /// Bind the selected candidates into `scope`. Returns `false` when two
    /// weak members would bind the same concrete member.
    fn generate_scope(&self, ticks: &[Tick], state: &[usize], scope: &mut PatchScope<'_>) -> Result<bool> {
        let class_set = self.class_set;
        for (i, tick) in ticks.iter().enumerate() {
            match *tick {
                Tick::Class(class) => {
                    let class = &self.classes[class];
                    let selected = class
                        .matches
                        .get(state[i])
                        .ok_or_else(|| PatchError::internal(format!("No candidates for {}", class.name)))?;
                    if scope.put_class(&class.name, *selected) {
                        return Ok(false);
                    }
                }
                Tick::Field(field) => {
                    let field = &self.fields[field];
                    let owner = self.owner_of(ticks, state, i)?;
                    let selected = field.candidates(owner).get(state[i]).copied().ok_or_else(|| {
                        PatchError::internal(format!("No candidates for field {}", field.name))
                    })?;
                    if scope.put_field(selected, &field.name, &field.desc) {
                        return Ok(false);
                    }
                }
                Tick::Method(method) => {
                    let method = &self.methods[method];
                    let owner = self.owner_of(ticks, state, i)?;
                    let selected = method.candidates(owner).get(state[i]).copied().ok_or_else(|| {
                        PatchError::internal(format!("No candidates for method {}", method.name))
                    })?;
                    let node = class_set
                        .method_by_node(owner, selected)
                        .ok_or_else(|| PatchError::internal(format!("Missing method {}", method.name)))?;
                    let bound = class_set
                        .find_method(owner, &node.name, &node.desc)
                        .ok_or_else(|| PatchError::internal(format!("Missing method {}", node.name)))?;
                    if scope.put_method(bound, &method.name, &method.desc) {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    fn owner_of(&self, ticks: &[Tick], state: &[usize], index: usize) -> Result<ClassId> {
        self.selected_owner(ticks, state, index)
            .ok_or_else(|| PatchError::internal("Member without a selected owner"))
    }
}

/// Non-hidden classes, methods and fields named by a concrete body.
#[derive(Default)]
struct ConcreteReferences {
    classes: BTreeSet<ClassId>,
    methods: BTreeSet<(ClassId, NodeId)>,
    fields: BTreeSet<(ClassId, FieldId)>,
}

impl ConcreteReferences {
    fn collect(class_set: &ClassSet, node: &MethodNode) -> Self {
        let mut references = Self::default();
        for insn in &node.instructions {
            match insn {
                Insn::Method { owner, name, desc, .. } => {
                    let Some(class) = visible_class(class_set, owner) else {
                        continue;
                    };
                    references.classes.insert(class);
                    let declared = class_set
                        .find_method(class, name, desc)
                        .and_then(|method| class_set.method_node(class, method));
                    if let Some((_, method)) = declared {
                        references.methods.insert((class, method.id));
                    }
                }
                Insn::Field { owner, name, desc, .. } => {
                    let Some(class) = visible_class(class_set, owner) else {
                        continue;
                    };
                    references.classes.insert(class);
                    if let Some(field) = class_set.find_field(class, name, desc) {
                        references.fields.insert((class, field));
                    }
                }
                Insn::Ldc(Constant::Class(name)) | Insn::Type { desc: name, .. } | Insn::MultiANewArray { desc: name, .. } => {
                    let ty = JavaType::from_internal_name(name);
                    if let Some(class) = ty.root().class_name().and_then(|root| visible_class(class_set, root)) {
                        references.classes.insert(class);
                    }
                }
                _ => {}
            }
        }
        references
    }
}

fn visible_class(class_set: &ClassSet, name: &str) -> Option<ClassId> {
    class_set
        .lookup(name)
        .filter(|id| class_set.get(*id).is_some_and(|class| !class.is_hidden()))
}

/// Patch class name of an object type, without the weak marker.
fn weak_class_name(ty: &JavaType) -> Option<String> {
    let ident = Ident::new(ty.class_name()?);
    (!ident.is_wildcard()).then(|| ident.name().to_string())
}

fn root_weak_name(ty: &JavaType) -> Option<String> {
    weak_class_name(ty.root())
}

fn adding(concrete: &str, name: &str) -> String {
    format!("Adding {concrete} as a possible match for {name}")
}
