use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::ir::{is_inheritable, ClassNode, FieldNode, MethodNode, NodeId};

/// Handle of a class in a [`ClassSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

/// Handle of a method wrapper in a [`ClassSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

/// Handle of a field wrapper in a [`ClassSet`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

/// A class plus the member wrappers visible through it.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassWrapper {
    pub node: ClassNode,
    hidden: bool,
    methods: Vec<MethodId>,
    fields: Vec<FieldId>,
}

impl ClassWrapper {
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn methods(&self) -> &[MethodId] {
        &self.methods
    }

    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }
}

/// A method identity that may be shared by several declaring classes.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodWrapper {
    pub name: String,
    pub desc: String,
    owners: BTreeSet<ClassId>,
    hidden: bool,
}

impl MethodWrapper {
    pub fn has(&self, class: ClassId) -> bool {
        self.owners.contains(&class)
    }

    pub fn owners(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.owners.iter().copied()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }
}

/// A field identity that may be shared by several declaring classes.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldWrapper {
    pub name: String,
    pub desc: String,
    owners: BTreeSet<ClassId>,
    hidden: bool,
}

impl FieldWrapper {
    pub fn has(&self, class: ClassId) -> bool {
        self.owners.contains(&class)
    }

    pub fn owners(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.owners.iter().copied()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }
}

/// Arena of classes being patched, plus hidden library classes they refer to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClassSet {
    classes: Vec<Option<ClassWrapper>>,
    names: BTreeMap<String, ClassId>,
    methods: Vec<MethodWrapper>,
    fields: Vec<FieldWrapper>,
    next_node: u32,
    simplified: bool,
}

impl ClassSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a class, replacing any class of the same name. Hidden classes can
    /// be referenced by patches but never matched or edited.
    pub fn add(&mut self, mut node: ClassNode, hidden: bool) -> ClassId {
        if let Some(previous) = self.names.get(&node.name).copied() {
            self.classes[previous.0 as usize] = None;
        }
        let id = ClassId(self.classes.len() as u32);
        for method in &mut node.methods {
            method.id = self.next_node_id();
        }
        let mut methods = Vec::with_capacity(node.methods.len());
        for method in &node.methods {
            methods.push(self.push_method_wrapper(id, &method.name, &method.desc, hidden));
        }
        let mut fields = Vec::with_capacity(node.fields.len());
        for field in &node.fields {
            fields.push(self.push_field_wrapper(id, &field.name, &field.desc, hidden));
        }
        self.names.insert(node.name.clone(), id);
        self.classes.push(Some(ClassWrapper {
            node,
            hidden,
            methods,
            fields,
        }));
        id
    }

    pub fn remove(&mut self, name: &str) -> Option<ClassWrapper> {
        let id = self.names.remove(name)?;
        self.classes[id.0 as usize].take()
    }

    pub fn lookup(&self, name: &str) -> Option<ClassId> {
        self.names.get(name).copied()
    }

    pub fn get(&self, id: ClassId) -> Option<&ClassWrapper> {
        self.classes.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ClassId) -> Option<&mut ClassWrapper> {
        self.classes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub fn by_name(&self, name: &str) -> Option<&ClassWrapper> {
        self.lookup(name).and_then(|id| self.get(id))
    }

    pub fn name(&self, id: ClassId) -> &str {
        self.get(id).map_or("<removed>", |class| class.node.name.as_str())
    }

    /// Class handles ordered by class name.
    pub fn class_ids(&self, strip_hidden: bool) -> Vec<ClassId> {
        self.names
            .values()
            .copied()
            .filter(|id| {
                !strip_hidden || self.get(*id).is_some_and(|class| !class.is_hidden())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn method(&self, id: MethodId) -> &MethodWrapper {
        &self.methods[id.0 as usize]
    }

    pub fn field(&self, id: FieldId) -> &FieldWrapper {
        &self.fields[id.0 as usize]
    }

    /// Like [`ClassSet::method`], for handles that may come from another set.
    pub fn try_method(&self, id: MethodId) -> Option<&MethodWrapper> {
        self.methods.get(id.0 as usize)
    }

    pub fn try_field(&self, id: FieldId) -> Option<&FieldWrapper> {
        self.fields.get(id.0 as usize)
    }

    /// Method wrapper visible through `class`, searching superclasses.
    pub fn find_method(&self, class: ClassId, name: &str, desc: &str) -> Option<MethodId> {
        let wrapper = self.get(class)?;
        let found = wrapper.methods.iter().copied().find(|id| {
            let method = self.method(*id);
            method.name == name && method.desc == desc
        });
        found.or_else(|| {
            let super_id = self.super_class(class)?;
            self.find_method(super_id, name, desc)
        })
    }

    /// Field wrapper visible through `class`, searching superclasses.
    pub fn find_field(&self, class: ClassId, name: &str, desc: &str) -> Option<FieldId> {
        let wrapper = self.get(class)?;
        let found = wrapper.fields.iter().copied().find(|id| {
            let field = self.field(*id);
            field.name == name && field.desc == desc
        });
        found.or_else(|| {
            let super_id = self.super_class(class)?;
            self.find_field(super_id, name, desc)
        })
    }

    /// Declaring class and node of `method` as seen from `class`.
    pub fn method_node(&self, class: ClassId, method: MethodId) -> Option<(ClassId, &MethodNode)> {
        let wrapper = self.method(method);
        let node = &self.get(class)?.node;
        match node.method(&wrapper.name, &wrapper.desc) {
            Some(found) => Some((class, found)),
            None => self.method_node(self.super_class(class)?, method),
        }
    }

    /// Declaring class and node of `field` as seen from `class`.
    pub fn field_node(&self, class: ClassId, field: FieldId) -> Option<(ClassId, &FieldNode)> {
        let wrapper = self.field(field);
        let node = &self.get(class)?.node;
        match node.field(&wrapper.name, &wrapper.desc) {
            Some(found) => Some((class, found)),
            None => self.field_node(self.super_class(class)?, field),
        }
    }

    /// Method body `id` declared by `class` or one of its superclasses.
    pub fn method_by_node(&self, class: ClassId, id: NodeId) -> Option<&MethodNode> {
        let node = &self.get(class)?.node;
        match node.methods.iter().find(|method| method.id == id) {
            Some(found) => Some(found),
            None => self.method_by_node(self.super_class(class)?, id),
        }
    }

    pub fn method_node_mut(&mut self, class: ClassId, id: NodeId) -> Option<&mut MethodNode> {
        self.get_mut(class)?
            .node
            .methods
            .iter_mut()
            .find(|method| method.id == id)
    }

    pub fn super_class(&self, class: ClassId) -> Option<ClassId> {
        let super_name = self.get(class)?.node.super_name.as_deref()?;
        self.lookup(super_name)
    }

    /// Attach a new method to `class`, sharing `shared` when it overrides an
    /// inherited method.
    pub fn add_method(
        &mut self,
        class: ClassId,
        mut node: MethodNode,
        shared: Option<MethodId>,
    ) -> Option<MethodId> {
        node.id = self.next_node_id();
        let wrapper = match shared {
            Some(shared) => {
                self.methods[shared.0 as usize].owners.insert(class);
                shared
            }
            None => self.push_method_wrapper(class, &node.name, &node.desc, false),
        };
        let target = self.get_mut(class)?;
        target.methods.push(wrapper);
        target.node.methods.push(node);
        Some(wrapper)
    }

    pub fn add_field(&mut self, class: ClassId, node: FieldNode) -> Option<FieldId> {
        let wrapper = self.push_field_wrapper(class, &node.name, &node.desc, false);
        let target = self.get_mut(class)?;
        target.fields.push(wrapper);
        target.node.fields.push(node);
        Some(wrapper)
    }

    /// Remove the node backing `method` from its declaring class as seen
    /// from `class` and unlink the wrapper there.
    pub fn remove_method(&mut self, class: ClassId, method: MethodId) -> Option<MethodNode> {
        let (owner, node) = self.method_node(class, method)?;
        let id = node.id;
        let target = self.get_mut(owner)?;
        target.methods.retain(|wrapper| *wrapper != method);
        let index = target.node.methods.iter().position(|node| node.id == id)?;
        self.methods[method.0 as usize].owners.remove(&owner);
        let target = self.get_mut(owner)?;
        Some(target.node.methods.remove(index))
    }

    /// Remove the node backing `field` from `class` and unlink the wrapper.
    pub fn remove_field(&mut self, class: ClassId, field: FieldId) -> Option<FieldNode> {
        let (owner, _) = self.field_node(class, field)?;
        let wrapper = self.field(field).clone();
        let target = self.get_mut(owner)?;
        target.fields.retain(|id| *id != field);
        let index = target
            .node
            .fields
            .iter()
            .position(|node| node.name == wrapper.name && node.desc == wrapper.desc)?;
        Some(target.node.fields.remove(index))
    }

    /// Flatten inherited visibility: overriding methods share one wrapper with
    /// the methods they override, and inherited instance members list every
    /// subclass as an owner. Runs once.
    pub fn simplify(&mut self) {
        if self.simplified {
            return;
        }
        self.simplified = true;

        for class in self.class_ids(true) {
            let Some(wrapper) = self.get(class) else {
                continue;
            };
            let parents = parent_names(&wrapper.node);
            let methods = wrapper.methods.clone();
            for method in methods {
                if self.method(method).hidden {
                    continue;
                }
                let inheritable = self
                    .method_node(class, method)
                    .is_some_and(|(_, node)| is_inheritable(node.access));
                if !inheritable {
                    continue;
                }
                for parent in &parents {
                    self.replace_method(method, parent);
                }
            }
        }

        for class in self.class_ids(true) {
            self.grab(class, Some(class));
        }
        debug!("simplified {} classes", self.len());
    }

    fn replace_method(&mut self, method: MethodId, class_name: &str) {
        let Some(class) = self.lookup(class_name) else {
            return;
        };
        let Some(wrapper) = self.get(class) else {
            return;
        };
        let parents = parent_names(&wrapper.node);
        let (name, desc) = {
            let method = self.method(method);
            (method.name.clone(), method.desc.clone())
        };
        let target = wrapper.methods.iter().copied().find(|candidate| {
            let candidate_wrapper = self.method(*candidate);
            candidate_wrapper.name == name
                && candidate_wrapper.desc == desc
                && self
                    .method_node(class, *candidate)
                    .is_some_and(|(_, node)| is_inheritable(node.access))
        });
        if let Some(target) = target {
            if target != method {
                let replaced = self.methods[target.0 as usize].clone();
                let shared = &mut self.methods[method.0 as usize];
                if replaced.hidden {
                    shared.hidden = true;
                }
                shared.owners.extend(replaced.owners);
                if let Some(wrapper) = self.get_mut(class) {
                    for slot in wrapper.methods.iter_mut() {
                        if *slot == target {
                            *slot = method;
                        }
                    }
                }
            }
        }
        for parent in &parents {
            self.replace_method(method, parent);
        }
    }

    fn grab(&mut self, root: ClassId, current: Option<ClassId>) {
        let Some(current) = current else {
            return;
        };
        let Some(wrapper) = self.get(current) else {
            return;
        };
        let parents = parent_names(&wrapper.node);
        let fields: Vec<FieldId> = wrapper
            .fields
            .iter()
            .copied()
            .filter(|field| !self.field(*field).hidden)
            .filter(|field| {
                self.field_node(current, *field)
                    .is_some_and(|(_, node)| is_inheritable(node.access))
            })
            .collect();
        let methods: Vec<MethodId> = wrapper
            .methods
            .iter()
            .copied()
            .filter(|method| !self.method(*method).hidden)
            .filter(|method| {
                self.method_node(current, *method)
                    .is_some_and(|(_, node)| is_inheritable(node.access))
            })
            .collect();
        for field in fields {
            self.fields[field.0 as usize].owners.insert(root);
        }
        for method in methods {
            self.methods[method.0 as usize].owners.insert(root);
        }
        for parent in parents {
            let parent = self.lookup(&parent);
            self.grab(root, parent);
        }
    }

    fn next_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }

    fn push_method_wrapper(&mut self, owner: ClassId, name: &str, desc: &str, hidden: bool) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        self.methods.push(MethodWrapper {
            name: name.to_string(),
            desc: desc.to_string(),
            owners: BTreeSet::from([owner]),
            hidden,
        });
        id
    }

    fn push_field_wrapper(&mut self, owner: ClassId, name: &str, desc: &str, hidden: bool) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(FieldWrapper {
            name: name.to_string(),
            desc: desc.to_string(),
            owners: BTreeSet::from([owner]),
            hidden,
        });
        id
    }
}

/// Interfaces first, then the superclass.
fn parent_names(node: &ClassNode) -> Vec<String> {
    let mut parents = node.interfaces.clone();
    if let Some(super_name) = &node.super_name {
        parents.push(super_name.clone());
    }
    parents
}
