//! Applying a resolved patch to a class set.

use log::debug;

use crate::check::{resolve_class_name, updated_method_type, updated_type};
use crate::classset::{ClassId, ClassSet, MethodId};
use crate::descriptor::MethodType;
use crate::error::{PatchError, Result};
use crate::instruction::{try_catch, CheckContext, CreateContext, Instruction};
use crate::ir::{ClassNode, FieldNode, MethodNode};
use crate::opcodes::{
    ACC_ABSTRACT, ACC_ENUM, ACC_INTERFACE, ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ACC_STATIC,
};
use crate::patch::{ClassKind, Ident, Mode, PatchClass, PatchField, PatchMethod};
use crate::scope::PatchScope;

const OBJECT: &str = "java/lang/Object";

/// Apply every edit of `class` using the bindings in `scope`. Added classes
/// and members are bound into `scope` as they are created.
pub fn apply_class(class: &PatchClass, scope: &mut PatchScope<'_>, class_set: &mut ClassSet) -> Result<()> {
    match class.mode {
        Mode::Remove => {
            let name = resolve_class_name(class_set, scope, &class.ident.to_string())?;
            debug!("removing class {name}");
            class_set.remove(&name);
            return Ok(());
        }
        Mode::Add => {
            let mut access = ACC_PUBLIC;
            match class.kind {
                ClassKind::Class => {}
                ClassKind::Interface => access |= ACC_INTERFACE | ACC_ABSTRACT,
                ClassKind::Enum => access |= ACC_ENUM,
            }
            let id = class_set.add(ClassNode::new(access, class.ident.name(), Some(OBJECT)), false);
            debug!("added class {}", class.ident.name());
            scope.put_class(class.ident.name(), id);
        }
        Mode::Match => {}
    }

    let id = scope
        .get_class(class.ident.name())
        .ok_or_else(|| PatchError::internal(format!("Unbound class {}", class.ident)))?;

    apply_supers(class, id, scope, class_set)?;
    apply_interfaces(class, id, scope, class_set)?;
    for field in class.fields.iter().filter(|field| field.mode != Mode::Match) {
        apply_field(field, id, scope, class_set)?;
    }
    for method in &class.methods {
        apply_method(method, id, scope, class_set)?;
    }
    Ok(())
}

fn class_node_mut(class_set: &mut ClassSet, id: ClassId) -> Result<&mut ClassNode> {
    class_set
        .get_mut(id)
        .map(|wrapper| &mut wrapper.node)
        .ok_or_else(|| PatchError::internal(format!("Missing class {}", id.0)))
}

fn apply_supers(class: &PatchClass, id: ClassId, scope: &PatchScope<'_>, class_set: &mut ClassSet) -> Result<()> {
    for modifier in class.supers.iter().filter(|modifier| modifier.mode != Mode::Match) {
        let name = match modifier.ident.name() {
            "*" => "*".to_string(),
            _ => resolve_class_name(class_set, scope, &modifier.ident.to_string())?,
        };
        let node = class_node_mut(class_set, id)?;
        match modifier.mode {
            Mode::Add => node.super_name = Some(name),
            Mode::Remove if name == "*" || node.super_name.as_deref() == Some(name.as_str()) => {
                node.super_name = Some(OBJECT.to_string());
            }
            _ => {}
        }
    }
    Ok(())
}

fn apply_interfaces(
    class: &PatchClass,
    id: ClassId,
    scope: &PatchScope<'_>,
    class_set: &mut ClassSet,
) -> Result<()> {
    for modifier in class.interfaces.iter().filter(|modifier| modifier.mode != Mode::Match) {
        if modifier.mode == Mode::Remove && modifier.ident.name() == "*" {
            class_node_mut(class_set, id)?.interfaces.clear();
            continue;
        }
        let name = resolve_class_name(class_set, scope, &modifier.ident.to_string())?;
        let node = class_node_mut(class_set, id)?;
        match modifier.mode {
            Mode::Add if !node.interfaces.contains(&name) => node.interfaces.push(name),
            Mode::Remove => node.interfaces.retain(|interface| *interface != name),
            _ => {}
        }
    }
    Ok(())
}

fn apply_field(field: &PatchField, id: ClassId, scope: &mut PatchScope<'_>, class_set: &mut ClassSet) -> Result<()> {
    if field.mode == Mode::Remove {
        let bound = scope
            .get_field(class_set, id, field.ident.name(), &field.desc_raw)
            .ok_or_else(|| PatchError::internal(format!("Unbound field {}", field.ident)))?;
        class_set.remove_field(id, bound);
        return Ok(());
    }

    let desc = updated_type(class_set, scope, &field.desc)?.descriptor();
    let access = if field.is_private { ACC_PRIVATE } else { ACC_PUBLIC } | if field.is_static { ACC_STATIC } else { 0 };
    let name = match scope.get_field(class_set, id, field.ident.name(), &field.desc_raw) {
        Some(bound) if field.ident.is_weak() => class_set.field(bound).name.clone(),
        _ => field.ident.name().to_string(),
    };
    let node = FieldNode {
        value: field.value.clone(),
        ..FieldNode::new(access, name, desc)
    };
    let added = class_set
        .add_field(id, node)
        .ok_or_else(|| PatchError::internal(format!("Cannot add field {}", field.ident)))?;
    scope.put_field(added, field.ident.name(), &field.desc_raw);
    Ok(())
}

fn apply_method(
    method: &PatchMethod,
    id: ClassId,
    scope: &mut PatchScope<'_>,
    class_set: &mut ClassSet,
) -> Result<()> {
    if method.mode == Mode::Add {
        let desc = updated_method_type(class_set, scope, &method.desc)?.descriptor();
        let visibility = if method.is_private {
            ACC_PRIVATE
        } else if method.is_protected {
            ACC_PROTECTED
        } else {
            ACC_PUBLIC
        };
        let access = visibility | if method.is_static { ACC_STATIC } else { 0 };
        let shared = if visibility != ACC_PRIVATE && !method.is_static {
            search_parent(class_set, scope, Some(id), &method.ident, &method.desc_raw)
        } else {
            None
        };
        let name = match shared {
            Some(shared) => class_set.method(shared).name.clone(),
            None => method.ident.name().to_string(),
        };
        let added = class_set
            .add_method(id, MethodNode::new(access, name, desc), shared)
            .ok_or_else(|| PatchError::internal(format!("Cannot add method {}", method.ident)))?;
        scope.put_method(added, method.ident.name(), &method.desc_raw);
    }

    let bound = scope
        .get_method(class_set, id, method.ident.name(), &method.desc_raw)
        .ok_or_else(|| PatchError::internal(format!("Unbound method {}{}", method.ident, method.desc_raw)))?;
    if method.mode == Mode::Remove {
        class_set.remove_method(id, bound);
        return Ok(());
    }

    let (owner, mut node) = class_set
        .method_node(id, bound)
        .map(|(owner, node)| (owner, node.clone()))
        .ok_or_else(|| PatchError::internal(format!("Missing method node for {}", method.ident)))?;
    rewrite_method(method, scope, class_set, &mut node)?;
    let target = class_set
        .method_node_mut(owner, node.id)
        .ok_or_else(|| PatchError::internal(format!("Missing method node for {}", method.ident)))?;
    *target = node;
    Ok(())
}

/// Inherited method that an added `name`+`desc` overrides, searching the
/// superclass chain before interfaces.
fn search_parent(
    class_set: &ClassSet,
    scope: &PatchScope<'_>,
    class: Option<ClassId>,
    ident: &Ident,
    desc: &str,
) -> Option<MethodId> {
    let class = class?;
    if let Some(found) = declared_override(class_set, scope, class, ident, desc) {
        return Some(found);
    }
    let node = &class_set.get(class)?.node;
    let super_class = node.super_name.as_deref().and_then(|name| class_set.lookup(name));
    search_parent(class_set, scope, super_class, ident, desc).or_else(|| {
        node.interfaces
            .iter()
            .find_map(|interface| search_parent(class_set, scope, class_set.lookup(interface), ident, desc))
    })
}

fn declared_override(
    class_set: &ClassSet,
    scope: &PatchScope<'_>,
    class: ClassId,
    ident: &Ident,
    desc: &str,
) -> Option<MethodId> {
    let name = if ident.is_weak() {
        let bound = scope.get_method(class_set, class, ident.name(), desc)?;
        class_set.method(bound).name.clone()
    } else {
        ident.name().to_string()
    };
    let parsed = MethodType::parse(desc).ok()?;
    let mapped = updated_method_type(class_set, scope, &parsed).ok()?.descriptor();
    class_set.get(class)?.methods().iter().copied().find(|method| {
        let wrapper = class_set.method(*method);
        wrapper.name == name && wrapper.desc == mapped
    })
}

/// Rewrite the flags and body of `node` per the patch method, using the
/// instruction map recorded when the method matched.
fn rewrite_method(
    method: &PatchMethod,
    scope: &mut PatchScope<'_>,
    class_set: &ClassSet,
    node: &mut MethodNode,
) -> Result<()> {
    node.access &= !(ACC_STATIC | ACC_PRIVATE | ACC_PROTECTED | ACC_PUBLIC);
    if method.is_static {
        node.access |= ACC_STATIC;
    }
    node.access |= if method.is_private {
        ACC_PRIVATE
    } else if method.is_protected {
        ACC_PROTECTED
    } else {
        ACC_PUBLIC
    };

    let map = scope.instruction_map(node.id).cloned().unwrap_or_default();
    let mut out = node.instructions.clone();
    let mut position = 0usize;
    let mut offset = 0isize;

    for instruction in &method.instructions {
        if instruction.mode == Mode::Add {
            if instruction.instruction == Instruction::TryCatch {
                let mut ctx = CreateContext {
                    class_set,
                    scope: &mut *scope,
                    method: &mut *node,
                };
                let block = try_catch::create_block(&mut ctx, instruction)?;
                node.try_catch_blocks.push(block);
                continue;
            }
            let handler = instruction
                .instruction
                .handler()
                .ok_or_else(|| PatchError::internal(format!("Cannot add {instruction}")))?;
            let mut ctx = CreateContext {
                class_set,
                scope: &mut *scope,
                method: &mut *node,
            };
            let created = handler.create(&mut ctx, instruction)?;
            if position > out.len() {
                return Err(PatchError::internal(format!("Insert position {position} out of range")));
            }
            out.insert(position, created);
            position += 1;
            offset += 1;
            continue;
        }

        match instruction.instruction {
            Instruction::TryCatch => {
                if instruction.mode == Mode::Remove {
                    let mut ctx = CheckContext {
                        class_set,
                        scope: Some(&mut *scope),
                        method: &*node,
                    };
                    let index = try_catch::matching_block(&mut ctx, instruction)
                        .ok_or_else(|| PatchError::internal(format!("No try-catch entry for {instruction}")))?;
                    node.try_catch_blocks.remove(index);
                }
                continue;
            }
            Instruction::Any => continue,
            _ => {}
        }

        let matched = map.get(&instruction.id()).copied().ok_or_else(|| {
            PatchError::internal(format!("No matched position for {instruction} on line {}", instruction.line))
        })?;
        let shifted = matched as isize + offset;
        if instruction.mode == Mode::Remove {
            let index = usize::try_from(shifted)
                .ok()
                .filter(|index| *index < out.len())
                .ok_or_else(|| PatchError::internal(format!("Remove position {shifted} out of range")))?;
            out.remove(index);
            offset -= 1;
        }
        position = usize::try_from(matched as isize + offset + 1)
            .map_err(|_| PatchError::internal(format!("Position {shifted} out of range")))?;
    }

    node.instructions = out;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::check_method;
    use crate::ir::{Constant, Insn, LabelId, TryCatchBlock};
    use crate::logging::StateLogger;
    use crate::opcodes;
    use crate::patch::PatchClasses;

    fn parse(source: &str) -> PatchClasses {
        PatchClasses::parse(source).expect("patch")
    }

    fn class_set() -> ClassSet {
        let mut set = ClassSet::new();
        set.add(
            ClassNode::new(ACC_PUBLIC, "a", Some(OBJECT))
                .with_method(
                    MethodNode::new(ACC_PUBLIC, "run", "()I")
                        .with_body(vec![Insn::Simple(opcodes::ICONST_5), Insn::Simple(opcodes::IRETURN)], Vec::new()),
                )
                .with_method(MethodNode::new(ACC_PUBLIC, "old", "()V"))
                .with_field(FieldNode::new(ACC_PRIVATE, "keep", "I"))
                .with_field(FieldNode::new(ACC_PRIVATE, "drop", "J")),
            false,
        );
        set.add(ClassNode::new(ACC_PUBLIC, "b", Some(OBJECT)), false);
        set.simplify();
        set
    }

    /// Bind `~A` to `a` and match every non-added method with a body.
    fn bound_scope(set: &ClassSet, class: &PatchClass) -> PatchScope<'static> {
        let a = set.lookup("a").expect("a");
        let mut scope = PatchScope::new();
        scope.put_class("A", a);
        for method in class.methods.iter().filter(|method| method.mode != Mode::Add) {
            let concrete = set.find_method(a, method.ident.name(), &method.desc_raw).expect("method");
            scope.put_method(concrete, method.ident.name(), &method.desc_raw);
            let (_, node) = set.method_node(a, concrete).expect("node");
            let mut logger = StateLogger::new(false);
            assert!(check_method(method, &mut logger, set, Some(&mut scope), node));
        }
        for field in class.fields.iter().filter(|field| field.mode != Mode::Add) {
            let concrete = set.find_field(a, field.ident.name(), &field.desc_raw).expect("field");
            scope.put_field(concrete, field.ident.name(), &field.desc_raw);
        }
        scope
    }

    fn body(set: &ClassSet, class: &str, name: &str, desc: &str) -> Vec<Insn> {
        set.by_name(class)
            .and_then(|wrapper| wrapper.node.method(name, desc))
            .map(|method| method.instructions.clone())
            .expect("method body")
    }

    #[test]
    fn replaces_constant_with_compact_push() {
        let mut set = class_set();
        let patch = parse(".class ~A\n.method run ()I\n-push-int 5\n+push-int 10\n.return\n.end-method\n.end-class\n");
        let class = &patch.classes[0];
        let mut scope = bound_scope(&set, class);
        apply_class(class, &mut scope, &mut set).expect("apply");

        assert_eq!(
            body(&set, "a", "run", "()I"),
            vec![
                Insn::Int {
                    opcode: opcodes::BIPUSH,
                    operand: 10,
                },
                Insn::Simple(opcodes::IRETURN),
            ]
        );
    }

    #[test]
    fn inserts_after_matched_instruction() {
        let mut set = class_set();
        let patch = parse(".class ~A\n.method run ()I\n.push-int 5\n+push-int 1\n+add-int\n.return\n.end-method\n.end-class\n");
        let class = &patch.classes[0];
        let mut scope = bound_scope(&set, class);
        apply_class(class, &mut scope, &mut set).expect("apply");

        assert_eq!(
            body(&set, "a", "run", "()I"),
            vec![
                Insn::Simple(opcodes::ICONST_5),
                Insn::Simple(opcodes::ICONST_1),
                Insn::Simple(opcodes::IADD),
                Insn::Simple(opcodes::IRETURN),
            ]
        );
    }

    #[test]
    fn adds_field_with_flags_and_value() {
        let mut set = class_set();
        let patch = parse(".class ~A\n+field count I static private = 0\n.end-class\n");
        let class = &patch.classes[0];
        let mut scope = bound_scope(&set, class);
        apply_class(class, &mut scope, &mut set).expect("apply");

        let a = set.by_name("a").expect("a");
        let field = a.node.field("count", "I").expect("added field");
        assert_eq!(field.access, ACC_PRIVATE | ACC_STATIC);
        assert_eq!(field.value, Some(Constant::Int(0)));
        assert_eq!(a.node.fields.len(), 3);
        assert!(a.node.method("run", "()I").is_some());
    }

    #[test]
    fn removes_fields_and_methods() {
        let mut set = class_set();
        let patch = parse(".class ~A\n-field drop J private\n-method old ()V\n-end-method\n.end-class\n");
        let class = &patch.classes[0];
        let mut scope = bound_scope(&set, class);
        apply_class(class, &mut scope, &mut set).expect("apply");

        let a = set.by_name("a").expect("a");
        assert!(a.node.field("drop", "J").is_none());
        assert!(a.node.field("keep", "I").is_some());
        assert!(a.node.method("old", "()V").is_none());
    }

    #[test]
    fn added_interface_is_abstract() {
        let mut set = class_set();
        let patch = parse("+interface Greeter\n+method greet ()V\n+end-method\n+end-interface\n");
        let mut scope = PatchScope::new();
        apply_class(&patch.classes[0], &mut scope, &mut set).expect("apply");

        let added = set.by_name("Greeter").expect("added");
        assert_eq!(added.node.access, ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT);
        assert_eq!(added.node.super_name.as_deref(), Some(OBJECT));
        assert!(added.node.method("greet", "()V").is_some());
        assert_eq!(scope.get_class("Greeter"), set.lookup("Greeter"));
    }

    #[test]
    fn edits_super_and_interfaces() {
        let mut set = class_set();
        let patch = parse(".class ~A\n+super ~B\n+interface java/lang/Runnable\n.end-class\n");
        let class = &patch.classes[0];
        let mut scope = bound_scope(&set, class);
        scope.put_class("B", set.lookup("b").expect("b"));
        apply_class(class, &mut scope, &mut set).expect("apply");

        let a = set.by_name("a").expect("a");
        assert_eq!(a.node.super_name.as_deref(), Some("b"));
        assert_eq!(a.node.interfaces, vec!["java/lang/Runnable".to_string()]);

        let patch = parse(".class ~A\n-super *\n-interface *\n.end-class\n");
        apply_class(&patch.classes[0], &mut scope, &mut set).expect("apply");
        let a = set.by_name("a").expect("a");
        assert_eq!(a.node.super_name.as_deref(), Some(OBJECT));
        assert!(a.node.interfaces.is_empty());
    }

    #[test]
    fn removed_class_uses_its_binding() {
        let mut set = class_set();
        let patch = parse("-class ~B\n-end-class\n");
        let mut scope = PatchScope::new();
        scope.put_class("B", set.lookup("b").expect("b"));
        apply_class(&patch.classes[0], &mut scope, &mut set).expect("apply");
        assert!(set.lookup("b").is_none());
    }

    #[test]
    fn added_override_shares_the_parent_wrapper() {
        let mut set = class_set();
        set.add(ClassNode::new(ACC_PUBLIC, "c", Some("a")), false);
        let patch = parse(".class C\n+method run ()I\n+push-int 2\n+return\n+end-method\n.end-class\n");
        let mut scope = PatchScope::new();
        scope.put_class("C", set.lookup("c").expect("c"));
        apply_class(&patch.classes[0], &mut scope, &mut set).expect("apply");

        let a = set.lookup("a").expect("a");
        let c = set.lookup("c").expect("c");
        let inherited = set.find_method(a, "run", "()I").expect("run");
        assert!(set.method(inherited).has(c));
        assert_eq!(
            body(&set, "c", "run", "()I"),
            vec![Insn::Simple(opcodes::ICONST_2), Insn::Simple(opcodes::IRETURN)]
        );
    }

    #[test]
    fn try_catch_entries_are_added_and_removed() {
        let mut set = ClassSet::new();
        set.add(
            ClassNode::new(ACC_PUBLIC, "a", Some(OBJECT)).with_method(MethodNode::new(ACC_PUBLIC, "guarded", "()V").with_body(
                vec![
                    Insn::Label(LabelId(0)),
                    Insn::Simple(opcodes::NOP),
                    Insn::Label(LabelId(1)),
                    Insn::Simple(opcodes::RETURN),
                    Insn::Label(LabelId(2)),
                    Insn::Simple(opcodes::RETURN),
                ],
                vec![TryCatchBlock {
                    start: LabelId(0),
                    end: LabelId(1),
                    handler: LabelId(2),
                    catch_type: None,
                }],
            )),
            false,
        );
        let patch = parse(
            ".class ~A\n.method guarded ()V\n-try-catch ~s ~e ~h null\n+try-catch ~s ~e ~h java/lang/Exception\n.any\n.end-method\n.end-class\n",
        );
        let class = &patch.classes[0];
        let mut scope = bound_scope(&set, class);
        apply_class(class, &mut scope, &mut set).expect("apply");

        let method = set
            .by_name("a")
            .and_then(|class| class.node.method("guarded", "()V"))
            .expect("method");
        assert_eq!(
            method.try_catch_blocks,
            vec![TryCatchBlock {
                start: LabelId(0),
                end: LabelId(1),
                handler: LabelId(2),
                catch_type: Some("java/lang/Exception".to_string()),
            }]
        );
        assert_eq!(method.instructions.len(), 6);
    }
}
