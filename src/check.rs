//! Structural checks of patch classes against a scope, and the
//! instruction sequence matcher.

use std::collections::BTreeMap;

use crate::classset::{ClassId, ClassSet};
use crate::descriptor::{JavaType, MethodType};
use crate::error::{PatchError, Result};
use crate::instruction::{try_catch, CheckContext, Instruction};
use crate::ir::{ClassNode, Insn, LabelId, MethodNode};
use crate::logging::StateLogger;
use crate::opcodes;
use crate::patch::{ClassKind, Ident, Mode, PatchClass, PatchMethod};
use crate::scope::PatchScope;

/// Whether the concrete type `actual` satisfies the patch type `expected`.
///
/// Sorts must agree. Object names compare after weak resolution through
/// `scope`; an unbound weak name is bound to the concrete class when that
/// class is known and accepted otherwise. Without a scope weak names are not
/// checked at all.
pub(crate) fn check_types(
    class_set: &ClassSet,
    scope: Option<&mut PatchScope<'_>>,
    expected: &JavaType,
    actual: &JavaType,
) -> bool {
    if expected.sort() != actual.sort() {
        return false;
    }
    match (expected, actual) {
        (JavaType::Array(expected_root, expected_dims), JavaType::Array(actual_root, actual_dims)) => {
            expected_dims == actual_dims && check_types(class_set, scope, expected_root, actual_root)
        }
        (JavaType::Object(expected_name), JavaType::Object(actual_name)) => {
            let ident = Ident::new(expected_name);
            if ident.is_wildcard() {
                return true;
            }
            if !ident.is_weak() {
                return ident.name() == actual_name;
            }
            let Some(scope) = scope else {
                return true;
            };
            match scope.get_class(ident.name()) {
                Some(bound) => class_set.name(bound) == actual_name,
                None => {
                    if let Some(class) = class_set.lookup(actual_name) {
                        scope.put_class(ident.name(), class);
                    }
                    true
                }
            }
        }
        _ => expected == actual,
    }
}

/// Concrete name for a patch class name, resolving weak names via `scope`.
pub(crate) fn resolve_class_name(class_set: &ClassSet, scope: &PatchScope<'_>, raw: &str) -> Result<String> {
    let ident = Ident::new(raw);
    if !ident.is_weak() {
        return Ok(ident.name().to_string());
    }
    scope
        .get_class(ident.name())
        .map(|class| class_set.name(class).to_string())
        .ok_or_else(|| PatchError::internal(format!("Unbound class {raw}")))
}

/// `ty` with every weak class name replaced by its bound concrete name.
pub(crate) fn updated_type(class_set: &ClassSet, scope: &PatchScope<'_>, ty: &JavaType) -> Result<JavaType> {
    ty.map_classes(&mut |name: &str| resolve_class_name(class_set, scope, name))
}

pub(crate) fn updated_method_type(
    class_set: &ClassSet,
    scope: &PatchScope<'_>,
    ty: &MethodType,
) -> Result<MethodType> {
    ty.map_classes(&mut |name: &str| resolve_class_name(class_set, scope, name))
}

fn bound_class(logger: &mut StateLogger, scope: &PatchScope<'_>, class: &PatchClass) -> Option<ClassId> {
    let bound = scope.get_class(class.ident.name());
    if bound.is_none() {
        logger.println(format!("No class bound to {}", class.ident));
    }
    bound
}

/// Name, kind, superclass and interfaces of the bound class.
pub fn check_attributes(
    class: &PatchClass,
    logger: &mut StateLogger,
    scope: &mut PatchScope<'_>,
    class_set: &ClassSet,
) -> bool {
    if class.mode == Mode::Add {
        return true;
    }
    let Some(id) = bound_class(logger, scope, class) else {
        return false;
    };
    let Some(wrapper) = class_set.get(id) else {
        return false;
    };
    let node = &wrapper.node;
    logger.println(format!("- {} testing {}", class.ident, node.name));
    logger.indent();
    let ok = check_attributes_of(class, logger, scope, class_set, node);
    logger.unindent();
    ok
}

fn check_attributes_of(
    class: &PatchClass,
    logger: &mut StateLogger,
    scope: &mut PatchScope<'_>,
    class_set: &ClassSet,
    node: &ClassNode,
) -> bool {
    if !class.ident.is_weak() && class.ident.name() != node.name {
        logger.println(format!("Name mis-match {} != {}", class.ident, node.name));
        return false;
    }
    let super_name = node.super_name.as_deref();
    let interfaces = &node.interfaces;

    let mask = match class.kind {
        ClassKind::Class => 0,
        ClassKind::Interface => opcodes::ACC_INTERFACE,
        ClassKind::Enum => opcodes::ACC_ENUM,
    };
    if mask != 0 && node.access & mask == 0 {
        logger.println("Incorrect class type");
        return false;
    }

    for modifier in class.supers.iter().filter(|modifier| modifier.mode != Mode::Add) {
        let ident = &modifier.ident;
        if ident.is_wildcard() {
            continue;
        }
        let expected = if ident.is_weak() {
            match scope.get_class(ident.name()) {
                Some(bound) => Some(class_set.name(bound).to_string()),
                None => {
                    if let Some(parent) = super_name.and_then(|parent| class_set.lookup(parent)) {
                        scope.put_class(ident.name(), parent);
                    }
                    super_name.map(str::to_string)
                }
            }
        } else {
            Some(ident.name().to_string())
        };
        if expected.as_deref() != super_name {
            logger.println(format!(
                "{} != {}",
                expected.as_deref().unwrap_or("<none>"),
                super_name.unwrap_or("<none>")
            ));
            return false;
        }
    }

    'modifiers: for modifier in class.interfaces.iter().filter(|modifier| modifier.mode != Mode::Add) {
        let ident = &modifier.ident;
        if ident.is_wildcard() && !interfaces.is_empty() {
            continue;
        }
        let expected = if ident.is_weak() {
            match scope.get_class(ident.name()) {
                Some(bound) => Some(class_set.name(bound).to_string()),
                None => {
                    match interfaces.iter().find_map(|inter| class_set.lookup(inter)) {
                        Some(inter) => {
                            scope.put_class(ident.name(), inter);
                            Some(class_set.name(inter).to_string())
                        }
                        None => interfaces.first().cloned(),
                    }
                }
            }
        } else {
            Some(ident.name().to_string())
        };
        for inter in interfaces {
            if expected.as_deref() == Some(inter.as_str()) {
                logger.println(format!("{inter} == {inter}"));
                continue 'modifiers;
            }
            logger.println(format!("{} != {inter}", expected.as_deref().unwrap_or(ident.name())));
        }
        logger.println("interface matching failed");
        return false;
    }
    true
}

/// Name, type, modifiers and constant value of every matched field.
pub fn check_fields(
    class: &PatchClass,
    logger: &mut StateLogger,
    scope: &mut PatchScope<'_>,
    class_set: &ClassSet,
) -> bool {
    if class.mode == Mode::Add {
        return true;
    }
    let Some(id) = bound_class(logger, scope, class) else {
        return false;
    };
    logger.println(format!(" - {} testing {}", class.ident, class_set.name(id)));
    logger.indent();
    let ok = class
        .fields
        .iter()
        .filter(|field| field.mode != Mode::Add)
        .all(|field| {
            let Some(field_id) = scope.get_field(class_set, id, field.ident.name(), &field.desc_raw) else {
                logger.println(format!("No field bound to {}", field.ident));
                return false;
            };
            let wrapper = class_set.field(field_id);
            logger.println(format!("- {}", field.ident));
            logger.println(format!(" testing {}", wrapper.name));

            if !field.ident.is_weak() && wrapper.name != field.ident.name() {
                logger.println(format!("Name mis-match {} != {}", field.ident, wrapper.name));
                return false;
            }
            let Ok(desc) = JavaType::parse(&wrapper.desc) else {
                logger.println(format!("Unreadable descriptor {}", wrapper.desc));
                return false;
            };
            if !check_types(class_set, Some(&mut *scope), &field.desc, &desc) {
                logger.println(StateLogger::type_mismatch(&field.desc, &desc));
                return false;
            }
            let Some((_, node)) = class_set.field_node(id, field_id) else {
                logger.println(format!("Missing field node {}", wrapper.name));
                return false;
            };
            if node.is_static() != field.is_static {
                logger.println(if field.is_static { "Required static" } else { "Required non-static" });
                return false;
            }
            if node.is_private() != field.is_private {
                logger.println(if field.is_private { "Required private" } else { "Required non-private" });
                return false;
            }
            if node.value != field.value {
                logger.println(format!("{:?} != {:?}", node.value, field.value));
                return false;
            }
            logger.println("ok");
            true
        });
    logger.unindent();
    ok
}

/// Name and signature of every matched method.
pub fn check_methods(
    class: &PatchClass,
    logger: &mut StateLogger,
    scope: &mut PatchScope<'_>,
    class_set: &ClassSet,
) -> bool {
    if class.mode == Mode::Add {
        return true;
    }
    let Some(id) = bound_class(logger, scope, class) else {
        return false;
    };
    logger.println(format!("- {} testing {}", class.ident, class_set.name(id)));
    logger.indent();
    let ok = class
        .methods
        .iter()
        .filter(|method| method.mode != Mode::Add)
        .all(|method| {
            let Some(method_id) = scope.get_method(class_set, id, method.ident.name(), &method.desc_raw) else {
                logger.println(format!("No method bound to {}{}", method.ident, method.desc_raw));
                return false;
            };
            let wrapper = class_set.method(method_id);
            logger.println(format!("- {}{}", method.ident, method.desc_raw));
            logger.println(format!(" testing {}{}", wrapper.name, wrapper.desc));

            if !method.ident.is_weak() && wrapper.name != method.ident.name() {
                logger.println(format!("Name mis-match {} != {}", method.ident, wrapper.name));
                return false;
            }
            let Ok(desc) = MethodType::parse(&wrapper.desc) else {
                logger.println(format!("Unreadable descriptor {}", wrapper.desc));
                return false;
            };
            if !check_signature(logger, class_set, Some(&mut *scope), &method.desc, &desc) {
                return false;
            }
            logger.println("ok");
            true
        });
    logger.unindent();
    ok
}

/// Instruction bodies of every matched method.
pub fn check_method_instructions(
    class: &PatchClass,
    logger: &mut StateLogger,
    scope: &mut PatchScope<'_>,
    class_set: &ClassSet,
) -> bool {
    let Some(id) = bound_class(logger, scope, class) else {
        return false;
    };
    logger.println(format!("- {} testing {}", class.ident, class_set.name(id)));
    logger.indent();
    let ok = class
        .methods
        .iter()
        .filter(|method| method.mode != Mode::Add)
        .all(|method| {
            let Some(method_id) = scope.get_method(class_set, id, method.ident.name(), &method.desc_raw) else {
                logger.println(format!("No method bound to {}{}", method.ident, method.desc_raw));
                return false;
            };
            let wrapper = class_set.method(method_id);
            logger.println(format!(
                "- {}{} testing {}{} instructions",
                method.ident, method.desc_raw, wrapper.name, wrapper.desc
            ));
            let Some((_, node)) = class_set.method_node(id, method_id) else {
                logger.println(format!("Missing method node {}", wrapper.name));
                return false;
            };
            check_method(method, logger, class_set, Some(&mut *scope), node)
        });
    logger.unindent();
    ok
}

/// All four checks in order, stopping at the first failure.
pub fn check_class(
    class: &PatchClass,
    logger: &mut StateLogger,
    scope: &mut PatchScope<'_>,
    class_set: &ClassSet,
) -> bool {
    check_attributes(class, logger, scope, class_set)
        && check_fields(class, logger, scope, class_set)
        && check_methods(class, logger, scope, class_set)
        && check_method_instructions(class, logger, scope, class_set)
}

fn check_signature(
    logger: &mut StateLogger,
    class_set: &ClassSet,
    mut scope: Option<&mut PatchScope<'_>>,
    expected: &MethodType,
    actual: &MethodType,
) -> bool {
    if expected.args.len() != actual.args.len() {
        logger.println(format!(
            "Argument size mis-match {} != {}",
            expected.args.len(),
            actual.args.len()
        ));
        return false;
    }
    for (expected, actual) in expected.args.iter().zip(&actual.args) {
        if !check_types(class_set, scope.as_deref_mut(), expected, actual) {
            logger.println(StateLogger::type_mismatch(expected, actual));
            return false;
        }
    }
    if !check_types(class_set, scope, &expected.ret, &actual.ret) {
        logger.println(StateLogger::type_mismatch(&expected.ret, &actual.ret));
        return false;
    }
    true
}

/// Check a patch method against a concrete method body.
///
/// With a scope, weak names and labels bind as they are first seen and on
/// success the patch-to-concrete instruction map is stored. A failed check
/// leaves no labels or instruction map behind for `node`.
pub fn check_method(
    method: &PatchMethod,
    logger: &mut StateLogger,
    class_set: &ClassSet,
    mut scope: Option<&mut PatchScope<'_>>,
    node: &MethodNode,
) -> bool {
    let matched = if check_method_header(method, logger, class_set, scope.as_deref_mut(), node) {
        logger.indent();
        let map = match_instructions(method, logger, class_set, scope.as_deref_mut(), node);
        logger.unindent();
        map
    } else {
        None
    };

    match (matched, scope) {
        (Some(map), Some(scope)) => {
            scope.put_instruction_map(node.id, map);
            logger.println("ok");
            true
        }
        (Some(_), None) => {
            logger.println("ok");
            true
        }
        (None, Some(scope)) => {
            scope.clear_labels(node.id);
            scope.clear_instructions(node.id);
            false
        }
        (None, None) => false,
    }
}

fn check_method_header(
    method: &PatchMethod,
    logger: &mut StateLogger,
    class_set: &ClassSet,
    scope: Option<&mut PatchScope<'_>>,
    node: &MethodNode,
) -> bool {
    if !method.ident.is_weak() && !method.ident.is_wildcard() && node.name != method.ident.name() {
        logger.println(format!("Name mis-match {} != {}", method.ident, node.name));
        return false;
    }
    let Ok(desc) = MethodType::parse(&node.desc) else {
        logger.println(format!("Unreadable descriptor {}", node.desc));
        return false;
    };
    if !check_signature(logger, class_set, scope, &method.desc, &desc) {
        return false;
    }
    if node.is_static() != method.is_static {
        logger.println(if method.is_static { "Required static" } else { "Required non-static" });
        return false;
    }
    if node.is_private() != method.is_private {
        logger.println(if method.is_private { "Required private" } else { "Required non-private" });
        return false;
    }
    if node.is_protected() != method.is_protected {
        logger.println(if method.is_protected { "Required protected" } else { "Required non-protected" });
        return false;
    }
    true
}

/// Align the patch instructions with the concrete body.
///
/// `any` absorbs a run of concrete instructions. When a fixed instruction
/// fails outside a wildcard run, matching resumes one position past the last
/// instruction the most recent wildcard stopped at.
fn match_instructions(
    method: &PatchMethod,
    logger: &mut StateLogger,
    class_set: &ClassSet,
    mut scope: Option<&mut PatchScope<'_>>,
    node: &MethodNode,
) -> Option<BTreeMap<usize, usize>> {
    let instructions = &method.instructions;
    let insns = &node.instructions;
    let mut map = BTreeMap::new();
    let mut position = 0;
    let mut wildcard = false;
    // (concrete position, patch index, labels bound at that point)
    let mut checkpoint: Option<(usize, usize, BTreeMap<String, LabelId>)> = None;
    let mut i = 0;

    'patch: while i < instructions.len() {
        let instruction = &instructions[i];
        if instruction.mode == Mode::Add {
            i += 1;
            continue;
        }
        if instruction.instruction == Instruction::Any {
            logger.println(format!("{i}: Wild-card"));
            wildcard = true;
            checkpoint = None;
            if instructions[i + 1..].iter().all(|rest| rest.mode == Mode::Add) {
                position = insns.len();
            }
            i += 1;
            continue;
        }
        if instruction.instruction == Instruction::TryCatch {
            let mut ctx = CheckContext {
                class_set,
                scope: scope.as_deref_mut(),
                method: node,
            };
            if !try_catch::matches_block(&mut ctx, instruction) {
                logger.println(format!("{i}: {instruction} found no try-catch block"));
                return None;
            }
            logger.println(format!("{i}: {instruction} succeeded"));
            i += 1;
            continue;
        }
        let Some(handler) = instruction.instruction.handler() else {
            return None;
        };

        loop {
            let Some(insn) = insns.get(position) else {
                if !wildcard {
                    logger.println("Not enough instructions");
                }
                return None;
            };
            let considered = match insn {
                Insn::LineNumber { .. } => false,
                Insn::Label(_) => instruction.instruction == Instruction::Label,
                _ => true,
            };
            if considered {
                let labels_before = match (&scope, wildcard) {
                    (Some(scope), true) => scope.labels_of(node.id),
                    _ => BTreeMap::new(),
                };
                let mut ctx = CheckContext {
                    class_set,
                    scope: scope.as_deref_mut(),
                    method: node,
                };
                if handler.check(&mut ctx, instruction, insn) {
                    logger.println_with(|| format!("{i}: {instruction} succeeded on {insn:?}"));
                    if wildcard {
                        checkpoint = Some((position, i, labels_before));
                        logger.println("(Saving wildcard state)");
                    }
                    map.insert(instruction.id(), position);
                    wildcard = false;
                    position += 1;
                    i += 1;
                    continue 'patch;
                }
                logger.println_with(|| format!("{i}: {instruction} failed on {insn:?}"));
                if !wildcard {
                    let Some((saved_position, saved_index, labels)) = checkpoint.take() else {
                        logger.println("Failed");
                        return None;
                    };
                    logger.println("Rolling back to the last wildcard");
                    if let Some(scope) = scope.as_deref_mut() {
                        scope.restore_labels(node.id, labels.clone());
                    }
                    wildcard = true;
                    position = saved_position + 1;
                    i = saved_index;
                    checkpoint = Some((position, saved_index, labels));
                    continue 'patch;
                }
                logger.println("Continuing because of wild-card");
            }
            position += 1;
        }
    }

    let trailing = insns[position.min(insns.len())..]
        .iter()
        .any(|insn| !matches!(insn, Insn::LineNumber { .. } | Insn::Label(_)));
    if trailing {
        logger.println("Too many instructions");
        return None;
    }
    Some(map)
}
