//! Rendering concrete classes in patch syntax.

use std::collections::BTreeSet;
use std::fmt::Write;

use crate::classset::ClassSet;
use crate::error::{PatchError, Result};
use crate::instruction::{print_insn, try_catch, LabelNames, PrintContext};
use crate::ir::{ClassNode, Insn, LabelId, MethodNode};
use crate::opcodes::{ACC_ENUM, ACC_INTERFACE};

const MEMBER_INDENT: &str = "    ";
const INSN_INDENT: &str = "        ";

/// Patch source matching `class` exactly, with labels as weak names.
pub fn disassemble(class_set: &ClassSet, class: &str) -> Result<String> {
    let wrapper = class_set
        .by_name(class)
        .ok_or_else(|| PatchError::internal(format!("Unknown class {class}")))?;
    Ok(render_class(&wrapper.node))
}

/// Names of the editable classes of `after` that are new or differ from
/// their counterpart in `before`, in name order.
pub fn changed_classes(before: &ClassSet, after: &ClassSet) -> Vec<String> {
    after
        .class_ids(true)
        .into_iter()
        .filter_map(|id| after.get(id))
        .filter(|wrapper| before.by_name(&wrapper.node.name).map(|old| &old.node) != Some(&wrapper.node))
        .map(|wrapper| wrapper.node.name.clone())
        .collect()
}

fn class_keyword(node: &ClassNode) -> &'static str {
    if node.access & ACC_INTERFACE != 0 {
        "interface"
    } else if node.access & ACC_ENUM != 0 {
        "enum"
    } else {
        "class"
    }
}

fn render_class(node: &ClassNode) -> String {
    let keyword = class_keyword(node);
    let mut out = String::new();
    let _ = writeln!(out, ".{keyword} {}", node.name);
    if let Some(super_name) = &node.super_name {
        let _ = writeln!(out, "{MEMBER_INDENT}.super {super_name}");
    }
    for interface in &node.interfaces {
        let _ = writeln!(out, "{MEMBER_INDENT}.interface {interface}");
    }

    for field in &node.fields {
        let _ = write!(out, "{MEMBER_INDENT}.field {} {}", field.name, field.desc);
        if field.is_static() {
            out.push_str(" static");
        }
        if field.is_private() {
            out.push_str(" private");
        }
        if let Some(value) = &field.value {
            let _ = write!(out, " {}", value.to_patch_literal());
        }
        out.push('\n');
    }
    out.push('\n');

    for method in &node.methods {
        render_method(&mut out, method);
    }
    let _ = writeln!(out, ".end-{keyword}");
    out
}

fn render_method(out: &mut String, method: &MethodNode) {
    let _ = write!(out, "{MEMBER_INDENT}.method {} {}", method.name, method.desc);
    if method.is_static() {
        out.push_str(" static");
    }
    if method.is_private() {
        out.push_str(" private");
    }
    if method.is_protected() {
        out.push_str(" protected");
    }
    out.push('\n');

    let mut labels = LabelNames::new();
    for block in &method.try_catch_blocks {
        let _ = writeln!(out, "{INSN_INDENT}.{}", try_catch::print_block(&mut labels, block));
    }

    let used = used_labels(method);
    for insn in &method.instructions {
        match insn {
            Insn::LineNumber { .. } => continue,
            Insn::Label(label) if !used.contains(label) => continue,
            _ => {}
        }
        let mut ctx = PrintContext {
            method,
            labels: &mut labels,
        };
        match print_insn(&mut ctx, insn) {
            Some(line) => {
                let _ = writeln!(out, "{INSN_INDENT}.{line}");
            }
            None => {
                let _ = writeln!(out, "{INSN_INDENT}// {}", describe(insn));
                let _ = writeln!(out, "{INSN_INDENT}.any");
            }
        }
    }
    let _ = writeln!(out, "{MEMBER_INDENT}.end-method");
    out.push('\n');
}

/// Labels referenced by jumps, switches or try/catch entries.
fn used_labels(method: &MethodNode) -> BTreeSet<LabelId> {
    let mut used: BTreeSet<LabelId> = method
        .instructions
        .iter()
        .flat_map(Insn::referenced_labels)
        .collect();
    for block in &method.try_catch_blocks {
        used.extend([block.start, block.end, block.handler]);
    }
    used
}

fn describe(insn: &Insn) -> String {
    match insn {
        Insn::InvokeDynamic { name, desc } => format!("invokedynamic {name} {desc}"),
        other => format!("unsupported {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, FieldNode, TryCatchBlock};
    use crate::opcodes::{self, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC};
    use crate::patch::PatchClasses;

    fn looping() -> ClassNode {
        ClassNode::new(ACC_PUBLIC, "demo/Loop", Some("java/lang/Object"))
            .with_interface("java/lang/Runnable")
            .with_field({
                let mut field = FieldNode::new(ACC_PRIVATE | ACC_STATIC, "greeting", "Ljava/lang/String;");
                field.value = Some(Constant::String("hi \"you\"".to_string()));
                field
            })
            .with_method(MethodNode::new(ACC_PUBLIC, "run", "()V").with_body(
                vec![
                    Insn::LineNumber {
                        line: 3,
                        start: LabelId(0),
                    },
                    Insn::Label(LabelId(0)),
                    Insn::Simple(opcodes::ICONST_0),
                    Insn::Var {
                        opcode: opcodes::ISTORE,
                        var: 1,
                    },
                    Insn::Label(LabelId(1)),
                    Insn::Iinc { var: 1, incr: 1 },
                    Insn::Var {
                        opcode: opcodes::ILOAD,
                        var: 1,
                    },
                    Insn::Int {
                        opcode: opcodes::BIPUSH,
                        operand: 10,
                    },
                    Insn::Jump {
                        opcode: opcodes::IF_ICMPLT,
                        label: LabelId(1),
                    },
                    Insn::InvokeDynamic {
                        name: "make".to_string(),
                        desc: "()Ljava/lang/Runnable;".to_string(),
                    },
                    Insn::Simple(opcodes::POP),
                    Insn::Label(LabelId(2)),
                    Insn::Simple(opcodes::RETURN),
                    Insn::Label(LabelId(3)),
                    Insn::Simple(opcodes::ATHROW),
                ],
                vec![TryCatchBlock {
                    start: LabelId(1),
                    end: LabelId(2),
                    handler: LabelId(3),
                    catch_type: None,
                }],
            ))
    }

    fn class_set() -> ClassSet {
        let mut set = ClassSet::new();
        set.add(looping(), false);
        set.simplify();
        set
    }

    #[test]
    fn renders_members_and_used_labels_only() {
        let set = class_set();
        let text = disassemble(&set, "demo/Loop").expect("disassemble");
        let expected = "\
.class demo/Loop
    .super java/lang/Object
    .interface java/lang/Runnable
    .field greeting Ljava/lang/String; static private \"hi \\\"you\\\"\"

    .method run ()V
        .try-catch ~label-A ~label-B ~label-C null
        .push-int 0
        .store-int 1
        .label ~label-A
        .inc-int 1 1
        .load-int 1
        .push-int 10
        .if-less-int ~label-A
        // invokedynamic make ()Ljava/lang/Runnable;
        .any
        .pop
        .label ~label-B
        .return
        .label ~label-C
        .throw
    .end-method

.end-class
";
        assert_eq!(text, expected);
    }

    #[test]
    fn disassembly_parses_back() {
        let set = class_set();
        let text = disassemble(&set, "demo/Loop").expect("disassemble");
        let patch = PatchClasses::parse(&text).expect("parse");
        let class = &patch.classes[0];
        assert_eq!(class.ident.name(), "demo/Loop");
        assert_eq!(class.fields[0].value, Some(Constant::String("hi \"you\"".to_string())));
        assert_eq!(class.methods[0].instructions.len(), 14);
    }

    #[test]
    fn changed_classes_lists_edited_and_added_classes() {
        let before = class_set();
        let mut after = before.clone();
        assert!(changed_classes(&before, &after).is_empty());

        after.add(ClassNode::new(ACC_PUBLIC, "demo/Added", Some("java/lang/Object")), false);
        after.add(ClassNode::new(ACC_PUBLIC, "lib/Hidden", Some("java/lang/Object")), true);
        let id = after.lookup("demo/Loop").expect("class");
        after
            .get_mut(id)
            .expect("wrapper")
            .node
            .interfaces
            .clear();

        assert_eq!(changed_classes(&before, &after), vec!["demo/Added", "demo/Loop"]);
    }

    #[test]
    fn interfaces_use_their_keyword() {
        let mut set = ClassSet::new();
        set.add(
            ClassNode::new(ACC_PUBLIC | ACC_INTERFACE, "demo/Api", Some("java/lang/Object")),
            false,
        );
        let text = disassemble(&set, "demo/Api").expect("disassemble");
        assert!(text.starts_with(".interface demo/Api\n"));
        assert!(text.ends_with(".end-interface\n"));
        assert!(disassemble(&set, "demo/Missing").is_err());
    }
}
