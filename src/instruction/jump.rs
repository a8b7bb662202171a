use crate::descriptor::{JavaType, MethodType};
use crate::error::{Result, ValidateError};
use crate::instruction::{
    check_or_set_label, expect_params, get_label, validate_label, CheckContext, CreateContext,
    Instruction, InstructionHandler, PrintContext,
};
use crate::ir::{Insn, MethodNode};
use crate::opcodes;
use crate::patch::PatchInstruction;

/// Conditional and unconditional branches to a weak label.
pub(crate) struct Jump(pub(crate) u8);

impl InstructionHandler for Jump {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        match insn {
            Insn::Jump { opcode, label } if *opcode == self.0 => {
                let method = ctx.method.id;
                check_or_set_label(ctx.scope(), method, &instruction.params[0], *label)
            }
            _ => false,
        }
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        Ok(Insn::Jump {
            opcode: self.0,
            label: get_label(ctx.scope, ctx.method, &instruction.params[0])?,
        })
    }

    fn print(&self, instruction: Instruction, ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::Jump { opcode, label } if *opcode == self.0 => Some(format!(
                "{} {}",
                instruction.name(),
                ctx.labels.reference(*label)
            )),
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "jump")?;
        validate_label(&instruction.params[0])
    }
}

/// A branch target.
pub(crate) struct Label;

impl InstructionHandler for Label {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        match insn {
            Insn::Label(label) => {
                let method = ctx.method.id;
                check_or_set_label(ctx.scope(), method, &instruction.params[0], *label)
            }
            _ => false,
        }
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        Ok(Insn::Label(get_label(
            ctx.scope,
            ctx.method,
            &instruction.params[0],
        )?))
    }

    fn print(&self, _instruction: Instruction, ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::Label(label) => Some(format!("label {}", ctx.labels.reference(*label))),
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "label")?;
        validate_label(&instruction.params[0])
    }
}

/// The return opcode matching the enclosing method's return type.
pub(crate) struct Return;

fn return_opcode(method: &MethodNode) -> Option<u8> {
    let desc = MethodType::parse(&method.desc).ok()?;
    Some(match desc.ret {
        JavaType::Void => opcodes::RETURN,
        JavaType::Boolean | JavaType::Char | JavaType::Byte | JavaType::Short | JavaType::Int => {
            opcodes::IRETURN
        }
        JavaType::Long => opcodes::LRETURN,
        JavaType::Float => opcodes::FRETURN,
        JavaType::Double => opcodes::DRETURN,
        JavaType::Object(_) | JavaType::Array(_, _) => opcodes::ARETURN,
    })
}

impl InstructionHandler for Return {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, _instruction: &PatchInstruction, insn: &Insn) -> bool {
        matches!(return_opcode(ctx.method), Some(opcode) if *insn == Insn::Simple(opcode))
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, _instruction: &PatchInstruction) -> Result<Insn> {
        let opcode = return_opcode(ctx.method).ok_or_else(|| {
            crate::error::PatchError::internal(format!("Invalid method descriptor {}", ctx.method.desc))
        })?;
        Ok(Insn::Simple(opcode))
    }

    fn print(&self, _instruction: Instruction, ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        matches!(return_opcode(ctx.method), Some(opcode) if *insn == Insn::Simple(opcode))
            .then(|| "return".to_string())
    }

    fn validate(&self, _instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::classset::ClassSet;
    use crate::instruction::tests::{create, instruction, print, validate_error, void_method};
    use crate::instruction::{CheckContext, InstructionHandler};
    use crate::ir::{Insn, LabelId, MethodNode};
    use crate::opcodes;
    use crate::scope::PatchScope;

    use super::{Jump, Label};

    #[test]
    fn jumps_bind_labels_consistently() {
        let class_set = ClassSet::new();
        let method = void_method();
        let mut scope = PatchScope::new();
        let goto = instruction(".goto ~end");
        let handler = Jump(opcodes::GOTO);

        let mut ctx = CheckContext {
            class_set: &class_set,
            scope: Some(&mut scope),
            method: &method,
        };
        let first = Insn::Jump {
            opcode: opcodes::GOTO,
            label: LabelId(4),
        };
        let other = Insn::Jump {
            opcode: opcodes::GOTO,
            label: LabelId(5),
        };
        assert!(handler.check(&mut ctx, &goto, &first));
        assert!(!handler.check(&mut ctx, &goto, &other));
        assert!(Label.check(&mut ctx, &instruction(".label ~end"), &Insn::Label(LabelId(4))));
        assert!(!Label.check(&mut ctx, &instruction(".label ~end"), &Insn::Label(LabelId(5))));
    }

    #[test]
    fn created_jump_and_label_share_a_fresh_label() {
        let mut method = void_method();
        let mut scope = PatchScope::new();
        let class_set = ClassSet::new();
        let body = crate::instruction::tests::instructions("+goto ~skip\n+label ~skip");

        let mut ctx = crate::instruction::CreateContext {
            class_set: &class_set,
            scope: &mut scope,
            method: &mut method,
        };
        let jump = Jump(opcodes::GOTO)
            .create(&mut ctx, &body[0])
            .expect("jump");
        let label = Label.create(&mut ctx, &body[1]).expect("label");

        let Insn::Jump { label: target, .. } = jump else {
            panic!("expected a jump");
        };
        assert_eq!(label, Insn::Label(target));
    }

    #[test]
    fn jump_validation_requires_weak_label() {
        assert_eq!(validate_error(".goto end").message, "Non-weak label end");
        assert_eq!(
            validate_error(".if-null").message,
            "Incorrect number of arguments for jump"
        );
    }

    #[test]
    fn return_follows_method_descriptor() {
        let int_method = MethodNode::new(opcodes::ACC_PUBLIC, "size", "()I");
        assert_eq!(
            print(&int_method, &Insn::Simple(opcodes::IRETURN)).as_deref(),
            Some("return")
        );
        let void = void_method();
        assert_eq!(print(&void, &Insn::Simple(opcodes::IRETURN)), None);

        let mut array_method = MethodNode::new(opcodes::ACC_PUBLIC, "all", "()[I");
        assert_eq!(
            create(&instruction("+return"), &mut array_method),
            Insn::Simple(opcodes::ARETURN)
        );
    }

    #[test]
    fn jumps_print_label_references() {
        let method = void_method();
        assert_eq!(
            print(
                &method,
                &Insn::Jump {
                    opcode: opcodes::IF_ICMPGE,
                    label: LabelId(9)
                }
            )
            .as_deref(),
            Some("if-greater-equal-int ~label-A")
        );
    }
}
