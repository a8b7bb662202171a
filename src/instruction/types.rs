use crate::check::{check_types, updated_type};
use crate::descriptor::{validate_object_type, JavaType};
use crate::error::{PatchError, Result, ValidateError};
use crate::instruction::{
    equal_or_wild, expect_params, parse_int, root_class_name, validate_int, CheckContext, CreateContext,
    Instruction, InstructionHandler, PrintContext,
};
use crate::ir::Insn;
use crate::opcodes;
use crate::patch::PatchInstruction;

/// `new`, `check-cast` and `instance-of` with a class operand.
pub(crate) struct TypeInsn(pub(crate) u8);

impl InstructionHandler for TypeInsn {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let Insn::Type { opcode, desc } = insn else {
            return false;
        };
        if *opcode != self.0 {
            return false;
        }
        let param = &instruction.params[0];
        if param == "*" {
            return true;
        }
        let class_set = ctx.class_set;
        check_types(
            class_set,
            ctx.scope(),
            &JavaType::from_internal_name(param),
            &JavaType::from_internal_name(desc),
        )
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let ty = JavaType::from_internal_name(&instruction.params[0]);
        Ok(Insn::Type {
            opcode: self.0,
            desc: updated_type(ctx.class_set, ctx.scope, &ty)?.internal_name(),
        })
    }

    fn print(&self, instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::Type { opcode, desc } if *opcode == self.0 => Some(format!("{} {desc}", instruction.name())),
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "type instruction")?;
        let param = &instruction.params[0];
        if param == "*" {
            return Ok(());
        }
        validate_object_type(param)
    }

    fn referenced_classes(&self, instruction: &PatchInstruction) -> Vec<String> {
        root_class_name(&JavaType::from_internal_name(&instruction.params[0]))
            .into_iter()
            .collect()
    }
}

/// `newarray` type codes.
fn primitive_array_code(ty: &JavaType) -> Option<i32> {
    Some(match ty {
        JavaType::Boolean => opcodes::T_BOOLEAN,
        JavaType::Char => opcodes::T_CHAR,
        JavaType::Float => opcodes::T_FLOAT,
        JavaType::Double => opcodes::T_DOUBLE,
        JavaType::Byte => opcodes::T_BYTE,
        JavaType::Short => opcodes::T_SHORT,
        JavaType::Int => opcodes::T_INT,
        JavaType::Long => opcodes::T_LONG,
        _ => return None,
    })
}

fn primitive_array_type(code: i32) -> Option<JavaType> {
    Some(match code {
        opcodes::T_BOOLEAN => JavaType::Boolean,
        opcodes::T_CHAR => JavaType::Char,
        opcodes::T_FLOAT => JavaType::Float,
        opcodes::T_DOUBLE => JavaType::Double,
        opcodes::T_BYTE => JavaType::Byte,
        opcodes::T_SHORT => JavaType::Short,
        opcodes::T_INT => JavaType::Int,
        opcodes::T_LONG => JavaType::Long,
        _ => return None,
    })
}

/// One-dimensional array creation. The operand is the element descriptor:
/// primitives map to `newarray`, references to `anewarray`.
pub(crate) struct NewArray;

impl InstructionHandler for NewArray {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let param = &instruction.params[0];
        if param == "*" {
            return matches!(
                insn,
                Insn::Type {
                    opcode: opcodes::ANEWARRAY,
                    ..
                } | Insn::Int {
                    opcode: opcodes::NEWARRAY,
                    ..
                }
            );
        }
        let Ok(expected) = JavaType::parse(param) else {
            return false;
        };
        match (primitive_array_code(&expected), insn) {
            (
                None,
                Insn::Type {
                    opcode: opcodes::ANEWARRAY,
                    desc,
                },
            ) => {
                let class_set = ctx.class_set;
                check_types(class_set, ctx.scope(), &expected, &JavaType::from_internal_name(desc))
            }
            (
                Some(code),
                Insn::Int {
                    opcode: opcodes::NEWARRAY,
                    operand,
                },
            ) => code == *operand,
            _ => false,
        }
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let param = &instruction.params[0];
        let ty = JavaType::parse(param)?;
        if let Some(code) = primitive_array_code(&ty) {
            return Ok(Insn::Int {
                opcode: opcodes::NEWARRAY,
                operand: code,
            });
        }
        if ty == JavaType::Void {
            return Err(PatchError::internal(format!("Invalid type for new-array {param}")));
        }
        Ok(Insn::Type {
            opcode: opcodes::ANEWARRAY,
            desc: updated_type(ctx.class_set, ctx.scope, &ty)?.internal_name(),
        })
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        let element = match insn {
            Insn::Type {
                opcode: opcodes::ANEWARRAY,
                desc,
            } => JavaType::from_internal_name(desc),
            Insn::Int {
                opcode: opcodes::NEWARRAY,
                operand,
            } => primitive_array_type(*operand)?,
            _ => return None,
        };
        Some(format!("new-array {element}"))
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "new-array")?;
        let param = &instruction.params[0];
        if param == "*" {
            return Ok(());
        }
        if JavaType::parse(param)? == JavaType::Void {
            return Err(ValidateError::new(format!("Invalid type for new-array {param}")));
        }
        Ok(())
    }

    fn referenced_classes(&self, instruction: &PatchInstruction) -> Vec<String> {
        JavaType::parse(&instruction.params[0])
            .ok()
            .and_then(|ty| root_class_name(&ty))
            .into_iter()
            .collect()
    }
}

/// `multianewarray`: array descriptor and dimension count.
pub(crate) struct MultiArray;

impl InstructionHandler for MultiArray {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let Insn::MultiANewArray { desc, dims } = insn else {
            return false;
        };
        let [param, dimensions] = instruction.params.as_slice() else {
            return false;
        };
        if !equal_or_wild(dimensions, i32::from(*dims)) {
            return false;
        }
        if param == "*" {
            return true;
        }
        let (Ok(expected), Ok(actual)) = (JavaType::parse(param), JavaType::parse(desc)) else {
            return false;
        };
        let class_set = ctx.class_set;
        check_types(class_set, ctx.scope(), &expected, &actual)
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let ty = JavaType::parse(&instruction.params[0])?;
        let dims = parse_int(&instruction.params[1])?;
        let dims = u8::try_from(dims).map_err(|_| PatchError::internal(format!("Invalid dimensions {dims}")))?;
        Ok(Insn::MultiANewArray {
            desc: updated_type(ctx.class_set, ctx.scope, &ty)?.descriptor(),
            dims,
        })
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::MultiANewArray { desc, dims } => Some(format!("new-array-multi {desc} {dims}")),
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 2, "new-array-multi")?;
        if instruction.params[0] != "*" {
            JavaType::parse(&instruction.params[0])?;
        }
        validate_int(&instruction.params[1])
    }

    fn referenced_classes(&self, instruction: &PatchInstruction) -> Vec<String> {
        JavaType::parse(&instruction.params[0])
            .ok()
            .and_then(|ty| root_class_name(&ty))
            .into_iter()
            .collect()
    }
}
