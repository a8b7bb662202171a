use crate::check::{check_types, updated_type};
use crate::descriptor::{validate_object_type, JavaType};
use crate::error::{PatchError, Result, ValidateError};
use crate::instruction::{
    expect_params, parse_int, root_class_name, validate_int, CheckContext, CreateContext,
    Instruction, InstructionHandler, PrintContext,
};
use crate::ir::{Constant, Insn};
use crate::opcodes;
use crate::patch::{parse_double, parse_float, quote, unquote, PatchInstruction};

pub(crate) struct PushInt;

/// Value pushed by any of the integer push encodings.
fn pushed_int(insn: &Insn) -> Option<i32> {
    match insn {
        Insn::Ldc(Constant::Int(value)) => Some(*value),
        Insn::Simple(opcode) if (opcodes::ICONST_M1..=opcodes::ICONST_5).contains(opcode) => {
            Some(i32::from(*opcode) - i32::from(opcodes::ICONST_M1) - 1)
        }
        Insn::Int { opcode, operand } if *opcode == opcodes::BIPUSH || *opcode == opcodes::SIPUSH => {
            Some(*operand)
        }
        _ => None,
    }
}

impl InstructionHandler for PushInt {
    fn check(&self, _ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let [param] = instruction.params.as_slice() else {
            return false;
        };
        match pushed_int(insn) {
            Some(value) => param == "*" || param.parse::<i32>() == Ok(value),
            None => false,
        }
    }

    fn create(&self, _ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let value = parse_int(&instruction.params[0])?;
        Ok(match value {
            -1..=5 => Insn::Simple((i32::from(opcodes::ICONST_0) + value) as u8),
            -128..=127 => Insn::Int {
                opcode: opcodes::BIPUSH,
                operand: value,
            },
            -32768..=32767 => Insn::Int {
                opcode: opcodes::SIPUSH,
                operand: value,
            },
            _ => Insn::Ldc(Constant::Int(value)),
        })
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        pushed_int(insn).map(|value| format!("push-int {value}"))
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "push-int")?;
        validate_int(&instruction.params[0])
    }
}

pub(crate) struct PushLong;

fn pushed_long(insn: &Insn) -> Option<i64> {
    match insn {
        Insn::Ldc(Constant::Long(value)) => Some(*value),
        Insn::Simple(opcodes::LCONST_0) => Some(0),
        Insn::Simple(opcodes::LCONST_1) => Some(1),
        _ => None,
    }
}

fn parse_long(param: &str) -> Option<i64> {
    param.strip_suffix(['L', 'l']).unwrap_or(param).parse().ok()
}

impl InstructionHandler for PushLong {
    fn check(&self, _ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let [param] = instruction.params.as_slice() else {
            return false;
        };
        match pushed_long(insn) {
            Some(value) => param == "*" || parse_long(param) == Some(value),
            None => false,
        }
    }

    fn create(&self, _ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let param = &instruction.params[0];
        let value = parse_long(param)
            .ok_or_else(|| PatchError::internal(format!("Invalid number {param}")))?;
        Ok(match value {
            0 => Insn::Simple(opcodes::LCONST_0),
            1 => Insn::Simple(opcodes::LCONST_1),
            _ => Insn::Ldc(Constant::Long(value)),
        })
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        pushed_long(insn).map(|value| format!("push-long {value}"))
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "push-long")?;
        let param = &instruction.params[0];
        if param != "*" && parse_long(param).is_none() {
            return Err(ValidateError::new(format!("Invalid number {param}")));
        }
        Ok(())
    }
}

pub(crate) struct PushFloat;

fn pushed_float(insn: &Insn) -> Option<f32> {
    match insn {
        Insn::Ldc(Constant::Float(value)) => Some(*value),
        Insn::Simple(opcode) if (opcodes::FCONST_0..=opcodes::FCONST_2).contains(opcode) => {
            Some(f32::from(opcode - opcodes::FCONST_0))
        }
        _ => None,
    }
}

impl InstructionHandler for PushFloat {
    fn check(&self, _ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let [param] = instruction.params.as_slice() else {
            return false;
        };
        match pushed_float(insn) {
            Some(value) => {
                param == "*" || parse_float(param).is_some_and(|p| p.to_bits() == value.to_bits())
            }
            None => false,
        }
    }

    fn create(&self, _ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let param = &instruction.params[0];
        let value = parse_float(param)
            .ok_or_else(|| PatchError::internal(format!("Invalid number {param}")))?;
        if (0.0..=2.0).contains(&value) && value.fract() == 0.0 {
            return Ok(Insn::Simple(opcodes::FCONST_0 + value as u8));
        }
        Ok(Insn::Ldc(Constant::Float(value)))
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        pushed_float(insn).map(|value| format!("push-float {value:?}"))
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "push-float")?;
        let param = &instruction.params[0];
        if param != "*" && parse_float(param).is_none() {
            return Err(ValidateError::new(format!("Invalid number {param}")));
        }
        Ok(())
    }
}

pub(crate) struct PushDouble;

fn pushed_double(insn: &Insn) -> Option<f64> {
    match insn {
        Insn::Ldc(Constant::Double(value)) => Some(*value),
        Insn::Simple(opcodes::DCONST_0) => Some(0.0),
        Insn::Simple(opcodes::DCONST_1) => Some(1.0),
        _ => None,
    }
}

impl InstructionHandler for PushDouble {
    fn check(&self, _ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let [param] = instruction.params.as_slice() else {
            return false;
        };
        match pushed_double(insn) {
            Some(value) => {
                param == "*" || parse_double(param).is_some_and(|p| p.to_bits() == value.to_bits())
            }
            None => false,
        }
    }

    fn create(&self, _ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let param = &instruction.params[0];
        let value = parse_double(param)
            .ok_or_else(|| PatchError::internal(format!("Invalid number {param}")))?;
        if value.to_bits() == 0.0f64.to_bits() {
            return Ok(Insn::Simple(opcodes::DCONST_0));
        }
        if value == 1.0 {
            return Ok(Insn::Simple(opcodes::DCONST_1));
        }
        Ok(Insn::Ldc(Constant::Double(value)))
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        pushed_double(insn).map(|value| format!("push-double {value:?}"))
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "push-double")?;
        let param = &instruction.params[0];
        if param != "*" && parse_double(param).is_none() {
            return Err(ValidateError::new(format!("Invalid number {param}")));
        }
        Ok(())
    }
}

/// `ldc` of a string. The patch parser keeps a quoted literal in one
/// parameter, so spacing inside it survives.
pub(crate) struct PushString;

impl InstructionHandler for PushString {
    fn check(&self, _ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let Insn::Ldc(Constant::String(value)) = insn else {
            return false;
        };
        let literal = instruction.params.join(" ");
        literal == "*" || unquote(&literal).as_deref() == Some(value.as_str())
    }

    fn create(&self, _ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let literal = instruction.params.join(" ");
        let value = unquote(&literal)
            .ok_or_else(|| PatchError::internal(format!("Invalid string {literal}")))?;
        Ok(Insn::Ldc(Constant::String(value)))
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::Ldc(Constant::String(value)) => Some(format!("push-string {}", quote(value))),
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        let literal = instruction.params.join(" ");
        if literal == "*" || unquote(&literal).is_some() {
            Ok(())
        } else {
            Err(ValidateError::new("Invalid string"))
        }
    }
}

/// `ldc` of a class literal.
pub(crate) struct PushClass;

impl InstructionHandler for PushClass {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        let Insn::Ldc(Constant::Class(name)) = insn else {
            return false;
        };
        let param = &instruction.params[0];
        if param == "*" {
            return true;
        }
        let class_set = ctx.class_set;
        check_types(
            class_set,
            ctx.scope(),
            &JavaType::from_internal_name(param),
            &JavaType::from_internal_name(name),
        )
    }

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let ty = updated_type(
            ctx.class_set,
            ctx.scope,
            &JavaType::from_internal_name(&instruction.params[0]),
        )?;
        Ok(Insn::Ldc(Constant::Class(ty.internal_name())))
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::Ldc(Constant::Class(name)) => Some(format!("push-class {name}")),
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "push-class")?;
        validate_object_type(&instruction.params[0])
    }

    fn referenced_classes(&self, instruction: &PatchInstruction) -> Vec<String> {
        root_class_name(&JavaType::from_internal_name(&instruction.params[0]))
            .into_iter()
            .collect()
    }
}
