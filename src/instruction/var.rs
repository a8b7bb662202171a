use crate::error::{Result, ValidateError};
use crate::instruction::{
    equal_or_wild, expect_params, parse_int, validate_int, CheckContext, CreateContext,
    Instruction, InstructionHandler, PrintContext,
};
use crate::ir::Insn;
use crate::patch::PatchInstruction;

/// Local variable loads, stores and `ret`.
pub(crate) struct Var(pub(crate) u8);

impl InstructionHandler for Var {
    fn check(&self, _ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        match insn {
            Insn::Var { opcode, var } if *opcode == self.0 => {
                equal_or_wild(&instruction.params[0], i32::from(*var))
            }
            _ => false,
        }
    }

    fn create(&self, _ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        let var = parse_int(&instruction.params[0])?;
        Ok(Insn::Var {
            opcode: self.0,
            var: var as u16,
        })
    }

    fn print(&self, instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::Var { opcode, var } if *opcode == self.0 => {
                Some(format!("{} {var}", instruction.name()))
            }
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 1, "var instruction")?;
        validate_int(&instruction.params[0])
    }
}

/// `iinc var incr`.
pub(crate) struct IntInc;

impl InstructionHandler for IntInc {
    fn check(&self, _ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool {
        match insn {
            Insn::Iinc { var, incr } => {
                equal_or_wild(&instruction.params[0], i32::from(*var))
                    && equal_or_wild(&instruction.params[1], i32::from(*incr))
            }
            _ => false,
        }
    }

    fn create(&self, _ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn> {
        Ok(Insn::Iinc {
            var: parse_int(&instruction.params[0])? as u16,
            incr: parse_int(&instruction.params[1])? as i16,
        })
    }

    fn print(&self, _instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        match insn {
            Insn::Iinc { var, incr } => Some(format!("inc-int {var} {incr}")),
            _ => None,
        }
    }

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        expect_params(instruction, 2, "int-inc")?;
        validate_int(&instruction.params[0])?;
        validate_int(&instruction.params[1])
    }
}

#[cfg(test)]
mod tests {
    use crate::instruction::tests::{check, create, instruction, print, validate_error, void_method};
    use crate::ir::Insn;
    use crate::opcodes;

    #[test]
    fn var_matches_opcode_and_slot() {
        let load = instruction(".load-object 0");
        let method = void_method();

        assert!(check(
            &load,
            &method,
            &Insn::Var {
                opcode: opcodes::ALOAD,
                var: 0
            }
        ));
        assert!(!check(
            &load,
            &method,
            &Insn::Var {
                opcode: opcodes::ALOAD,
                var: 1
            }
        ));
        assert!(!check(
            &load,
            &method,
            &Insn::Var {
                opcode: opcodes::ILOAD,
                var: 0
            }
        ));
        assert!(check(
            &instruction(".store-int *"),
            &method,
            &Insn::Var {
                opcode: opcodes::ISTORE,
                var: 7
            }
        ));
    }

    #[test]
    fn var_prints_catalog_name() {
        let method = void_method();
        assert_eq!(
            print(
                &method,
                &Insn::Var {
                    opcode: opcodes::DSTORE,
                    var: 4
                }
            )
            .as_deref(),
            Some("store-double 4")
        );
        assert_eq!(
            print(
                &method,
                &Insn::Var {
                    opcode: opcodes::RET,
                    var: 2
                }
            )
            .as_deref(),
            Some("ret 2")
        );
    }

    #[test]
    fn int_inc_checks_both_operands() {
        let inc = instruction(".inc-int 1 *");
        let method = void_method();

        assert!(check(&inc, &method, &Insn::Iinc { var: 1, incr: -4 }));
        assert!(!check(&inc, &method, &Insn::Iinc { var: 2, incr: -4 }));

        let mut method = void_method();
        assert_eq!(
            create(&instruction("+inc-int 3 -1"), &mut method),
            Insn::Iinc { var: 3, incr: -1 }
        );
        assert_eq!(
            validate_error(".inc-int 1").message,
            "Incorrect number of arguments for int-inc"
        );
    }
}
