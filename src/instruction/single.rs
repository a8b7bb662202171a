use crate::error::{Result, ValidateError};
use crate::instruction::{CheckContext, CreateContext, Instruction, InstructionHandler, PrintContext};
use crate::ir::Insn;
use crate::patch::PatchInstruction;

/// An opcode without operands.
pub(crate) struct Single(pub(crate) u8);

impl InstructionHandler for Single {
    fn check(&self, _ctx: &mut CheckContext<'_, '_>, _instruction: &PatchInstruction, insn: &Insn) -> bool {
        *insn == Insn::Simple(self.0)
    }

    fn create(&self, _ctx: &mut CreateContext<'_, '_>, _instruction: &PatchInstruction) -> Result<Insn> {
        Ok(Insn::Simple(self.0))
    }

    fn print(&self, instruction: Instruction, _ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
        (*insn == Insn::Simple(self.0)).then(|| instruction.name().to_string())
    }

    fn validate(&self, _instruction: &PatchInstruction) -> std::result::Result<(), ValidateError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::instruction::tests::{check, create, instruction, void_method};
    use crate::ir::Insn;
    use crate::opcodes;

    #[test]
    fn matches_only_its_own_opcode() {
        let pop = instruction(".pop");
        let method = void_method();

        assert!(check(&pop, &method, &Insn::Simple(opcodes::POP)));
        assert!(!check(&pop, &method, &Insn::Simple(opcodes::POP2)));
        assert!(!check(
            &pop,
            &method,
            &Insn::Var {
                opcode: opcodes::ILOAD,
                var: 0
            }
        ));
    }

    #[test]
    fn creates_its_opcode() {
        let mut method = void_method();
        assert_eq!(
            create(&instruction("+throw"), &mut method),
            Insn::Simple(opcodes::ATHROW)
        );
    }
}
