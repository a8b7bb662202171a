//! The closed catalog of patch instructions and their handlers.
//!
//! Every catalog entry dispatches to a handler that knows how to check a
//! patch instruction against a concrete one, create the concrete
//! instruction for an addition, print a concrete instruction in patch
//! syntax and validate the instruction's parameters at parse time.

use std::collections::BTreeMap;

use crate::classset::ClassSet;
use crate::descriptor::JavaType;
use crate::error::{PatchError, Result, ValidateError};
use crate::ir::{Insn, LabelId, MethodNode, NodeId};
use crate::opcodes;
use crate::patch::{Ident, PatchInstruction};
use crate::scope::PatchScope;

mod jump;
mod member;
mod push;
mod single;
mod switch;
pub(crate) mod try_catch;
mod types;
mod var;

use jump::{Jump, Label, Return};
use member::{FieldAccess, Invoke};
use push::{PushClass, PushDouble, PushFloat, PushInt, PushLong, PushString};
use single::Single;
use switch::{LookupSwitch, TableSwitch};
use try_catch::TryCatch;
use types::{MultiArray, NewArray, TypeInsn};
use var::{IntInc, Var};

/// State available while checking a patch instruction against a concrete one.
pub struct CheckContext<'a, 's> {
    pub class_set: &'a ClassSet,
    pub scope: Option<&'a mut PatchScope<'s>>,
    pub method: &'a MethodNode,
}

impl<'s> CheckContext<'_, 's> {
    pub(crate) fn scope(&mut self) -> Option<&mut PatchScope<'s>> {
        self.scope.as_deref_mut()
    }
}

/// State available while creating a concrete instruction for an addition.
pub struct CreateContext<'a, 's> {
    pub class_set: &'a ClassSet,
    pub scope: &'a mut PatchScope<'s>,
    pub method: &'a mut MethodNode,
}

/// Per-method printing state.
pub struct PrintContext<'a> {
    pub method: &'a MethodNode,
    pub labels: &'a mut LabelNames,
}

/// A class member named by a patch instruction, in patch terms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberReference {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

pub trait InstructionHandler: Sync {
    fn check(&self, ctx: &mut CheckContext<'_, '_>, instruction: &PatchInstruction, insn: &Insn) -> bool;

    fn create(&self, ctx: &mut CreateContext<'_, '_>, instruction: &PatchInstruction) -> Result<Insn>;

    /// Render `insn` in patch syntax (without the mode character) when this
    /// handler covers it.
    fn print(&self, instruction: Instruction, ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String>;

    fn validate(&self, instruction: &PatchInstruction) -> std::result::Result<(), ValidateError>;

    /// Whether the instruction reads metadata lines up to its end marker.
    fn requires_meta(&self) -> bool {
        false
    }

    fn referenced_classes(&self, _instruction: &PatchInstruction) -> Vec<String> {
        Vec::new()
    }

    fn referenced_methods(&self, _instruction: &PatchInstruction) -> Vec<MemberReference> {
        Vec::new()
    }

    fn referenced_fields(&self, _instruction: &PatchInstruction) -> Vec<MemberReference> {
        Vec::new()
    }
}

macro_rules! catalog {
    ($($variant:ident($name:literal) => $handler:expr,)*) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Instruction {
            $($variant,)*
        }

        impl Instruction {
            /// Every instruction, in printing priority order.
            pub const ALL: &'static [Instruction] = &[$(Instruction::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Instruction::$variant => $name,)*
                }
            }

            /// Look up by patch name, ignoring case and treating `_` as `-`.
            pub fn from_name(name: &str) -> Option<Self> {
                let name = name.to_lowercase().replace('_', "-");
                match name.as_str() {
                    $($name => Some(Instruction::$variant),)*
                    _ => None,
                }
            }

            /// Handler for this instruction; `None` for the `any` wildcard.
            pub fn handler(self) -> Option<&'static dyn InstructionHandler> {
                match self {
                    $(Instruction::$variant => $handler,)*
                }
            }
        }
    };
}

catalog! {
    Any("any") => None,
    Label("label") => Some(&Label),
    Nop("nop") => Some(&Single(opcodes::NOP)),
    PushNull("push-null") => Some(&Single(opcodes::ACONST_NULL)),
    PushInt("push-int") => Some(&PushInt),
    PushLong("push-long") => Some(&PushLong),
    PushFloat("push-float") => Some(&PushFloat),
    PushDouble("push-double") => Some(&PushDouble),
    TryCatch("try-catch") => Some(&TryCatch),
    PushString("push-string") => Some(&PushString),
    PushClass("push-class") => Some(&PushClass),

    LoadInt("load-int") => Some(&Var(opcodes::ILOAD)),
    LoadLong("load-long") => Some(&Var(opcodes::LLOAD)),
    LoadFloat("load-float") => Some(&Var(opcodes::FLOAD)),
    LoadDouble("load-double") => Some(&Var(opcodes::DLOAD)),
    LoadObject("load-object") => Some(&Var(opcodes::ALOAD)),
    ArrayLoadInt("array-load-int") => Some(&Single(opcodes::IALOAD)),
    ArrayLoadLong("array-load-long") => Some(&Single(opcodes::LALOAD)),
    ArrayLoadFloat("array-load-float") => Some(&Single(opcodes::FALOAD)),
    ArrayLoadDouble("array-load-double") => Some(&Single(opcodes::DALOAD)),
    ArrayLoadObject("array-load-object") => Some(&Single(opcodes::AALOAD)),
    ArrayLoadByte("array-load-byte") => Some(&Single(opcodes::BALOAD)),
    ArrayLoadChar("array-load-char") => Some(&Single(opcodes::CALOAD)),
    ArrayLoadShort("array-load-short") => Some(&Single(opcodes::SALOAD)),

    StoreInt("store-int") => Some(&Var(opcodes::ISTORE)),
    StoreLong("store-long") => Some(&Var(opcodes::LSTORE)),
    StoreFloat("store-float") => Some(&Var(opcodes::FSTORE)),
    StoreDouble("store-double") => Some(&Var(opcodes::DSTORE)),
    StoreObject("store-object") => Some(&Var(opcodes::ASTORE)),
    ArrayStoreInt("array-store-int") => Some(&Single(opcodes::IASTORE)),
    ArrayStoreLong("array-store-long") => Some(&Single(opcodes::LASTORE)),
    ArrayStoreFloat("array-store-float") => Some(&Single(opcodes::FASTORE)),
    ArrayStoreDouble("array-store-double") => Some(&Single(opcodes::DASTORE)),
    ArrayStoreObject("array-store-object") => Some(&Single(opcodes::AASTORE)),
    ArrayStoreByte("array-store-byte") => Some(&Single(opcodes::BASTORE)),
    ArrayStoreChar("array-store-char") => Some(&Single(opcodes::CASTORE)),
    ArrayStoreShort("array-store-short") => Some(&Single(opcodes::SASTORE)),

    Pop("pop") => Some(&Single(opcodes::POP)),
    Pop2("pop2") => Some(&Single(opcodes::POP2)),
    Dup("dup") => Some(&Single(opcodes::DUP)),
    DupX1("dup-x1") => Some(&Single(opcodes::DUP_X1)),
    DupX2("dup-x2") => Some(&Single(opcodes::DUP_X2)),
    Dup2("dup2") => Some(&Single(opcodes::DUP2)),
    Dup2X1("dup2-x1") => Some(&Single(opcodes::DUP2_X1)),
    Dup2X2("dup2-x2") => Some(&Single(opcodes::DUP2_X2)),
    Swap("swap") => Some(&Single(opcodes::SWAP)),

    AddInt("add-int") => Some(&Single(opcodes::IADD)),
    AddLong("add-long") => Some(&Single(opcodes::LADD)),
    AddFloat("add-float") => Some(&Single(opcodes::FADD)),
    AddDouble("add-double") => Some(&Single(opcodes::DADD)),
    SubInt("sub-int") => Some(&Single(opcodes::ISUB)),
    SubLong("sub-long") => Some(&Single(opcodes::LSUB)),
    SubFloat("sub-float") => Some(&Single(opcodes::FSUB)),
    SubDouble("sub-double") => Some(&Single(opcodes::DSUB)),
    MulInt("mul-int") => Some(&Single(opcodes::IMUL)),
    MulLong("mul-long") => Some(&Single(opcodes::LMUL)),
    MulFloat("mul-float") => Some(&Single(opcodes::FMUL)),
    MulDouble("mul-double") => Some(&Single(opcodes::DMUL)),
    DivInt("div-int") => Some(&Single(opcodes::IDIV)),
    DivLong("div-long") => Some(&Single(opcodes::LDIV)),
    DivFloat("div-float") => Some(&Single(opcodes::FDIV)),
    DivDouble("div-double") => Some(&Single(opcodes::DDIV)),
    RemInt("rem-int") => Some(&Single(opcodes::IREM)),
    RemLong("rem-long") => Some(&Single(opcodes::LREM)),
    RemFloat("rem-float") => Some(&Single(opcodes::FREM)),
    RemDouble("rem-double") => Some(&Single(opcodes::DREM)),
    NegInt("neg-int") => Some(&Single(opcodes::INEG)),
    NegLong("neg-long") => Some(&Single(opcodes::LNEG)),
    NegFloat("neg-float") => Some(&Single(opcodes::FNEG)),
    NegDouble("neg-double") => Some(&Single(opcodes::DNEG)),
    ShiftLeftInt("shift-left-int") => Some(&Single(opcodes::ISHL)),
    ShiftLeftLong("shift-left-long") => Some(&Single(opcodes::LSHL)),
    ShiftRightInt("shift-right-int") => Some(&Single(opcodes::ISHR)),
    ShiftRightLong("shift-right-long") => Some(&Single(opcodes::LSHR)),
    UShiftRightInt("ushift-right-int") => Some(&Single(opcodes::IUSHR)),
    UShiftRightLong("ushift-right-long") => Some(&Single(opcodes::LUSHR)),
    AndInt("and-int") => Some(&Single(opcodes::IAND)),
    AndLong("and-long") => Some(&Single(opcodes::LAND)),
    OrInt("or-int") => Some(&Single(opcodes::IOR)),
    OrLong("or-long") => Some(&Single(opcodes::LOR)),
    XorInt("xor-int") => Some(&Single(opcodes::IXOR)),
    XorLong("xor-long") => Some(&Single(opcodes::LXOR)),
    IncInt("inc-int") => Some(&IntInc),

    ConvertIntLong("convert-int-long") => Some(&Single(opcodes::I2L)),
    ConvertIntFloat("convert-int-float") => Some(&Single(opcodes::I2F)),
    ConvertIntDouble("convert-int-double") => Some(&Single(opcodes::I2D)),
    ConvertLongInt("convert-long-int") => Some(&Single(opcodes::L2I)),
    ConvertLongFloat("convert-long-float") => Some(&Single(opcodes::L2F)),
    ConvertLongDouble("convert-long-double") => Some(&Single(opcodes::L2D)),
    ConvertFloatInt("convert-float-int") => Some(&Single(opcodes::F2I)),
    ConvertFloatLong("convert-float-long") => Some(&Single(opcodes::F2L)),
    ConvertFloatDouble("convert-float-double") => Some(&Single(opcodes::F2D)),
    ConvertDoubleInt("convert-double-int") => Some(&Single(opcodes::D2I)),
    ConvertDoubleLong("convert-double-long") => Some(&Single(opcodes::D2L)),
    ConvertDoubleFloat("convert-double-float") => Some(&Single(opcodes::D2F)),
    ConvertIntByte("convert-int-byte") => Some(&Single(opcodes::I2B)),
    ConvertIntChar("convert-int-char") => Some(&Single(opcodes::I2C)),
    ConvertIntShort("convert-int-short") => Some(&Single(opcodes::I2S)),

    CompareLong("compare-long") => Some(&Single(opcodes::LCMP)),
    CompareFloat("compare-float") => Some(&Single(opcodes::FCMPL)),
    CompareFloatInv("compare-float-inv") => Some(&Single(opcodes::FCMPG)),
    CompareDouble("compare-double") => Some(&Single(opcodes::DCMPL)),
    CompareDoubleInv("compare-double-inv") => Some(&Single(opcodes::DCMPG)),

    IfZero("if-zero") => Some(&Jump(opcodes::IFEQ)),
    IfNotZero("if-not-zero") => Some(&Jump(opcodes::IFNE)),
    IfLessZero("if-less-zero") => Some(&Jump(opcodes::IFLT)),
    IfGreaterEqualZero("if-greater-equal-zero") => Some(&Jump(opcodes::IFGE)),
    IfGreaterZero("if-greater-zero") => Some(&Jump(opcodes::IFGT)),
    IfLessEqualZero("if-less-equal-zero") => Some(&Jump(opcodes::IFLE)),
    IfEqualInt("if-equal-int") => Some(&Jump(opcodes::IF_ICMPEQ)),
    IfNotEqualInt("if-not-equal-int") => Some(&Jump(opcodes::IF_ICMPNE)),
    IfLessInt("if-less-int") => Some(&Jump(opcodes::IF_ICMPLT)),
    IfGreaterEqualInt("if-greater-equal-int") => Some(&Jump(opcodes::IF_ICMPGE)),
    IfGreaterInt("if-greater-int") => Some(&Jump(opcodes::IF_ICMPGT)),
    IfLessEqualInt("if-less-equal-int") => Some(&Jump(opcodes::IF_ICMPLE)),
    IfEqualObject("if-equal-object") => Some(&Jump(opcodes::IF_ACMPEQ)),
    IfNotEqualObject("if-not-equal-object") => Some(&Jump(opcodes::IF_ACMPNE)),
    Goto("goto") => Some(&Jump(opcodes::GOTO)),
    Jsr("jsr") => Some(&Jump(opcodes::JSR)),
    Ret("ret") => Some(&Var(opcodes::RET)),
    SwitchTable("switch-table") => Some(&TableSwitch),
    SwitchLookup("switch-lookup") => Some(&LookupSwitch),
    Return("return") => Some(&Return),

    GetStatic("get-static") => Some(&FieldAccess(opcodes::GETSTATIC)),
    PutStatic("put-static") => Some(&FieldAccess(opcodes::PUTSTATIC)),
    GetField("get-field") => Some(&FieldAccess(opcodes::GETFIELD)),
    PutField("put-field") => Some(&FieldAccess(opcodes::PUTFIELD)),
    InvokeVirtual("invoke-virtual") => Some(&Invoke(opcodes::INVOKEVIRTUAL)),
    InvokeSpecial("invoke-special") => Some(&Invoke(opcodes::INVOKESPECIAL)),
    InvokeStatic("invoke-static") => Some(&Invoke(opcodes::INVOKESTATIC)),
    InvokeInterface("invoke-interface") => Some(&Invoke(opcodes::INVOKEINTERFACE)),

    New("new") => Some(&TypeInsn(opcodes::NEW)),
    NewArray("new-array") => Some(&NewArray),
    LengthArray("length-array") => Some(&Single(opcodes::ARRAYLENGTH)),
    Throw("throw") => Some(&Single(opcodes::ATHROW)),
    CheckCast("check-cast") => Some(&TypeInsn(opcodes::CHECKCAST)),
    InstanceOf("instance-of") => Some(&TypeInsn(opcodes::INSTANCEOF)),
    MonitorEnter("monitor-enter") => Some(&Single(opcodes::MONITORENTER)),
    MonitorExit("monitor-exit") => Some(&Single(opcodes::MONITOREXIT)),
    NewArrayMulti("new-array-multi") => Some(&MultiArray),
    IfNull("if-null") => Some(&Jump(opcodes::IFNULL)),
    IfNotNull("if-not-null") => Some(&Jump(opcodes::IFNONNULL)),
}

impl Instruction {
    pub fn requires_meta(self) -> bool {
        self.handler().is_some_and(|handler| handler.requires_meta())
    }
}

/// Render a concrete instruction with the first handler that covers it.
pub fn print_insn(ctx: &mut PrintContext<'_>, insn: &Insn) -> Option<String> {
    Instruction::ALL.iter().find_map(|instruction| {
        instruction
            .handler()
            .and_then(|handler| handler.print(*instruction, ctx, insn))
    })
}

/// Check a label against the scope, binding weak labels on first use.
/// Strong label names never match; `*` always does.
pub(crate) fn check_or_set_label(
    scope: Option<&mut PatchScope<'_>>,
    method: NodeId,
    name: &str,
    label: LabelId,
) -> bool {
    let ident = Ident::new(name);
    if ident.is_wildcard() {
        return true;
    }
    if !ident.is_weak() {
        return false;
    }
    let Some(scope) = scope else {
        return true;
    };
    match scope.label(method, ident.name()) {
        Some(bound) => bound == label,
        None => {
            scope.put_label(method, ident.name(), label);
            true
        }
    }
}

/// Bound label for a weak name, allocating a fresh one in `method` if unbound.
pub(crate) fn get_label(scope: &mut PatchScope<'_>, method: &mut MethodNode, name: &str) -> Result<LabelId> {
    let ident = Ident::new(name);
    if !ident.is_weak() {
        return Err(PatchError::internal(format!("Non-weak label {name}")));
    }
    if let Some(label) = scope.label(method.id, ident.name()) {
        return Ok(label);
    }
    let label = method.new_label();
    scope.put_label(method.id, ident.name(), label);
    Ok(label)
}

pub(crate) fn validate_label(param: &str) -> std::result::Result<(), ValidateError> {
    if param == "*" || Ident::new(param).is_weak() {
        Ok(())
    } else {
        Err(ValidateError::new(format!("Non-weak label {param}")))
    }
}

pub(crate) fn validate_int(param: &str) -> std::result::Result<(), ValidateError> {
    if param == "*" || param.parse::<i32>().is_ok() {
        Ok(())
    } else {
        Err(ValidateError::new(format!("Invalid number {param}")))
    }
}

pub(crate) fn expect_params(
    instruction: &PatchInstruction,
    count: usize,
    what: &str,
) -> std::result::Result<(), ValidateError> {
    if instruction.params.len() == count {
        Ok(())
    } else {
        Err(ValidateError::new(format!(
            "Incorrect number of arguments for {what}"
        )))
    }
}

/// Class name of the root element type, without the weak marker, unless it
/// is primitive or the wildcard.
pub(crate) fn root_class_name(ty: &JavaType) -> Option<String> {
    let ident = Ident::new(ty.root().class_name()?);
    (!ident.is_wildcard()).then(|| ident.name().to_string())
}

/// `*` or an integer equal to `value`.
pub(crate) fn equal_or_wild(param: &str, value: i32) -> bool {
    param == "*" || param.parse::<i32>() == Ok(value)
}

pub(crate) fn parse_int(param: &str) -> Result<i32> {
    param
        .parse()
        .map_err(|_| PatchError::internal(format!("Invalid number {param}")))
}

/// Names labels `label-A`, `label-B`, ... in first-use order while one
/// method is printed.
#[derive(Debug, Default)]
pub struct LabelNames {
    names: BTreeMap<LabelId, String>,
}

impl LabelNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&mut self, label: LabelId) -> String {
        let next = self.names.len();
        self.names
            .entry(label)
            .or_insert_with(|| format!("label-{}", letters(next)))
            .clone()
    }

    /// Weak reference form used in printed instructions.
    pub fn reference(&mut self, label: LabelId) -> String {
        format!("~{}", self.name(label))
    }

    pub fn is_named(&self, label: LabelId) -> bool {
        self.names.contains_key(&label)
    }
}

/// Spreadsheet-style column name: `A`..`Z`, then `AA`, `AB`, ...
fn letters(mut index: usize) -> String {
    let mut out = Vec::new();
    loop {
        out.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::opcodes::ACC_PUBLIC;
    use crate::patch::{Mode, PatchClasses};

    /// First instruction of a one-method patch wrapped around `body`.
    pub(crate) fn instruction(body: &str) -> PatchInstruction {
        instructions(body).remove(0)
    }

    pub(crate) fn instructions(body: &str) -> Vec<PatchInstruction> {
        let source = format!(".class A\n.method m ()V\n{body}\n.end-method\n.end-class\n");
        let patch = PatchClasses::parse(&source).expect("patch");
        patch.classes[0].methods[0].instructions.clone()
    }

    pub(crate) fn validate_error(body: &str) -> ValidateError {
        let source = format!(".class A\n.method m ()V\n{body}\n.end-method\n.end-class\n");
        PatchClasses::parse(&source).expect_err("instruction should be rejected")
    }

    pub(crate) fn check(instruction: &PatchInstruction, method: &MethodNode, insn: &Insn) -> bool {
        let class_set = ClassSet::new();
        let mut ctx = CheckContext {
            class_set: &class_set,
            scope: None,
            method,
        };
        handler(instruction).check(&mut ctx, instruction, insn)
    }

    pub(crate) fn create(instruction: &PatchInstruction, method: &mut MethodNode) -> Insn {
        let class_set = ClassSet::new();
        let mut scope = PatchScope::new();
        let mut ctx = CreateContext {
            class_set: &class_set,
            scope: &mut scope,
            method,
        };
        handler(instruction)
            .create(&mut ctx, instruction)
            .expect("create")
    }

    pub(crate) fn print(method: &MethodNode, insn: &Insn) -> Option<String> {
        let mut labels = LabelNames::new();
        let mut ctx = PrintContext {
            method,
            labels: &mut labels,
        };
        print_insn(&mut ctx, insn)
    }

    pub(crate) fn handler(instruction: &PatchInstruction) -> &'static dyn InstructionHandler {
        instruction.instruction.handler().expect("handler")
    }

    pub(crate) fn void_method() -> MethodNode {
        MethodNode::new(ACC_PUBLIC, "m", "()V")
    }

    #[test]
    fn names_round_trip_through_lookup() {
        for instruction in Instruction::ALL {
            assert_eq!(Instruction::from_name(instruction.name()), Some(*instruction));
        }
        assert_eq!(Instruction::from_name("PUSH_INT"), Some(Instruction::PushInt));
        assert_eq!(Instruction::from_name("push-everything"), None);
        assert!(Instruction::SwitchLookup.requires_meta());
        assert!(!Instruction::Any.requires_meta());
    }

    #[test]
    fn single_instructions_print_their_catalog_name() {
        let method = void_method();
        assert_eq!(
            print(&method, &Insn::Simple(opcodes::DUP_X1)).as_deref(),
            Some("dup-x1")
        );
        assert_eq!(
            print(&method, &Insn::Simple(opcodes::FCMPG)).as_deref(),
            Some("compare-float-inv")
        );
    }

    #[test]
    fn weak_labels_bind_once() {
        let mut scope = PatchScope::new();
        let node = NodeId(3);

        assert!(check_or_set_label(Some(&mut scope), node, "~a", LabelId(1)));
        assert!(check_or_set_label(Some(&mut scope), node, "~a", LabelId(1)));
        assert!(!check_or_set_label(Some(&mut scope), node, "~a", LabelId(2)));
        assert!(check_or_set_label(Some(&mut scope), node, "*", LabelId(2)));
        assert!(!check_or_set_label(Some(&mut scope), node, "a", LabelId(1)));
        assert!(check_or_set_label(None, node, "~b", LabelId(9)));
    }

    #[test]
    fn get_label_allocates_then_reuses() {
        let mut scope = PatchScope::new();
        let mut method = void_method();

        let first = get_label(&mut scope, &mut method, "~x").expect("label");
        let again = get_label(&mut scope, &mut method, "~x").expect("label");
        let other = get_label(&mut scope, &mut method, "~y").expect("label");

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert!(get_label(&mut scope, &mut method, "x").is_err());
    }

    #[test]
    fn label_names_use_spreadsheet_letters() {
        let mut names = LabelNames::new();
        assert_eq!(names.name(LabelId(7)), "label-A");
        assert_eq!(names.name(LabelId(2)), "label-B");
        assert_eq!(names.reference(LabelId(7)), "~label-A");
        assert_eq!(letters(25), "Z");
        assert_eq!(letters(26), "AA");
        assert_eq!(letters(27), "AB");
        assert_eq!(letters(26 * 27), "AAA");
        assert!(names.is_named(LabelId(2)));
        assert!(!names.is_named(LabelId(0)));
    }

    #[test]
    fn any_has_no_handler_and_no_validation() {
        let parsed = instruction(".any");
        assert_eq!(parsed.instruction, Instruction::Any);
        assert_eq!(parsed.mode, Mode::Match);
        assert!(Instruction::Any.handler().is_none());
    }
}
