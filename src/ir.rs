use crate::opcodes;

/// Handle of a method body, assigned by the class set and stable across edits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Label handle, unique within one method body.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

/// Constant operand of `ldc` or a field initial value.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    /// Internal name or array descriptor of a `CONSTANT_Class`.
    Class(String),
}

impl Constant {
    /// Render in patch syntax.
    pub fn to_patch_literal(&self) -> String {
        match self {
            Constant::Int(value) => value.to_string(),
            Constant::Float(value) => format!("{value:?}F"),
            Constant::Long(value) => format!("{value}L"),
            Constant::Double(value) => format!("{value:?}D"),
            Constant::String(value) => crate::patch::quote(value),
            Constant::Class(value) => value.clone(),
        }
    }
}

/// A concrete bytecode instruction, with label pseudo-instructions inline.
#[derive(Clone, Debug, PartialEq)]
pub enum Insn {
    /// Opcodes without operands.
    Simple(u8),
    /// `bipush`, `sipush` and `newarray`.
    Int { opcode: u8, operand: i32 },
    Var { opcode: u8, var: u16 },
    Iinc { var: u16, incr: i16 },
    Ldc(Constant),
    Jump { opcode: u8, label: LabelId },
    Field {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
    },
    Method {
        opcode: u8,
        owner: String,
        name: String,
        desc: String,
        interface: bool,
    },
    InvokeDynamic { name: String, desc: String },
    /// `new`, `anewarray`, `checkcast` and `instanceof`.
    Type { opcode: u8, desc: String },
    MultiANewArray { desc: String, dims: u8 },
    TableSwitch {
        min: i32,
        max: i32,
        default: LabelId,
        labels: Vec<LabelId>,
    },
    LookupSwitch {
        default: LabelId,
        keys: Vec<i32>,
        labels: Vec<LabelId>,
    },
    Label(LabelId),
    LineNumber { line: u16, start: LabelId },
}

impl Insn {
    pub fn opcode(&self) -> Option<u8> {
        match self {
            Insn::Simple(opcode)
            | Insn::Int { opcode, .. }
            | Insn::Var { opcode, .. }
            | Insn::Jump { opcode, .. }
            | Insn::Field { opcode, .. }
            | Insn::Method { opcode, .. }
            | Insn::Type { opcode, .. } => Some(*opcode),
            Insn::Iinc { .. } => Some(opcodes::IINC),
            Insn::Ldc(_) => Some(opcodes::LDC),
            Insn::InvokeDynamic { .. } => Some(opcodes::INVOKEDYNAMIC),
            Insn::MultiANewArray { .. } => Some(opcodes::MULTIANEWARRAY),
            Insn::TableSwitch { .. } => Some(opcodes::TABLESWITCH),
            Insn::LookupSwitch { .. } => Some(opcodes::LOOKUPSWITCH),
            Insn::Label(_) | Insn::LineNumber { .. } => None,
        }
    }

    /// Labels this instruction refers to (not the label it defines).
    pub fn referenced_labels(&self) -> Vec<LabelId> {
        match self {
            Insn::Jump { label, .. } => vec![*label],
            Insn::TableSwitch {
                default, labels, ..
            }
            | Insn::LookupSwitch {
                default, labels, ..
            } => {
                let mut out = vec![*default];
                out.extend(labels.iter().copied());
                out
            }
            _ => Vec::new(),
        }
    }
}

/// Try/catch table entry expressed with labels.
#[derive(Clone, Debug, PartialEq)]
pub struct TryCatchBlock {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    pub catch_type: Option<String>,
}

/// A method declaration and its body.
#[derive(Clone, Debug, PartialEq)]
pub struct MethodNode {
    pub id: NodeId,
    pub access: u16,
    pub name: String,
    pub desc: String,
    pub instructions: Vec<Insn>,
    pub try_catch_blocks: Vec<TryCatchBlock>,
    next_label: u32,
}

impl MethodNode {
    pub fn new(access: u16, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            id: NodeId(0),
            access,
            name: name.into(),
            desc: desc.into(),
            instructions: Vec::new(),
            try_catch_blocks: Vec::new(),
            next_label: 0,
        }
    }

    pub fn with_body(mut self, instructions: Vec<Insn>, try_catch_blocks: Vec<TryCatchBlock>) -> Self {
        self.instructions = instructions;
        self.try_catch_blocks = try_catch_blocks;
        self.next_label = self.highest_label().map_or(0, |label| label.0 + 1);
        self
    }

    pub fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    pub fn is_static(&self) -> bool {
        self.access & opcodes::ACC_STATIC != 0
    }

    pub fn is_private(&self) -> bool {
        self.access & opcodes::ACC_PRIVATE != 0
    }

    pub fn is_protected(&self) -> bool {
        self.access & opcodes::ACC_PROTECTED != 0
    }

    fn highest_label(&self) -> Option<LabelId> {
        let defined = self.instructions.iter().filter_map(|insn| match insn {
            Insn::Label(label) => Some(*label),
            Insn::LineNumber { start, .. } => Some(*start),
            _ => None,
        });
        let referenced = self
            .instructions
            .iter()
            .flat_map(Insn::referenced_labels);
        let blocks = self
            .try_catch_blocks
            .iter()
            .flat_map(|block| [block.start, block.end, block.handler]);
        defined.chain(referenced).chain(blocks).max()
    }
}

/// A field declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldNode {
    pub access: u16,
    pub name: String,
    pub desc: String,
    pub value: Option<Constant>,
}

impl FieldNode {
    pub fn new(access: u16, name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            access,
            name: name.into(),
            desc: desc.into(),
            value: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access & opcodes::ACC_STATIC != 0
    }

    pub fn is_private(&self) -> bool {
        self.access & opcodes::ACC_PRIVATE != 0
    }
}

/// A class declaration with its members.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassNode {
    pub access: u16,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldNode>,
    pub methods: Vec<MethodNode>,
}

impl ClassNode {
    pub fn new(access: u16, name: impl Into<String>, super_name: Option<&str>) -> Self {
        Self {
            access,
            name: name.into(),
            super_name: super_name.map(str::to_string),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn with_interface(mut self, name: impl Into<String>) -> Self {
        self.interfaces.push(name.into());
        self
    }

    pub fn with_field(mut self, field: FieldNode) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_method(mut self, method: MethodNode) -> Self {
        self.methods.push(method);
        self
    }

    pub fn method(&self, name: &str, desc: &str) -> Option<&MethodNode> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.desc == desc)
    }

    pub fn field(&self, name: &str, desc: &str) -> Option<&FieldNode> {
        self.fields
            .iter()
            .find(|field| field.name == name && field.desc == desc)
    }
}

/// Whether a member with these flags is visible to subclasses as an
/// instance member.
pub(crate) fn is_inheritable(access: u16) -> bool {
    access & (opcodes::ACC_PUBLIC | opcodes::ACC_PROTECTED) != 0
        && access & opcodes::ACC_STATIC == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_reserves_labels_past_existing_ones() {
        let mut method = MethodNode::new(opcodes::ACC_PUBLIC, "run", "()V").with_body(
            vec![
                Insn::Label(LabelId(3)),
                Insn::Jump {
                    opcode: opcodes::GOTO,
                    label: LabelId(7),
                },
                Insn::Simple(opcodes::RETURN),
            ],
            Vec::new(),
        );

        assert_eq!(method.new_label(), LabelId(8));
        assert_eq!(method.new_label(), LabelId(9));
    }

    #[test]
    fn literals_render_in_patch_syntax() {
        assert_eq!(Constant::Int(-3).to_patch_literal(), "-3");
        assert_eq!(Constant::Long(5).to_patch_literal(), "5L");
        assert_eq!(Constant::Float(1.5).to_patch_literal(), "1.5F");
        assert_eq!(Constant::Double(2.0).to_patch_literal(), "2.0D");
        assert_eq!(
            Constant::String("hi".to_string()).to_patch_literal(),
            "\"hi\""
        );
    }

    #[test]
    fn inheritable_requires_visible_instance_member() {
        assert!(is_inheritable(opcodes::ACC_PUBLIC));
        assert!(is_inheritable(opcodes::ACC_PROTECTED));
        assert!(!is_inheritable(opcodes::ACC_PUBLIC | opcodes::ACC_STATIC));
        assert!(!is_inheritable(opcodes::ACC_PRIVATE));
    }
}
