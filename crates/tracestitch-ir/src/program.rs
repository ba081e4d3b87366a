use std::fmt::{self, Display, Formatter};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A whole IR document: `{"functions": [...]}`. Keys outside the model are kept in `extra`
/// at every level so a document passes through unchanged apart from what is patched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub functions: Vec<Function>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Program {
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// One-space indentation with a trailing newline, the layout the interpreter tooling prints.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        let mut buf = Vec::new();
        let fmt = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, fmt);
        self.serialize(&mut ser)?;
        let mut out = String::from_utf8_lossy(&buf).into_owned();
        out.push('\n');
        Ok(out)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for func in &self.functions {
            writeln!(f, "{func}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Argument>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<Type>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instrs: Vec<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Position>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Function {
    /// Label names in instruction order, duplicates included.
    pub fn label_names(&self) -> impl Iterator<Item = &str> {
        self.instrs.iter().filter_map(Code::as_label)
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.label_names().any(|l| l == name)
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "(")?;
            for (i, arg) in self.args.iter().enumerate() {
                if i != 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{arg}")?;
            }
            write!(f, ")")?;
        }
        if let Some(ty) = &self.return_type {
            write!(f, ": {ty}")?;
        }
        writeln!(f, " {{")?;
        for instr in &self.instrs {
            writeln!(f, "{instr}")?;
        }
        write!(f, "}}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: Type,
}

impl Display for Argument {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.arg_type)
    }
}

/// Declared value type. Anything outside the three primitives is carried through verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Int,
    Bool,
    Float,
    Other(Value),
}

impl Type {
    pub fn from_json(v: Value) -> Self {
        match v.as_str() {
            Some("int") => Type::Int,
            Some("bool") => Type::Bool,
            Some("float") => Type::Float,
            _ => Type::Other(v),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Type::Int => Value::String("int".to_string()),
            Type::Bool => Value::String("bool".to_string()),
            Type::Float => Value::String("float".to_string()),
            Type::Other(v) => v.clone(),
        }
    }
}

impl Serialize for Type {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Type {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Type::from_json)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Bool => write!(f, "bool"),
            Type::Float => write!(f, "float"),
            Type::Other(Value::String(s)) => write!(f, "{s}"),
            Type::Other(Value::Object(m)) if m.len() == 1 => {
                // Parameterized types such as {"ptr": "int"} render as ptr<int>.
                let (k, v) = m.iter().next().ok_or(fmt::Error)?;
                write!(f, "{k}<{}>", Type::from_json(v.clone()))
            }
            Type::Other(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub row: u64,
    pub col: u64,
}

/// One entry of a function body: a jump target or an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Code {
    Label {
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pos: Option<Position>,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
    Op(Operation),
}

impl Code {
    pub fn label(name: &str) -> Self {
        Code::Label {
            label: name.to_string(),
            pos: None,
            extra: Map::new(),
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            Code::Label { label, .. } => Some(label.as_str()),
            Code::Op(_) => None,
        }
    }

    pub fn as_op(&self) -> Option<&Operation> {
        match self {
            Code::Op(op) => Some(op),
            Code::Label { .. } => None,
        }
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Code::Label { label, .. } => write!(f, ".{label}:"),
            Code::Op(op) => write!(f, "  {op}"),
        }
    }
}

impl From<Operation> for Code {
    fn from(op: Operation) -> Self {
        Code::Op(op)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op: Op,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub op_type: Option<Type>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub funcs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Literal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Position>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Operation {
    /// An operation with no destination, operands or targets.
    pub fn effect(op: Op) -> Self {
        Self {
            op,
            dest: None,
            op_type: None,
            args: Vec::new(),
            funcs: Vec::new(),
            labels: Vec::new(),
            value: None,
            pos: None,
            extra: Map::new(),
        }
    }

    pub fn jump(target: &str) -> Self {
        Self {
            labels: vec![target.to_string()],
            ..Self::effect(Op::Jmp)
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(dest) = &self.dest {
            write!(f, "{dest}")?;
            if let Some(ty) = &self.op_type {
                write!(f, ": {ty}")?;
            }
            write!(f, " = ")?;
        }
        write!(f, "{}", self.op)?;
        if let Some(value) = &self.value {
            write!(f, " {value}")?;
        }
        for func in &self.funcs {
            write!(f, " @{func}")?;
        }
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        for label in &self.labels {
            write!(f, " .{label}")?;
        }
        write!(f, ";")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Float(f64),
}

impl<'de> Deserialize<'de> for Literal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Bool(b) => Ok(Literal::Bool(b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Literal::Int(i))
                } else if n.is_u64() {
                    Err(D::Error::custom(format_args!(
                        "integer literal {n} is out of range for i64"
                    )))
                } else {
                    n.as_f64()
                        .map(Literal::Float)
                        .ok_or_else(|| D::Error::custom(format_args!("bad numeric literal {n}")))
                }
            }
            other => Err(D::Error::custom(format_args!(
                "literal must be a number or boolean, found {other}"
            ))),
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Float(x) => write!(f, "{x}"),
        }
    }
}

/// Every operator the reference interpreter executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Const,
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Not,
    And,
    Or,
    Call,
    Id,
    Print,
    Nop,
    Ret,
    Jmp,
    Br,
    Phi,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,
    Feq,
    Flt,
    Fgt,
    Fle,
    Fge,
    Alloc,
    Load,
    #[serde(rename = "ptradd")]
    PtrAdd,
    Store,
    Free,
    Speculate,
    Commit,
    Guard,
}

impl Op {
    pub fn as_str(self) -> &'static str {
        match self {
            Op::Const => "const",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::Eq => "eq",
            Op::Lt => "lt",
            Op::Gt => "gt",
            Op::Le => "le",
            Op::Ge => "ge",
            Op::Not => "not",
            Op::And => "and",
            Op::Or => "or",
            Op::Call => "call",
            Op::Id => "id",
            Op::Print => "print",
            Op::Nop => "nop",
            Op::Ret => "ret",
            Op::Jmp => "jmp",
            Op::Br => "br",
            Op::Phi => "phi",
            Op::Fadd => "fadd",
            Op::Fsub => "fsub",
            Op::Fmul => "fmul",
            Op::Fdiv => "fdiv",
            Op::Feq => "feq",
            Op::Flt => "flt",
            Op::Fgt => "fgt",
            Op::Fle => "fle",
            Op::Fge => "fge",
            Op::Alloc => "alloc",
            Op::Load => "load",
            Op::PtrAdd => "ptradd",
            Op::Store => "store",
            Op::Free => "free",
            Op::Speculate => "speculate",
            Op::Commit => "commit",
            Op::Guard => "guard",
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
