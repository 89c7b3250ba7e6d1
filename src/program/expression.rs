use std::collections::HashMap;
use std::fmt;
use strum::{Display, EnumString, IntoStaticStr};

//
// Public Interface
//

pub type Domain = i32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegisterId(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum UnaryOp {
    #[strum(serialize = "!")]
    Not,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum BinaryOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Neq,
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Leq,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Geq,
    #[strum(serialize = "&&")]
    And,
    #[strum(serialize = "||")]
    Or,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Sub,
    #[strum(serialize = "*")]
    Mul,
    #[strum(serialize = "&")]
    BinAnd,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expression {
    Constant(Domain),
    Register(RegisterId),
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },
    Binary {
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
    },
    /// Holds iff the global memory lock is free or owned by the evaluating thread.
    NotBlocked,
}

/// Interning arena for expressions and register names. Structurally equal
/// expressions are stored once, so two ids are equal iff the expressions are.
#[derive(Clone, Debug, Default)]
pub struct ExpressionPool {
    nodes: Vec<Expression>,
    index: HashMap<Expression, ExprId>,
    registers: Vec<String>,
    register_index: HashMap<String, RegisterId>,
}

impl UnaryOp {
    pub fn apply(self, operand: Domain) -> Domain {
        match self {
            UnaryOp::Not => (operand == 0) as Domain,
        }
    }
}

impl BinaryOp {
    pub fn apply(self, left: Domain, right: Domain) -> Domain {
        match self {
            BinaryOp::Eq => (left == right) as Domain,
            BinaryOp::Neq => (left != right) as Domain,
            BinaryOp::Lt => (left < right) as Domain,
            BinaryOp::Leq => (left <= right) as Domain,
            BinaryOp::Gt => (left > right) as Domain,
            BinaryOp::Geq => (left >= right) as Domain,
            BinaryOp::And => (left != 0 && right != 0) as Domain,
            BinaryOp::Or => (left != 0 || right != 0) as Domain,
            BinaryOp::Add => left.wrapping_add(right),
            BinaryOp::Sub => left.wrapping_sub(right),
            BinaryOp::Mul => left.wrapping_mul(right),
            BinaryOp::BinAnd => left & right,
        }
    }
}

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl RegisterId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ExpressionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, expression: Expression) -> ExprId {
        if let Some(id) = self.index.get(&expression) {
            return *id;
        }
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(expression.clone());
        self.index.insert(expression, id);
        id
    }

    pub fn constant(&mut self, value: Domain) -> ExprId {
        self.intern(Expression::Constant(value))
    }

    pub fn register_id(&mut self, name: &str) -> RegisterId {
        if let Some(id) = self.register_index.get(name) {
            return *id;
        }
        let id = RegisterId(self.registers.len() as u32);
        self.registers.push(name.to_string());
        self.register_index.insert(name.to_string(), id);
        id
    }

    pub fn register(&mut self, name: &str) -> ExprId {
        let id = self.register_id(name);
        self.intern(Expression::Register(id))
    }

    pub fn register_expr(&mut self, id: RegisterId) -> ExprId {
        assert!(id.index() < self.registers.len(), "register from a foreign pool");
        self.intern(Expression::Register(id))
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ExprId) -> ExprId {
        self.intern(Expression::Unary { op, operand })
    }

    pub fn binary(&mut self, op: BinaryOp, left: ExprId, right: ExprId) -> ExprId {
        self.intern(Expression::Binary { op, left, right })
    }

    pub fn not_blocked(&mut self) -> ExprId {
        self.intern(Expression::NotBlocked)
    }

    pub fn get(&self, id: ExprId) -> &Expression {
        &self.nodes[id.index()]
    }

    pub fn register_name(&self, id: RegisterId) -> &str {
        &self.registers[id.index()]
    }

    pub fn find_register(&self, name: &str) -> Option<RegisterId> {
        self.register_index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn registers(&self) -> impl Iterator<Item = RegisterId> + '_ {
        (0..self.registers.len()).map(|i| RegisterId(i as u32))
    }

    /// Collects every register occurring in `id`, including nested operands.
    pub fn collect_registers(&self, id: ExprId, result: &mut Vec<RegisterId>) {
        match self.get(id) {
            Expression::Register(reg) => result.push(*reg),
            Expression::Unary { operand, .. } => self.collect_registers(*operand, result),
            Expression::Binary { left, right, .. } => {
                self.collect_registers(*left, result);
                self.collect_registers(*right, result);
            }
            Expression::Constant(_) | Expression::NotBlocked => {}
        }
    }

    pub fn display(&self, id: ExprId) -> ExpressionDisplay<'_> {
        ExpressionDisplay { pool: self, id }
    }
}

pub struct ExpressionDisplay<'a> {
    pool: &'a ExpressionPool,
    id: ExprId,
}

impl fmt::Display for ExpressionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.pool.get(self.id) {
            Expression::Constant(value) => write!(f, "{}", value),
            Expression::Register(reg) => write!(f, "{}", self.pool.register_name(*reg)),
            Expression::Unary { op, operand } => write!(f, "{}{}", op, self.pool.display(*operand)),
            Expression::Binary { op, left, right } => write!(
                f,
                "({} {} {})",
                self.pool.display(*left),
                op,
                self.pool.display(*right)
            ),
            Expression::NotBlocked => write!(f, "not_blocked"),
        }
    }
}
