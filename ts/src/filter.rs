//! Query filters over a record's indexed fields.

use crate::record::IndexValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: IndexValue) -> Self {
        Self { field: field.into(), op, value }
    }

    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    /// `true` if `candidate` satisfies this filter.
    pub(crate) fn matches(&self, candidate: Option<&IndexValue>) -> bool {
        let Some(candidate) = candidate else {
            return matches!(self.op, FilterOp::Ne);
        };
        match (&self.value, candidate) {
            (IndexValue::String(a), IndexValue::String(b)) => cmp_str(self.op, b, a),
            (IndexValue::Int(a), IndexValue::Int(b)) => cmp_ord(self.op, *b, *a),
            (IndexValue::Bool(a), IndexValue::Bool(b)) => match self.op {
                FilterOp::Eq => b == a,
                FilterOp::Ne => b != a,
                _ => false,
            },
            _ => false,
        }
    }
}

fn cmp_str(op: FilterOp, candidate: &str, target: &str) -> bool {
    match op {
        FilterOp::Eq => candidate == target,
        FilterOp::Ne => candidate != target,
        FilterOp::Gt => candidate > target,
        FilterOp::Lt => candidate < target,
        FilterOp::Gte => candidate >= target,
        FilterOp::Lte => candidate <= target,
    }
}

fn cmp_ord(op: FilterOp, candidate: i64, target: i64) -> bool {
    match op {
        FilterOp::Eq => candidate == target,
        FilterOp::Ne => candidate != target,
        FilterOp::Gt => candidate > target,
        FilterOp::Lt => candidate < target,
        FilterOp::Gte => candidate >= target,
        FilterOp::Lte => candidate <= target,
    }
}
