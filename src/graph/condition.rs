use crate::error::{MasterError, Result};

/// Condition expression on an exclusive-split edge, evaluated against the
/// return code and output variable of the job that reached the split.
///
/// Grammar: `rc <op> <integer>` or `var ==|!= <string>`, where `<op>` is one
/// of `==`, `!=`, `<`, `<=`, `>`, `>=` and `<string>` is optionally
/// double-quoted. Whitespace around tokens is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    lhs: Operand,
    op: Op,
    value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operand {
    Rc,
    Var,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i32),
    Str(String),
}

impl Condition {
    pub fn parse(expr: &str) -> Result<Condition> {
        let bad = |why: &str| MasterError::Flow(format!("bad condition {:?}: {}", expr, why));

        // Two-character operators first so "<=" is not read as "<".
        const OPS: [(&str, Op); 6] = [
            ("==", Op::Eq),
            ("!=", Op::Ne),
            ("<=", Op::Le),
            (">=", Op::Ge),
            ("<", Op::Lt),
            (">", Op::Gt),
        ];
        let (pos, token, op) = OPS
            .iter()
            .filter_map(|(token, op)| expr.find(token).map(|pos| (pos, *token, *op)))
            .min_by_key(|(pos, token, _)| (*pos, std::cmp::Reverse(token.len())))
            .ok_or_else(|| bad("no comparison operator"))?;

        let lhs = match expr[..pos].trim() {
            "rc" => Operand::Rc,
            "var" => Operand::Var,
            other => return Err(bad(&format!("unknown operand {:?}", other))),
        };
        let rhs = expr[pos + token.len()..].trim();
        if rhs.is_empty() {
            return Err(bad("missing right-hand side"));
        }

        let value = match lhs {
            Operand::Rc => Value::Int(
                rhs.parse::<i32>()
                    .map_err(|_| bad("rc compares to an integer"))?,
            ),
            Operand::Var => {
                if !matches!(op, Op::Eq | Op::Ne) {
                    return Err(bad("var supports == and != only"));
                }
                let unquoted = rhs
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(rhs);
                Value::Str(unquoted.to_string())
            }
        };

        Ok(Condition { lhs, op, value })
    }

    pub fn eval(&self, rc: i32, var: &str) -> bool {
        match (&self.lhs, &self.value) {
            (Operand::Rc, Value::Int(want)) => match self.op {
                Op::Eq => rc == *want,
                Op::Ne => rc != *want,
                Op::Lt => rc < *want,
                Op::Le => rc <= *want,
                Op::Gt => rc > *want,
                Op::Ge => rc >= *want,
            },
            (Operand::Var, Value::Str(want)) => match self.op {
                Op::Eq => var == want,
                _ => var != want,
            },
            // parse() never builds these pairings
            _ => false,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lhs = match self.lhs {
            Operand::Rc => "rc",
            Operand::Var => "var",
        };
        let op = match self.op {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
        };
        match &self.value {
            Value::Int(v) => write!(f, "{}{}{}", lhs, op, v),
            Value::Str(v) => write!(f, "{}{}\"{}\"", lhs, op, v),
        }
    }
}
