//! Lowering of parsed expressions to a WebAssembly text module.
//!
//! The generated module imports the host functions wired in
//! [`super::host`] and exports a single `run` function whose result is the
//! value of the last statement.

use thiserror::Error;

use super::syntax::{self, BinOp, Expr, SyntaxError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Int,
    Float,
    Nothing,
}

impl Ty {
    fn name(self) -> &'static str {
        match self {
            Ty::Int => "Int64",
            Ty::Float => "Float64",
            Ty::Nothing => "Nothing",
        }
    }

    fn join(self, other: Ty) -> Ty {
        if self == Ty::Int && other == Ty::Int {
            Ty::Int
        } else {
            Ty::Float
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LowerError {
    #[error("ParseError: {message} (at byte {offset})")]
    Syntax { offset: usize, message: String },

    #[error("UndefVarError: `{0}` not defined")]
    UndefVar(String),

    #[error("MethodError: no method matching {name} with {arity} argument(s)")]
    Arity { name: String, arity: usize },

    #[error("MethodError: no method matching {0}")]
    NoMethod(String),
}

impl From<SyntaxError> for LowerError {
    fn from(e: SyntaxError) -> Self {
        LowerError::Syntax {
            offset: e.offset,
            message: e.message,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Lowered {
    pub wat: String,
    pub result: Ty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Sqrt,
    Abs,
    Floor,
    Ceil,
    Trunc,
    Round,
    Float,
    Min,
    Max,
    Div,
    Rem,
    Println,
}

fn builtin(name: &str, arity: usize) -> Result<Builtin, LowerError> {
    let (builtin, expected) = match name {
        "sqrt" => (Builtin::Sqrt, 1),
        "abs" => (Builtin::Abs, 1),
        "floor" => (Builtin::Floor, 1),
        "ceil" => (Builtin::Ceil, 1),
        "trunc" => (Builtin::Trunc, 1),
        "round" => (Builtin::Round, 1),
        "float" => (Builtin::Float, 1),
        "min" => (Builtin::Min, 2),
        "max" => (Builtin::Max, 2),
        "div" => (Builtin::Div, 2),
        "rem" => (Builtin::Rem, 2),
        "println" => (Builtin::Println, 1),
        _ => return Err(LowerError::UndefVar(name.to_string())),
    };
    if arity != expected {
        return Err(LowerError::Arity {
            name: name.to_string(),
            arity,
        });
    }
    Ok(builtin)
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" | "π" => Some(std::f64::consts::PI),
        "Inf" => Some(f64::INFINITY),
        _ => None,
    }
}

fn numeric(ty: Ty, context: &str) -> Result<Ty, LowerError> {
    if ty == Ty::Nothing {
        Err(LowerError::NoMethod(format!("{context}(::Nothing)")))
    } else {
        Ok(ty)
    }
}

fn integers(lhs: Ty, rhs: Ty, context: &str) -> Result<Ty, LowerError> {
    if lhs == Ty::Int && rhs == Ty::Int {
        Ok(Ty::Int)
    } else {
        Err(LowerError::NoMethod(format!(
            "{context}(::{}, ::{})",
            lhs.name(),
            rhs.name()
        )))
    }
}

/// An expression annotated with its type. Children are checked before their
/// parent, so each node is visited once.
struct Typed<'e> {
    expr: &'e Expr,
    ty: Ty,
    children: Vec<Typed<'e>>,
}

fn check(expr: &Expr) -> Result<Typed<'_>, LowerError> {
    let (ty, children) = match expr {
        Expr::Int(_) => (Ty::Int, Vec::new()),
        Expr::Float(_) => (Ty::Float, Vec::new()),
        Expr::Ident(name) => {
            constant(name).ok_or_else(|| LowerError::UndefVar(name.clone()))?;
            (Ty::Float, Vec::new())
        }
        Expr::Neg(inner) => {
            let inner = check(inner)?;
            (numeric(inner.ty, "-")?, vec![inner])
        }
        Expr::Binary { op, lhs, rhs } => {
            let context = op.to_string();
            let lhs = check(lhs)?;
            let l = numeric(lhs.ty, &context)?;
            let rhs = check(rhs)?;
            let r = numeric(rhs.ty, &context)?;
            let ty = match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul => l.join(r),
                BinOp::Div => Ty::Float,
                BinOp::IntDiv | BinOp::Rem => integers(l, r, &context)?,
            };
            (ty, vec![lhs, rhs])
        }
        Expr::Call { name, args } => {
            let builtin = builtin(name, args.len())?;
            let args = args
                .iter()
                .map(|arg| {
                    let arg = check(arg)?;
                    numeric(arg.ty, name)?;
                    Ok(arg)
                })
                .collect::<Result<Vec<_>, LowerError>>()?;
            let ty = match builtin {
                Builtin::Sqrt | Builtin::Float => Ty::Float,
                Builtin::Abs | Builtin::Floor | Builtin::Ceil | Builtin::Trunc | Builtin::Round => {
                    args[0].ty
                }
                Builtin::Min | Builtin::Max => args[0].ty.join(args[1].ty),
                Builtin::Div | Builtin::Rem => integers(args[0].ty, args[1].ty, name)?,
                Builtin::Println => Ty::Nothing,
            };
            (ty, args)
        }
    };
    Ok(Typed { expr, ty, children })
}

fn float_literal(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 { "inf".into() } else { "-inf".into() }
    } else {
        format!("{v:?}")
    }
}

#[derive(Default)]
struct Emitter {
    code: Vec<String>,
}

impl Emitter {
    fn op(&mut self, instr: impl Into<String>) {
        self.code.push(instr.into());
    }

    /// Emit `node` so that it leaves a value of type `want` on the stack.
    fn emit_as(&mut self, node: &Typed<'_>, want: Ty) -> Result<(), LowerError> {
        self.emit(node)?;
        if node.ty == Ty::Int && want == Ty::Float {
            self.op("f64.convert_i64_s");
        }
        Ok(())
    }

    fn emit(&mut self, node: &Typed<'_>) -> Result<(), LowerError> {
        let ty = node.ty;
        let children = node.children.as_slice();
        match node.expr {
            Expr::Int(v) => self.op(format!("i64.const {v}")),
            Expr::Float(v) => self.op(format!("f64.const {}", float_literal(*v))),
            Expr::Ident(name) => {
                let v = constant(name).ok_or_else(|| LowerError::UndefVar(name.clone()))?;
                self.op(format!("f64.const {}", float_literal(v)));
            }
            Expr::Neg(_) => {
                if ty == Ty::Int {
                    self.op("i64.const 0");
                    self.emit_as(&children[0], Ty::Int)?;
                    self.op("i64.sub");
                } else {
                    self.emit_as(&children[0], Ty::Float)?;
                    self.op("f64.neg");
                }
            }
            Expr::Binary { op, .. } => {
                let operand = match op {
                    BinOp::Div => Ty::Float,
                    _ => ty,
                };
                self.emit_as(&children[0], operand)?;
                self.emit_as(&children[1], operand)?;
                self.op(match (op, operand) {
                    (BinOp::Add, Ty::Int) => "i64.add",
                    (BinOp::Sub, Ty::Int) => "i64.sub",
                    (BinOp::Mul, Ty::Int) => "i64.mul",
                    (BinOp::IntDiv, _) => "i64.div_s",
                    (BinOp::Rem, _) => "i64.rem_s",
                    (BinOp::Add, _) => "f64.add",
                    (BinOp::Sub, _) => "f64.sub",
                    (BinOp::Mul, _) => "f64.mul",
                    (BinOp::Div, _) => "f64.div",
                });
            }
            Expr::Call { name, args } => self.emit_call(builtin(name, args.len())?, children, ty)?,
        }
        Ok(())
    }

    fn emit_call(&mut self, builtin: Builtin, args: &[Typed<'_>], ty: Ty) -> Result<(), LowerError> {
        match builtin {
            Builtin::Sqrt => {
                self.emit_as(&args[0], Ty::Float)?;
                self.op("local.tee $f0");
                self.op("f64.const 0");
                self.op("f64.lt");
                self.op("if");
                self.op("local.get $f0");
                self.op("call $domain_error");
                self.op("end");
                self.op("local.get $f0");
                self.op("f64.sqrt");
            }
            Builtin::Float => self.emit_as(&args[0], Ty::Float)?,
            Builtin::Abs if ty == Ty::Int => {
                self.emit_as(&args[0], Ty::Int)?;
                self.op("local.set $i0");
                self.op("i64.const 0");
                self.op("local.get $i0");
                self.op("i64.sub");
                self.op("local.get $i0");
                self.op("local.get $i0");
                self.op("i64.const 0");
                self.op("i64.lt_s");
                self.op("select");
            }
            Builtin::Abs => {
                self.emit_as(&args[0], Ty::Float)?;
                self.op("f64.abs");
            }
            Builtin::Floor | Builtin::Ceil | Builtin::Trunc | Builtin::Round => {
                self.emit_as(&args[0], ty)?;
                if ty == Ty::Float {
                    self.op(match builtin {
                        Builtin::Floor => "f64.floor",
                        Builtin::Ceil => "f64.ceil",
                        Builtin::Trunc => "f64.trunc",
                        _ => "f64.nearest",
                    });
                }
            }
            Builtin::Min | Builtin::Max if ty == Ty::Int => {
                self.emit_as(&args[0], Ty::Int)?;
                self.emit_as(&args[1], Ty::Int)?;
                self.op("local.set $i1");
                self.op("local.set $i0");
                self.op("local.get $i0");
                self.op("local.get $i1");
                self.op("local.get $i0");
                self.op("local.get $i1");
                self.op(if builtin == Builtin::Min { "i64.lt_s" } else { "i64.gt_s" });
                self.op("select");
            }
            Builtin::Min | Builtin::Max => {
                self.emit_as(&args[0], Ty::Float)?;
                self.emit_as(&args[1], Ty::Float)?;
                self.op(if builtin == Builtin::Min { "f64.min" } else { "f64.max" });
            }
            Builtin::Div | Builtin::Rem => {
                self.emit_as(&args[0], Ty::Int)?;
                self.emit_as(&args[1], Ty::Int)?;
                self.op(if builtin == Builtin::Div { "i64.div_s" } else { "i64.rem_s" });
            }
            Builtin::Println => {
                self.emit(&args[0])?;
                match args[0].ty {
                    Ty::Int => self.op("call $println_i64"),
                    _ => self.op("call $println_f64"),
                }
            }
        }
        Ok(())
    }
}

/// Lower an expression program to a WebAssembly text module.
pub fn lower(source: &str) -> Result<Lowered, LowerError> {
    let program = syntax::parse_program(source)?;

    let mut emitter = Emitter::default();
    let mut result = Ty::Nothing;
    for (index, statement) in program.iter().enumerate() {
        let typed = check(statement)?;
        emitter.emit(&typed)?;
        let ty = typed.ty;
        if index + 1 < program.len() {
            if ty != Ty::Nothing {
                emitter.op("drop");
            }
        } else {
            result = ty;
        }
    }

    let result_decl = match result {
        Ty::Int => " (result i64)",
        Ty::Float => " (result f64)",
        Ty::Nothing => "",
    };

    let mut wat = String::from(
        "(module\n  \
         (import \"env\" \"println_i64\" (func $println_i64 (param i64)))\n  \
         (import \"env\" \"println_f64\" (func $println_f64 (param f64)))\n  \
         (import \"env\" \"domain_error\" (func $domain_error (param f64)))\n",
    );
    wat.push_str(&format!("  (func (export \"run\"){result_decl}\n"));
    wat.push_str("    (local $i0 i64) (local $i1 i64) (local $f0 f64)\n");
    for instr in &emitter.code {
        wat.push_str("    ");
        wat.push_str(instr);
        wat.push('\n');
    }
    wat.push_str("  )\n)\n");

    Ok(Lowered { wat, result })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_sum_stays_integer() {
        let lowered = lower("1+1").unwrap();
        assert_eq!(lowered.result, Ty::Int);
        assert!(lowered.wat.contains("(result i64)"));
        assert!(lowered.wat.contains("i64.add"));
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        let lowered = lower("1 + 2.5").unwrap();
        assert_eq!(lowered.result, Ty::Float);
        assert!(lowered.wat.contains("f64.convert_i64_s"));
        assert!(lowered.wat.contains("f64.add"));
    }

    #[test]
    fn slash_always_divides_as_float() {
        let lowered = lower("6 / 3").unwrap();
        assert_eq!(lowered.result, Ty::Float);
        assert!(lowered.wat.contains("f64.div"));
    }

    #[test]
    fn sqrt_checks_its_domain() {
        let lowered = lower("sqrt(2.0)").unwrap();
        assert_eq!(lowered.result, Ty::Float);
        assert!(lowered.wat.contains("call $domain_error"));
        assert!(lowered.wat.contains("f64.sqrt"));
    }

    #[test]
    fn println_yields_nothing() {
        let lowered = lower("println(sqrt(2.0))").unwrap();
        assert_eq!(lowered.result, Ty::Nothing);
        assert!(lowered.wat.contains("call $println_f64"));
        assert!(lowered.wat.contains("(func (export \"run\")\n"));
    }

    #[test]
    fn earlier_statements_are_dropped() {
        let lowered = lower("1; println(2); 3.0").unwrap();
        assert_eq!(lowered.result, Ty::Float);
        assert_eq!(lowered.wat.matches("drop").count(), 1);
    }

    #[test]
    fn empty_program_returns_nothing() {
        let lowered = lower("").unwrap();
        assert_eq!(lowered.result, Ty::Nothing);
    }

    #[test]
    fn integer_division_requires_integers() {
        assert_eq!(
            lower("7.0 ÷ 2").unwrap_err(),
            LowerError::NoMethod("÷(::Float64, ::Int64)".into())
        );
        assert_eq!(lower("div(7, 2)").unwrap().result, Ty::Int);
    }

    #[test]
    fn nothing_is_not_a_number() {
        let err = lower("println(1) + 1").unwrap_err();
        assert_eq!(err, LowerError::NoMethod("+(::Nothing)".into()));
    }

    #[test]
    fn unknown_names_and_arity() {
        assert_eq!(lower("x + 1").unwrap_err(), LowerError::UndefVar("x".into()));
        assert_eq!(lower("cbrt(8)").unwrap_err(), LowerError::UndefVar("cbrt".into()));
        assert_eq!(
            lower("sqrt(1, 2)").unwrap_err(),
            LowerError::Arity {
                name: "sqrt".into(),
                arity: 2
            }
        );
    }

    #[test]
    fn syntax_errors_render_as_parse_errors() {
        let err = lower("(1").unwrap_err();
        assert!(err.to_string().starts_with("ParseError:"), "got: {err}");
    }

    #[test]
    fn float_literals_are_valid_wat() {
        assert_eq!(float_literal(2.0), "2.0");
        assert_eq!(float_literal(1e300), "1e300");
        assert_eq!(float_literal(f64::INFINITY), "inf");
    }

    #[test]
    fn long_chains_lower_to_one_instruction_per_operator() {
        let src = vec!["1"; 250].join(" + ");
        let lowered = lower(&src).unwrap();
        assert_eq!(lowered.result, Ty::Int);
        assert_eq!(lowered.wat.matches("i64.add").count(), 249);
        assert_eq!(lowered.wat.matches("i64.const 1").count(), 250);
    }

    #[test]
    fn left_operand_errors_are_reported_first() {
        assert_eq!(
            lower("println(1) + x").unwrap_err(),
            LowerError::NoMethod("+(::Nothing)".into())
        );
    }

    #[test]
    fn too_deep_programs_fail_to_parse() {
        let src = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(lower(&src), Err(LowerError::Syntax { .. })));
    }
}
