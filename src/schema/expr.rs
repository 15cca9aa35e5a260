// Textual parameter expressions parsed with nom
//
// Grammar, loosest binding first:
//   ||  &&  comparisons  | ^  &  << >>  + -  * / %  unary ! -  postfix [i] .name

use crate::core::{Eval, EvalError, Param, Result, Value};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, hex_digit1, multispace0},
    combinator::{all_consuming, map, map_res, not, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
    IResult, Parser,
};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitOr,
    BitXor,
    BitAnd,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
enum Ast {
    Lit(Value),
    Name(String),
    Index(Box<Ast>, Box<Ast>),
    Field(Box<Ast>, String),
    Call(String, Vec<Ast>),
    Unary(UnOp, Box<Ast>),
    Binary(BinOp, Box<Ast>, Box<Ast>),
}

enum Postfix {
    Index(Ast),
    Field(String),
}

type ParseResult<'a, T> = IResult<&'a str, T>;

fn ws<'a, O, P>(inner: P) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    P: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

fn identifier(input: &str) -> ParseResult<'_, String> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        String::from,
    )
    .parse(input)
}

fn integer(input: &str) -> ParseResult<'_, Ast> {
    alt((
        map_res(preceded(tag("0x"), hex_digit1), |digits: &str| {
            i128::from_str_radix(digits, 16).map(|i| Ast::Lit(Value::Int(i)))
        }),
        map_res(digit1, |digits: &str| {
            digits.parse::<i128>().map(|i| Ast::Lit(Value::Int(i)))
        }),
    ))
    .parse(input)
}

fn string(input: &str) -> ParseResult<'_, Ast> {
    map(
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        |s: &str| Ast::Lit(Value::Str(s.to_string())),
    )
    .parse(input)
}

fn call_or_name(input: &str) -> ParseResult<'_, Ast> {
    let (input, name) = identifier(input)?;
    match name.as_str() {
        "true" => return Ok((input, Ast::Lit(Value::Bool(true)))),
        "false" => return Ok((input, Ast::Lit(Value::Bool(false)))),
        "null" => return Ok((input, Ast::Lit(Value::Null))),
        _ => {}
    }

    let args = delimited(
        ws(char('(')),
        separated_list0(ws(char(',')), expression),
        ws(char(')')),
    )
    .parse(input);
    match args {
        Ok((rest, args)) => Ok((rest, Ast::Call(name, args))),
        Err(nom::Err::Error(_)) => Ok((input, Ast::Name(name))),
        Err(e) => Err(e),
    }
}

fn primary(input: &str) -> ParseResult<'_, Ast> {
    ws(alt((
        integer,
        string,
        call_or_name,
        delimited(char('('), expression, char(')')),
    )))
    .parse(input)
}

fn postfix(input: &str) -> ParseResult<'_, Ast> {
    let (input, base) = primary(input)?;
    let (input, ops) = many0(alt((
        map(
            delimited(ws(char('[')), expression, ws(char(']'))),
            Postfix::Index,
        ),
        map(preceded(ws(char('.')), identifier), Postfix::Field),
    )))
    .parse(input)?;

    let ast = ops.into_iter().fold(base, |acc, op| match op {
        Postfix::Index(index) => Ast::Index(Box::new(acc), Box::new(index)),
        Postfix::Field(name) => Ast::Field(Box::new(acc), name),
    });
    Ok((input, ast))
}

fn unary(input: &str) -> ParseResult<'_, Ast> {
    alt((
        map(
            pair(
                ws(alt((value(UnOp::Not, char('!')), value(UnOp::Neg, char('-'))))),
                unary,
            ),
            |(op, operand)| Ast::Unary(op, Box::new(operand)),
        ),
        postfix,
    ))
    .parse(input)
}

/// One left-associative precedence level
fn level<'a>(
    input: &'a str,
    operand: fn(&'a str) -> ParseResult<'a, Ast>,
    operator: fn(&'a str) -> ParseResult<'a, BinOp>,
) -> ParseResult<'a, Ast> {
    let (input, first) = operand(input)?;
    let (input, rest) = many0(pair(ws(operator), operand)).parse(input)?;
    let ast = rest.into_iter().fold(first, |lhs, (op, rhs)| {
        Ast::Binary(op, Box::new(lhs), Box::new(rhs))
    });
    Ok((input, ast))
}

fn mul_op(input: &str) -> ParseResult<'_, BinOp> {
    alt((
        value(BinOp::Mul, char('*')),
        value(BinOp::Div, char('/')),
        value(BinOp::Rem, char('%')),
    ))
    .parse(input)
}

fn add_op(input: &str) -> ParseResult<'_, BinOp> {
    alt((value(BinOp::Add, char('+')), value(BinOp::Sub, char('-')))).parse(input)
}

fn shift_op(input: &str) -> ParseResult<'_, BinOp> {
    alt((value(BinOp::Shl, tag("<<")), value(BinOp::Shr, tag(">>")))).parse(input)
}

fn bitand_op(input: &str) -> ParseResult<'_, BinOp> {
    value(BinOp::BitAnd, terminated(char('&'), not(char('&')))).parse(input)
}

fn bitor_op(input: &str) -> ParseResult<'_, BinOp> {
    alt((
        value(BinOp::BitOr, terminated(char('|'), not(char('|')))),
        value(BinOp::BitXor, char('^')),
    ))
    .parse(input)
}

fn cmp_op(input: &str) -> ParseResult<'_, BinOp> {
    alt((
        value(BinOp::Eq, tag("==")),
        value(BinOp::Ne, tag("!=")),
        value(BinOp::Le, tag("<=")),
        value(BinOp::Ge, tag(">=")),
        value(BinOp::Lt, terminated(char('<'), not(char('<')))),
        value(BinOp::Gt, terminated(char('>'), not(char('>')))),
    ))
    .parse(input)
}

fn and_op(input: &str) -> ParseResult<'_, BinOp> {
    value(BinOp::And, tag("&&")).parse(input)
}

fn or_op(input: &str) -> ParseResult<'_, BinOp> {
    value(BinOp::Or, tag("||")).parse(input)
}

fn mul_level(input: &str) -> ParseResult<'_, Ast> {
    level(input, unary, mul_op)
}

fn add_level(input: &str) -> ParseResult<'_, Ast> {
    level(input, mul_level, add_op)
}

fn shift_level(input: &str) -> ParseResult<'_, Ast> {
    level(input, add_level, shift_op)
}

fn bitand_level(input: &str) -> ParseResult<'_, Ast> {
    level(input, shift_level, bitand_op)
}

fn bitor_level(input: &str) -> ParseResult<'_, Ast> {
    level(input, bitand_level, bitor_op)
}

fn cmp_level(input: &str) -> ParseResult<'_, Ast> {
    level(input, bitor_level, cmp_op)
}

fn and_level(input: &str) -> ParseResult<'_, Ast> {
    level(input, cmp_level, and_op)
}

fn expression(input: &str) -> ParseResult<'_, Ast> {
    level(input, and_level, or_op)
}

fn parse(text: &str) -> Result<Ast> {
    all_consuming(ws(expression))
        .parse(text)
        .map(|(_, ast)| ast)
        .map_err(|e| {
            EvalError::Parse {
                input: text.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
}

/// Compiles a textual expression into a deferred parameter.
///
/// A bare identifier compiles to a named reference.
pub fn compile(text: &str) -> Result<Param> {
    match parse(text)? {
        Ast::Name(name) => Ok(Param::Ref(name)),
        Ast::Lit(value) => Ok(Param::Literal(value)),
        ast => Ok(Param::expr(move |e| ast.eval(e))),
    }
}

fn int_of(value: &Value) -> Result<i128> {
    value
        .as_int()
        .ok_or_else(|| crate::core::error::mismatch("int", value))
}

fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        _ => lhs.as_f64()?.partial_cmp(&rhs.as_f64()?),
    }
}

fn equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            compare(lhs, rhs) == Some(Ordering::Equal)
        }
        _ => match (lhs.as_bytes(), rhs.as_bytes()) {
            (Some(a), Some(b)) => a == b,
            _ => lhs == rhs,
        },
    }
}

fn arithmetic(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    if let (Value::Float(_), _) | (_, Value::Float(_)) = (lhs, rhs) {
        let a = lhs.as_f64().ok_or_else(|| crate::core::error::mismatch("number", lhs))?;
        let b = rhs.as_f64().ok_or_else(|| crate::core::error::mismatch("number", rhs))?;
        return match op {
            BinOp::Add => Ok(Value::Float(a + b)),
            BinOp::Sub => Ok(Value::Float(a - b)),
            BinOp::Mul => Ok(Value::Float(a * b)),
            BinOp::Div => Ok(Value::Float(a / b)),
            _ => Err(crate::core::error::mismatch("int", lhs)),
        };
    }

    let a = int_of(lhs)?;
    let b = int_of(rhs)?;
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div | BinOp::Rem if b == 0 => return Err(EvalError::DivisionByZero.into()),
        // integer division floors
        BinOp::Div => Some(a.div_euclid(b) - if b < 0 && a.rem_euclid(b) != 0 { 1 } else { 0 }),
        BinOp::Rem => Some(a - b * (a.div_euclid(b) - if b < 0 && a.rem_euclid(b) != 0 { 1 } else { 0 })),
        BinOp::BitAnd => Some(a & b),
        BinOp::BitOr => Some(a | b),
        BinOp::BitXor => Some(a ^ b),
        BinOp::Shl => u32::try_from(b).ok().and_then(|s| a.checked_shl(s)),
        BinOp::Shr => u32::try_from(b).ok().and_then(|s| a.checked_shr(s)),
        _ => None,
    };
    result.map(Value::Int).ok_or_else(|| {
        EvalError::TypeMismatch {
            expected: "int in range",
            found: format!("{} {:?} {}", a, op, b),
        }
        .into()
    })
}

impl Ast {
    fn eval(&self, e: &Eval<'_>) -> Result<Value> {
        match self {
            Ast::Lit(value) => Ok(value.clone()),
            Ast::Name(name) => e.get(name),
            Ast::Index(base, index) => {
                let i = int_of(&index.eval(e)?)?;
                let i = i64::try_from(i).map_err(|_| crate::core::error::mismatch("index", &Value::Int(i)))?;
                match base.as_ref() {
                    Ast::Name(name) => e.at(name, i),
                    other => {
                        let list = other.eval(e)?;
                        list.at(i).cloned().ok_or_else(|| {
                            EvalError::IndexOutOfRange {
                                index: i,
                                len: list.len().unwrap_or(0),
                            }
                            .into()
                        })
                    }
                }
            }
            Ast::Field(base, field) => {
                let value = base.eval(e)?;
                value
                    .get(field)
                    .cloned()
                    .ok_or_else(|| EvalError::UnknownName(field.clone()).into())
            }
            Ast::Call(func, args) => match (func.as_str(), args.as_slice()) {
                ("len", [Ast::Name(name)]) => e.len(name).map(Value::from),
                ("len", [arg]) => {
                    let value = arg.eval(e)?;
                    value
                        .len()
                        .map(Value::from)
                        .ok_or_else(|| crate::core::error::mismatch("collection", &value))
                }
                ("num_bytes", [Ast::Name(name)]) => e.num_bytes(name).map(Value::from),
                _ => Err(EvalError::UnknownName(format!("{}()", func)).into()),
            },
            Ast::Unary(op, operand) => {
                let value = operand.eval(e)?;
                match op {
                    UnOp::Not => Ok(Value::Bool(!value.truthy())),
                    UnOp::Neg => match value {
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Ok(Value::Int(-int_of(&other)?)),
                    },
                }
            }
            Ast::Binary(BinOp::Or, lhs, rhs) => {
                Ok(Value::Bool(lhs.eval(e)?.truthy() || rhs.eval(e)?.truthy()))
            }
            Ast::Binary(BinOp::And, lhs, rhs) => {
                Ok(Value::Bool(lhs.eval(e)?.truthy() && rhs.eval(e)?.truthy()))
            }
            Ast::Binary(op, lhs, rhs) => {
                let a = lhs.eval(e)?;
                let b = rhs.eval(e)?;
                match op {
                    BinOp::Eq => Ok(Value::Bool(equal(&a, &b))),
                    BinOp::Ne => Ok(Value::Bool(!equal(&a, &b))),
                    BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                        let ord = compare(&a, &b).ok_or_else(|| crate::core::error::mismatch("comparable values", &b))?;
                        Ok(Value::Bool(match op {
                            BinOp::Lt => ord == Ordering::Less,
                            BinOp::Le => ord != Ordering::Greater,
                            BinOp::Gt => ord == Ordering::Greater,
                            _ => ord != Ordering::Less,
                        }))
                    }
                    _ => arithmetic(*op, &a, &b),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Binding, Mode, Scope};

    fn eval_with(text: &str, bindings: Vec<(&str, Value)>) -> Result<Value> {
        let root = Scope::root(Mode::Idle);
        let overrides = bindings
            .into_iter()
            .map(|(name, value)| (name, Binding::Value(value)))
            .collect();
        let eval = Eval::with_overrides(&root, overrides);
        eval.eval(&compile(text)?)
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval_with("1 + 2 * 3", vec![]).unwrap(), Value::Int(7));
        assert_eq!(eval_with("(1 + 2) * 3", vec![]).unwrap(), Value::Int(9));
        assert_eq!(eval_with("10 - 4 - 3", vec![]).unwrap(), Value::Int(3));
        assert_eq!(eval_with("1 << 4 | 1", vec![]).unwrap(), Value::Int(17));
        assert_eq!(
            eval_with("flags & 1 == 1", vec![("flags", Value::Int(3))]).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_logic_and_comparison() {
        let vars = || vec![("a", Value::Int(2)), ("b", Value::Int(5))];
        assert_eq!(eval_with("a < b && b <= 5", vars()).unwrap(), Value::Bool(true));
        assert_eq!(eval_with("a > b || !(a != 2)", vars()).unwrap(), Value::Bool(true));
        assert_eq!(eval_with("-a + b", vars()).unwrap(), Value::Int(3));
        assert_eq!(eval_with("b % a", vars()).unwrap(), Value::Int(1));
        assert_eq!(eval_with("-7 / 2", vec![]).unwrap(), Value::Int(-4));
    }

    #[test]
    fn test_strings_lists_and_fields() {
        let list = Value::List(vec![Value::Int(3), Value::Int(4)]);
        let mut map = indexmap::IndexMap::new();
        map.insert("len".to_string(), Value::Int(9));
        let header = Value::Map(map);

        let vars = || vec![("xs", list.clone()), ("hdr", header.clone())];
        assert_eq!(eval_with("xs[1] + xs[-2]", vars()).unwrap(), Value::Int(7));
        assert_eq!(eval_with("hdr.len", vars()).unwrap(), Value::Int(9));
        assert_eq!(eval_with("len(xs)", vars()).unwrap(), Value::Int(2));
        assert_eq!(
            eval_with("'abc' == 'abc'", vec![]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(eval_with("0x10", vec![]).unwrap(), Value::Int(16));
    }

    #[test]
    fn test_compile_shapes() {
        assert!(matches!(compile("len").unwrap(), Param::Ref(ref n) if n == "len"));
        assert!(matches!(compile("42").unwrap(), Param::Literal(Value::Int(42))));
        assert!(matches!(compile("a + 1").unwrap(), Param::Expr(_)));
    }

    #[test]
    fn test_errors() {
        assert!(compile("1 +").is_err());
        assert!(compile("(1").is_err());
        assert!(eval_with("1 / 0", vec![]).is_err());
        assert!(eval_with("missing + 1", vec![]).is_err());
        assert!(eval_with("nope(1)", vec![]).is_err());
    }
}
