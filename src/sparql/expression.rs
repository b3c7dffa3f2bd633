//! Expression evaluation for FILTER, BIND and ORDER BY
//!
//! A SPARQL evaluation error is represented as `None`.

use super::executor::{check_supported, ActiveGraph, SparqlExecutor};
use super::results::QuerySolution;
use super::{EngineError, EngineResult};
use oxrdf::{Literal, NamedNode, Term};
use regex::{Regex, RegexBuilder};
use spargebra::algebra::{Expression, Function};
use std::cmp::Ordering;

const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

impl SparqlExecutor {
    /// Effective boolean value of `expression`; errors count as false
    pub(super) fn effective_boolean(
        &self,
        expression: &Expression,
        solution: &QuerySolution,
        graph: &ActiveGraph,
    ) -> bool {
        self.eval_boolean(expression, solution, graph).unwrap_or(false)
    }

    fn eval_boolean(&self, expression: &Expression, solution: &QuerySolution, graph: &ActiveGraph) -> Option<bool> {
        self.eval_expression(expression, solution, graph)
            .and_then(|term| effective_boolean_value(&term))
    }

    pub(super) fn eval_expression(
        &self,
        expression: &Expression,
        solution: &QuerySolution,
        graph: &ActiveGraph,
    ) -> Option<Term> {
        let eval = |e: &Expression| self.eval_expression(e, solution, graph);
        #[allow(unreachable_patterns)]
        match expression {
            Expression::NamedNode(node) => Some(node.clone().into()),
            Expression::Literal(literal) => Some(literal.clone().into()),
            Expression::Variable(variable) => solution.get(variable).cloned(),
            Expression::Or(left, right) => {
                match (self.eval_boolean(left, solution, graph), self.eval_boolean(right, solution, graph)) {
                    (Some(true), _) | (_, Some(true)) => Some(boolean(true)),
                    (Some(false), Some(false)) => Some(boolean(false)),
                    _ => None,
                }
            }
            Expression::And(left, right) => {
                match (self.eval_boolean(left, solution, graph), self.eval_boolean(right, solution, graph)) {
                    (Some(false), _) | (_, Some(false)) => Some(boolean(false)),
                    (Some(true), Some(true)) => Some(boolean(true)),
                    _ => None,
                }
            }
            Expression::Equal(left, right) => terms_equal(&eval(left)?, &eval(right)?).map(boolean),
            Expression::SameTerm(left, right) => Some(boolean(eval(left)? == eval(right)?)),
            Expression::Greater(left, right) => {
                compare_terms(&eval(left)?, &eval(right)?).map(|o| boolean(o == Ordering::Greater))
            }
            Expression::GreaterOrEqual(left, right) => {
                compare_terms(&eval(left)?, &eval(right)?).map(|o| boolean(o != Ordering::Less))
            }
            Expression::Less(left, right) => {
                compare_terms(&eval(left)?, &eval(right)?).map(|o| boolean(o == Ordering::Less))
            }
            Expression::LessOrEqual(left, right) => {
                compare_terms(&eval(left)?, &eval(right)?).map(|o| boolean(o != Ordering::Greater))
            }
            Expression::In(needle, haystack) => {
                let needle = eval(needle)?;
                let mut errored = false;
                for candidate in haystack {
                    match eval(candidate).and_then(|c| terms_equal(&needle, &c)) {
                        Some(true) => return Some(boolean(true)),
                        Some(false) => {}
                        None => errored = true,
                    }
                }
                (!errored).then(|| boolean(false))
            }
            Expression::Add(left, right) => arithmetic(eval(left)?, eval(right)?, Operator::Add),
            Expression::Subtract(left, right) => arithmetic(eval(left)?, eval(right)?, Operator::Subtract),
            Expression::Multiply(left, right) => arithmetic(eval(left)?, eval(right)?, Operator::Multiply),
            Expression::Divide(left, right) => arithmetic(eval(left)?, eval(right)?, Operator::Divide),
            Expression::UnaryPlus(inner) => {
                let term = eval(inner)?;
                numeric(&term)?;
                Some(term)
            }
            Expression::UnaryMinus(inner) => Some(numeric(&eval(inner)?)?.negate()?.into_term()),
            Expression::Not(inner) => self.eval_boolean(inner, solution, graph).map(|b| boolean(!b)),
            Expression::Exists(pattern) => Some(boolean(
                self.eval(pattern, graph)
                    .any(|candidate| matches!(candidate, Ok(c) if c.is_compatible(solution))),
            )),
            Expression::Bound(variable) => Some(boolean(solution.contains(variable))),
            Expression::If(condition, then, otherwise) => {
                if self.eval_boolean(condition, solution, graph)? {
                    eval(then)
                } else {
                    eval(otherwise)
                }
            }
            Expression::Coalesce(alternatives) => alternatives.iter().find_map(eval),
            Expression::FunctionCall(function, arguments) => {
                let arguments = arguments.iter().map(eval).collect::<Option<Vec<_>>>()?;
                call_function(function, &arguments)
            }
            _ => None,
        }
    }
}

/// Reject expressions using functions the evaluator does not implement
pub(super) fn check_expression(expression: &Expression) -> EngineResult<()> {
    #[allow(unreachable_patterns)]
    match expression {
        Expression::NamedNode(_)
        | Expression::Literal(_)
        | Expression::Variable(_)
        | Expression::Bound(_) => Ok(()),
        Expression::Or(left, right)
        | Expression::And(left, right)
        | Expression::Equal(left, right)
        | Expression::SameTerm(left, right)
        | Expression::Greater(left, right)
        | Expression::GreaterOrEqual(left, right)
        | Expression::Less(left, right)
        | Expression::LessOrEqual(left, right)
        | Expression::Add(left, right)
        | Expression::Subtract(left, right)
        | Expression::Multiply(left, right)
        | Expression::Divide(left, right) => {
            check_expression(left)?;
            check_expression(right)
        }
        Expression::UnaryPlus(inner) | Expression::UnaryMinus(inner) | Expression::Not(inner) => {
            check_expression(inner)
        }
        Expression::In(needle, haystack) => {
            check_expression(needle)?;
            haystack.iter().try_for_each(check_expression)
        }
        Expression::Coalesce(alternatives) => alternatives.iter().try_for_each(check_expression),
        Expression::If(condition, then, otherwise) => {
            check_expression(condition)?;
            check_expression(then)?;
            check_expression(otherwise)
        }
        Expression::Exists(pattern) => check_supported(pattern),
        Expression::FunctionCall(function, arguments) => {
            if !is_supported_function(function) {
                return Err(EngineError::Unsupported(format!("function {function:?}")));
            }
            arguments.iter().try_for_each(check_expression)
        }
        _ => Err(EngineError::Unsupported("expression".to_string())),
    }
}

fn is_supported_function(function: &Function) -> bool {
    matches!(
        function,
        Function::Str
            | Function::Lang
            | Function::LangMatches
            | Function::Datatype
            | Function::Iri
            | Function::IsIri
            | Function::IsBlank
            | Function::IsLiteral
            | Function::IsNumeric
            | Function::StrLen
            | Function::UCase
            | Function::LCase
            | Function::Contains
            | Function::StrStarts
            | Function::StrEnds
            | Function::StrBefore
            | Function::StrAfter
            | Function::Concat
            | Function::SubStr
            | Function::Abs
            | Function::Ceil
            | Function::Floor
            | Function::Round
            | Function::Regex
            | Function::Replace
            | Function::StrLang
            | Function::StrDt
    )
}

fn call_function(function: &Function, arguments: &[Term]) -> Option<Term> {
    match (function, arguments) {
        (Function::Str, [term]) => match term {
            Term::NamedNode(node) => Some(simple(node.as_str())),
            Term::Literal(literal) => Some(simple(literal.value())),
            _ => None,
        },
        (Function::Lang, [Term::Literal(literal)]) => Some(simple(literal.language().unwrap_or(""))),
        (Function::LangMatches, [tag, range]) => {
            Some(boolean(lang_matches(plain_string(tag)?, plain_string(range)?)))
        }
        (Function::Datatype, [Term::Literal(literal)]) => Some(literal.datatype().into_owned().into()),
        (Function::Iri, [term]) => match term {
            Term::NamedNode(_) => Some(term.clone()),
            Term::Literal(literal) => NamedNode::new(literal.value()).ok().map(Into::into),
            _ => None,
        },
        (Function::IsIri, [term]) => Some(boolean(matches!(term, Term::NamedNode(_)))),
        (Function::IsBlank, [term]) => Some(boolean(matches!(term, Term::BlankNode(_)))),
        (Function::IsLiteral, [term]) => Some(boolean(matches!(term, Term::Literal(_)))),
        (Function::IsNumeric, [term]) => Some(boolean(numeric(term).is_some())),
        (Function::StrLen, [term]) => {
            let length = string_literal(term)?.value().chars().count();
            Some(Literal::from(i64::try_from(length).ok()?).into())
        }
        (Function::UCase, [term]) => map_string(term, str::to_uppercase),
        (Function::LCase, [term]) => map_string(term, str::to_lowercase),
        (Function::Contains, [text, needle]) => {
            let (text, needle) = compatible_strings(text, needle)?;
            Some(boolean(text.contains(needle)))
        }
        (Function::StrStarts, [text, prefix]) => {
            let (text, prefix) = compatible_strings(text, prefix)?;
            Some(boolean(text.starts_with(prefix)))
        }
        (Function::StrEnds, [text, suffix]) => {
            let (text, suffix) = compatible_strings(text, suffix)?;
            Some(boolean(text.ends_with(suffix)))
        }
        (Function::StrBefore, [source, needle]) => {
            let (text, search) = compatible_strings(source, needle)?;
            match text.find(search) {
                Some(position) => same_language(source, &text[..position]),
                None => Some(simple("")),
            }
        }
        (Function::StrAfter, [source, needle]) => {
            let (text, search) = compatible_strings(source, needle)?;
            match text.find(search) {
                Some(position) => same_language(source, &text[position + search.len()..]),
                None => Some(simple("")),
            }
        }
        (Function::Concat, parts) => {
            let mut value = String::new();
            for part in parts {
                value.push_str(string_literal(part)?.value());
            }
            Some(simple(&value))
        }
        (Function::SubStr, [source, start]) => substring(source, start, None),
        (Function::SubStr, [source, start, length]) => substring(source, start, Some(length)),
        (Function::Abs, [term]) => Some(
            match numeric(term)? {
                Numeric::Integer(value) => Numeric::Integer(value.checked_abs()?),
                Numeric::Decimal(value) => Numeric::Decimal(value.abs()),
                Numeric::Double(value) => Numeric::Double(value.abs()),
            }
            .into_term(),
        ),
        (Function::Ceil, [term]) => Some(numeric(term)?.map_float(f64::ceil).into_term()),
        (Function::Floor, [term]) => Some(numeric(term)?.map_float(f64::floor).into_term()),
        (Function::Round, [term]) => Some(numeric(term)?.map_float(|v| (v + 0.5).floor()).into_term()),
        (Function::Regex, [text, pattern]) => regex_match(text, pattern, None),
        (Function::Regex, [text, pattern, flags]) => regex_match(text, pattern, Some(flags)),
        (Function::Replace, [text, pattern, replacement]) => {
            regex_replace(text, pattern, replacement, None)
        }
        (Function::Replace, [text, pattern, replacement, flags]) => {
            regex_replace(text, pattern, replacement, Some(flags))
        }
        (Function::StrLang, [value, language]) => {
            Literal::new_language_tagged_literal(plain_string(value)?, plain_string(language)?)
                .ok()
                .map(Into::into)
        }
        (Function::StrDt, [value, Term::NamedNode(datatype)]) => {
            Some(Literal::new_typed_literal(plain_string(value)?, datatype.clone()).into())
        }
        _ => None,
    }
}

fn boolean(value: bool) -> Term {
    Literal::from(value).into()
}

fn simple(value: &str) -> Term {
    Literal::new_simple_literal(value).into()
}

/// Effective boolean value, or `None` when the term has none
pub(super) fn effective_boolean_value(term: &Term) -> Option<bool> {
    let Term::Literal(literal) = term else {
        return None;
    };
    match literal.datatype().as_str().strip_prefix(XSD) {
        Some("boolean") => match literal.value() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Some("string") => Some(!literal.value().is_empty()),
        _ => numeric(term).map(|n| {
            let value = n.as_f64();
            value != 0.0 && !value.is_nan()
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Numeric {
    Integer(i64),
    Decimal(f64),
    Double(f64),
}

impl Numeric {
    fn as_f64(self) -> f64 {
        match self {
            Numeric::Integer(value) => value as f64,
            Numeric::Decimal(value) | Numeric::Double(value) => value,
        }
    }

    fn negate(self) -> Option<Numeric> {
        Some(match self {
            Numeric::Integer(value) => Numeric::Integer(value.checked_neg()?),
            Numeric::Decimal(value) => Numeric::Decimal(-value),
            Numeric::Double(value) => Numeric::Double(-value),
        })
    }

    fn map_float(self, f: impl Fn(f64) -> f64) -> Numeric {
        match self {
            Numeric::Integer(_) => self,
            Numeric::Decimal(value) => Numeric::Decimal(f(value)),
            Numeric::Double(value) => Numeric::Double(f(value)),
        }
    }

    fn into_term(self) -> Term {
        match self {
            Numeric::Integer(value) => Literal::from(value).into(),
            Numeric::Decimal(value) => {
                let lexical = if value.fract() == 0.0 && value.is_finite() {
                    format!("{value:.1}")
                } else {
                    value.to_string()
                };
                Literal::new_typed_literal(lexical, NamedNode::new_unchecked(format!("{XSD}decimal"))).into()
            }
            Numeric::Double(value) => Literal::from(value).into(),
        }
    }
}

fn numeric(term: &Term) -> Option<Numeric> {
    let Term::Literal(literal) = term else {
        return None;
    };
    let value = literal.value().trim();
    match literal.datatype().as_str().strip_prefix(XSD)? {
        "integer" | "int" | "long" | "short" | "byte" | "nonNegativeInteger" | "positiveInteger"
        | "negativeInteger" | "nonPositiveInteger" | "unsignedInt" | "unsignedLong"
        | "unsignedShort" | "unsignedByte" => value.parse().ok().map(Numeric::Integer),
        "decimal" => value.parse().ok().map(Numeric::Decimal),
        "double" | "float" => match value {
            "INF" | "+INF" => Some(Numeric::Double(f64::INFINITY)),
            "-INF" => Some(Numeric::Double(f64::NEG_INFINITY)),
            "NaN" => Some(Numeric::Double(f64::NAN)),
            other => other.parse().ok().map(Numeric::Double),
        },
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

fn arithmetic(left: Term, right: Term, operator: Operator) -> Option<Term> {
    let (left, right) = (numeric(&left)?, numeric(&right)?);
    let result = match (left, right) {
        (Numeric::Integer(a), Numeric::Integer(b)) => match operator {
            Operator::Add => Numeric::Integer(a.checked_add(b)?),
            Operator::Subtract => Numeric::Integer(a.checked_sub(b)?),
            Operator::Multiply => Numeric::Integer(a.checked_mul(b)?),
            Operator::Divide if b == 0 => return None,
            Operator::Divide => Numeric::Decimal(a as f64 / b as f64),
        },
        (a, b) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let value = match operator {
                Operator::Add => x + y,
                Operator::Subtract => x - y,
                Operator::Multiply => x * y,
                Operator::Divide => x / y,
            };
            if matches!(a, Numeric::Double(_)) || matches!(b, Numeric::Double(_)) {
                Numeric::Double(value)
            } else if matches!(operator, Operator::Divide) && y == 0.0 {
                return None;
            } else {
                Numeric::Decimal(value)
            }
        }
    };
    Some(result.into_term())
}

fn compare_numeric(left: Numeric, right: Numeric) -> Option<Ordering> {
    match (left, right) {
        (Numeric::Integer(a), Numeric::Integer(b)) => Some(a.cmp(&b)),
        (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

/// `=` on RDF terms; `None` when the operands cannot be compared
fn terms_equal(left: &Term, right: &Term) -> Option<bool> {
    if let (Some(a), Some(b)) = (numeric(left), numeric(right)) {
        return Some(compare_numeric(a, b) == Some(Ordering::Equal));
    }
    Some(left == right)
}

/// `<` and friends: numbers, strings, booleans and date/times of the same type
fn compare_terms(left: &Term, right: &Term) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (numeric(left), numeric(right)) {
        return compare_numeric(a, b);
    }
    match (left, right) {
        (Term::Literal(a), Term::Literal(b))
            if a.datatype() == b.datatype() && a.language() == b.language() =>
        {
            let comparable = a.datatype().as_str() == RDF_LANG_STRING
                || matches!(
                    a.datatype().as_str().strip_prefix(XSD),
                    Some("string" | "boolean" | "dateTime" | "date" | "time")
                );
            comparable.then(|| a.value().cmp(b.value()))
        }
        _ => None,
    }
}

/// Total order used by ORDER BY: unbound, blank nodes, IRIs, numbers, other literals
pub(super) fn order_terms(left: Option<&Term>, right: Option<&Term>) -> Ordering {
    let (left, right) = match (left, right) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(left), Some(right)) => (left, right),
    };
    order_rank(left).cmp(&order_rank(right)).then_with(|| match (left, right) {
        (Term::Literal(a), Term::Literal(b)) => match (numeric(left), numeric(right)) {
            (Some(x), Some(y)) => x.as_f64().total_cmp(&y.as_f64()),
            _ => (a.datatype().as_str(), a.language(), a.value())
                .cmp(&(b.datatype().as_str(), b.language(), b.value())),
        },
        _ => left.to_string().cmp(&right.to_string()),
    })
}

fn order_rank(term: &Term) -> u8 {
    #[allow(unreachable_patterns)]
    match term {
        Term::BlankNode(_) => 0,
        Term::NamedNode(_) => 1,
        Term::Literal(_) if numeric(term).is_some() => 2,
        Term::Literal(_) => 3,
        _ => 4,
    }
}

/// Literal of type xsd:string or rdf:langString
fn string_literal(term: &Term) -> Option<&Literal> {
    match term {
        Term::Literal(literal)
            if literal.language().is_some()
                || literal.datatype().as_str().strip_prefix(XSD) == Some("string") =>
        {
            Some(literal)
        }
        _ => None,
    }
}

fn plain_string(term: &Term) -> Option<&str> {
    string_literal(term).map(Literal::value)
}

/// Argument pair of the string functions: the second may not carry a different language
fn compatible_strings<'a>(left: &'a Term, right: &'a Term) -> Option<(&'a str, &'a str)> {
    let (a, b) = (string_literal(left)?, string_literal(right)?);
    match (a.language(), b.language()) {
        (_, None) => Some((a.value(), b.value())),
        (Some(x), Some(y)) if x == y => Some((a.value(), b.value())),
        _ => None,
    }
}

fn same_language(source: &Term, value: &str) -> Option<Term> {
    let literal = string_literal(source)?;
    Some(match literal.language() {
        Some(language) => Literal::new_language_tagged_literal_unchecked(value, language).into(),
        None => simple(value),
    })
}

fn map_string(term: &Term, f: impl Fn(&str) -> String) -> Option<Term> {
    same_language(term, &f(string_literal(term)?.value()))
}

fn substring(source: &Term, start: &Term, length: Option<&Term>) -> Option<Term> {
    let text = string_literal(source)?.value();
    let start = numeric(start)?.as_f64().round();
    let end = match length {
        Some(length) => start + numeric(length)?.as_f64().round(),
        None => f64::INFINITY,
    };
    let value: String = text
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let position = (*i + 1) as f64;
            position >= start && position < end
        })
        .map(|(_, c)| c)
        .collect();
    same_language(source, &value)
}

fn lang_matches(tag: &str, range: &str) -> bool {
    if range == "*" {
        return !tag.is_empty();
    }
    let tag = tag.to_ascii_lowercase();
    let range = range.to_ascii_lowercase();
    tag == range || tag.starts_with(&format!("{range}-"))
}

fn build_regex(pattern: &Term, flags: Option<&Term>) -> Option<Regex> {
    let mut builder = RegexBuilder::new(plain_string(pattern)?);
    let flags = match flags {
        Some(flags) => plain_string(flags)?,
        None => "",
    };
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            _ => return None,
        }
    }
    builder.build().ok()
}

fn regex_match(text: &Term, pattern: &Term, flags: Option<&Term>) -> Option<Term> {
    let text = plain_string(text)?;
    Some(boolean(build_regex(pattern, flags)?.is_match(text)))
}

fn regex_replace(text: &Term, pattern: &Term, replacement: &Term, flags: Option<&Term>) -> Option<Term> {
    let regex = build_regex(pattern, flags)?;
    let value = regex.replace_all(plain_string(text)?, plain_string(replacement)?);
    same_language(text, &value)
}
