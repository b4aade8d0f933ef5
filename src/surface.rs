//! S-expression surface syntax for programs.
//!
//! A program source is a sequence of top-level forms: `(root <term>)`,
//! `(rules (rule <name> (pattern ...) (action ...)) ...)`, `(max_steps N)`,
//! and `(max_terms N)`, optionally wrapped in `(program <name> ...)` to
//! name the program. Semicolons start comments that run to end of line.
//!
//! Terms are bare symbols or `(symbol :scale N child...)`; a missing
//! `:scale` means scale 0. Patterns take `:sym` and `:scale` keys, at least
//! one of which must be present. Actions are `(action expand :fanout N)`,
//! `(action reduce)`, or `(action <name> :key value ...)` for custom
//! actions.

use crate::program::Program;
use crate::rewrite::{Action, ActionParams, Pattern, Rule};
use crate::term::Term;
use std::fmt;

/// Default program name for sources without a `(program ...)` wrapper.
const DEFAULT_PROGRAM_NAME: &str = "octave";

/// Default fanout for `expand` actions that do not declare one.
const DEFAULT_FANOUT: usize = 3;

/// Error raised while parsing program source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// An opening parenthesis was never closed.
    UnbalancedParens,
    /// A closing parenthesis appeared with no matching opener.
    UnexpectedClose,
    /// The source held no top-level forms.
    EmptySource,
    /// No `(root ...)` form was present.
    MissingRoot,
    /// A term expression was malformed.
    InvalidTerm(String),
    /// A pattern expression was malformed.
    InvalidPattern(String),
    /// A pattern constrained neither symbol nor scale.
    EmptyPattern,
    /// An action expression was malformed.
    InvalidAction(String),
    /// A rule expression was malformed.
    InvalidRule(String),
    /// An integer field did not parse.
    InvalidNumber(String),
    /// A scale literal was negative.
    NegativeScale(i64),
    /// An `expand` action declared a zero fanout.
    ZeroFanout,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnbalancedParens => f.write_str("unbalanced parentheses in source"),
            ParseError::UnexpectedClose => f.write_str("unexpected ')'"),
            ParseError::EmptySource => f.write_str("source contains no forms"),
            ParseError::MissingRoot => f.write_str("program missing root term"),
            ParseError::InvalidTerm(msg) => write!(f, "invalid term expression: {}", msg),
            ParseError::InvalidPattern(msg) => write!(f, "invalid pattern expression: {}", msg),
            ParseError::EmptyPattern => {
                f.write_str("pattern must constrain at least one of :sym, :scale")
            }
            ParseError::InvalidAction(msg) => write!(f, "invalid action expression: {}", msg),
            ParseError::InvalidRule(msg) => write!(f, "invalid rule expression: {}", msg),
            ParseError::InvalidNumber(msg) => write!(f, "invalid integer: {}", msg),
            ParseError::NegativeScale(scale) => write!(f, "scale cannot be negative: {}", scale),
            ParseError::ZeroFanout => f.write_str("expand requires :fanout >= 1"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parsed S-expression node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sexp {
    /// A bare token.
    Atom(String),
    /// A parenthesized sequence.
    List(Vec<Sexp>),
}

impl Sexp {
    fn as_atom(&self) -> Option<&str> {
        match self {
            Sexp::Atom(s) => Some(s),
            Sexp::List(_) => None,
        }
    }
}

/// Strips semicolon comments and splits the source into tokens.
///
/// Parentheses are their own tokens; everything else splits on whitespace.
fn tokenize(src: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for line in src.lines() {
        let uncommented = line.split(';').next().unwrap_or("");
        let mut current = String::new();
        for ch in uncommented.chars() {
            match ch {
                '(' | ')' => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                    tokens.push(ch.to_string());
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

/// Reads every top-level form from a token stream.
fn read_forms(tokens: &[String]) -> Result<Vec<Sexp>, ParseError> {
    let mut pos = 0;
    let mut forms = Vec::new();
    while pos < tokens.len() {
        let (form, next) = read_one(tokens, pos)?;
        forms.push(form);
        pos = next;
    }
    Ok(forms)
}

fn read_one(tokens: &[String], pos: usize) -> Result<(Sexp, usize), ParseError> {
    match tokens.get(pos).map(String::as_str) {
        None => Err(ParseError::UnbalancedParens),
        Some(")") => Err(ParseError::UnexpectedClose),
        Some("(") => {
            let mut items = Vec::new();
            let mut cursor = pos + 1;
            loop {
                match tokens.get(cursor).map(String::as_str) {
                    None => return Err(ParseError::UnbalancedParens),
                    Some(")") => return Ok((Sexp::List(items), cursor + 1)),
                    Some(_) => {
                        let (item, next) = read_one(tokens, cursor)?;
                        items.push(item);
                        cursor = next;
                    }
                }
            }
        }
        Some(atom) => Ok((Sexp::Atom(atom.to_string()), pos + 1)),
    }
}

fn parse_integer(atom: &Sexp) -> Result<i64, ParseError> {
    let text = atom
        .as_atom()
        .ok_or_else(|| ParseError::InvalidNumber(format!("{:?}", atom)))?;
    text.parse::<i64>()
        .map_err(|_| ParseError::InvalidNumber(text.to_string()))
}

fn parse_scale(atom: &Sexp) -> Result<u32, ParseError> {
    let value = parse_integer(atom)?;
    if value < 0 {
        return Err(ParseError::NegativeScale(value));
    }
    Ok(value as u32)
}

/// Renders a symbol from the value expressions following a `:sym` key.
///
/// The tokenizer splits `F(A)` into `F`, `(`, `A`, `)`, which the reader
/// reassembles as an atom followed by a list; this renders it back to the
/// written symbol.
fn symbol_from_exprs(values: &[Sexp]) -> Result<String, ParseError> {
    match values {
        [Sexp::Atom(sym)] => Ok(sym.clone()),
        [Sexp::Atom(head), Sexp::List(args)] => {
            let rendered: Result<Vec<String>, ParseError> =
                args.iter().map(|arg| symbol_from_exprs(std::slice::from_ref(arg))).collect();
            Ok(format!("{}({})", head, rendered?.join(",")))
        }
        other => Err(ParseError::InvalidPattern(format!("unrenderable symbol: {:?}", other))),
    }
}

/// Parses a term expression: a bare symbol or `(symbol :scale N child...)`.
pub fn parse_term(expr: &Sexp) -> Result<Term, ParseError> {
    let items = match expr {
        Sexp::Atom(sym) => return Ok(Term::leaf(sym.clone(), 0)),
        Sexp::List(items) if !items.is_empty() => items,
        Sexp::List(_) => return Err(ParseError::InvalidTerm("empty list".to_string())),
    };
    let sym = items[0]
        .as_atom()
        .ok_or_else(|| ParseError::InvalidTerm("symbol must be an atom".to_string()))?
        .to_string();

    let mut scale = 0;
    let mut children = Vec::new();
    let mut cursor = 1;
    while cursor < items.len() {
        if items[cursor].as_atom() == Some(":scale") {
            let value = items
                .get(cursor + 1)
                .ok_or_else(|| ParseError::InvalidTerm("missing :scale value".to_string()))?;
            scale = parse_scale(value)?;
            cursor += 2;
        } else {
            children.push(parse_term(&items[cursor])?);
            cursor += 1;
        }
    }
    Ok(Term::new(sym, scale, children))
}

/// Parses a pattern expression: `(pattern :sym S :scale N)`.
pub fn parse_pattern(expr: &Sexp) -> Result<Pattern, ParseError> {
    let Sexp::List(items) = expr else {
        return Err(ParseError::InvalidPattern("pattern must be a list".to_string()));
    };
    let body = match items.first().and_then(Sexp::as_atom) {
        Some("pattern") => &items[1..],
        _ => &items[..],
    };

    let mut pattern = Pattern::default();
    let mut cursor = 0;
    while cursor < body.len() {
        let key = body[cursor]
            .as_atom()
            .filter(|atom| atom.starts_with(':'))
            .ok_or_else(|| {
                ParseError::InvalidPattern(format!("expected a key, got {:?}", body[cursor]))
            })?
            .to_string();
        cursor += 1;
        let value_start = cursor;
        while cursor < body.len()
            && !matches!(body[cursor].as_atom(), Some(atom) if atom.starts_with(':'))
        {
            cursor += 1;
        }
        let values = &body[value_start..cursor];
        if values.is_empty() {
            return Err(ParseError::InvalidPattern(format!("missing value for {}", key)));
        }
        match key.as_str() {
            ":sym" => pattern.sym = Some(symbol_from_exprs(values)?),
            ":scale" => pattern = pattern.at_scale(parse_scale(&values[0])?),
            other => {
                return Err(ParseError::InvalidPattern(format!("unknown pattern key: {}", other)))
            }
        }
    }

    if pattern.sym.is_none() && pattern.scale.is_none() {
        return Err(ParseError::EmptyPattern);
    }
    Ok(pattern)
}

/// Parses an action expression.
pub fn parse_action(expr: &Sexp) -> Result<Action, ParseError> {
    let Sexp::List(items) = expr else {
        return Err(ParseError::InvalidAction("action must be a list".to_string()));
    };
    let body = match items.first().and_then(Sexp::as_atom) {
        Some("action") => &items[1..],
        _ => &items[..],
    };
    let name = body
        .first()
        .and_then(Sexp::as_atom)
        .ok_or_else(|| ParseError::InvalidAction("missing action name".to_string()))?;
    let args = &body[1..];

    match name {
        "expand" => {
            let mut fanout = DEFAULT_FANOUT;
            let mut cursor = 0;
            while cursor < args.len() {
                if args[cursor].as_atom() == Some(":fanout") {
                    let value = args.get(cursor + 1).ok_or_else(|| {
                        ParseError::InvalidAction("missing :fanout value".to_string())
                    })?;
                    let parsed = parse_integer(value)?;
                    if parsed < 1 {
                        return Err(ParseError::ZeroFanout);
                    }
                    fanout = parsed as usize;
                    cursor += 2;
                } else {
                    cursor += 1;
                }
            }
            Ok(Action::Expand { fanout })
        }
        "reduce" => Ok(Action::Reduce),
        custom => {
            let mut params = ActionParams::new();
            let mut cursor = 0;
            while cursor < args.len() {
                let key = args[cursor]
                    .as_atom()
                    .filter(|atom| atom.starts_with(':'))
                    .ok_or_else(|| {
                        ParseError::InvalidAction(format!(
                            "expected a parameter key, got {:?}",
                            args[cursor]
                        ))
                    })?;
                let value = args.get(cursor + 1).ok_or_else(|| {
                    ParseError::InvalidAction(format!("missing value for {}", key))
                })?;
                let atom = value.as_atom().ok_or_else(|| {
                    ParseError::InvalidAction(format!("parameter {} must be an atom", key))
                })?;
                let json = match atom.parse::<i64>() {
                    Ok(n) => serde_json::json!(n),
                    Err(_) => match atom {
                        "true" => serde_json::json!(true),
                        "false" => serde_json::json!(false),
                        text => serde_json::json!(text),
                    },
                };
                params.insert(key.trim_start_matches(':').to_string(), json);
                cursor += 2;
            }
            Ok(Action::Custom { name: custom.to_string(), params })
        }
    }
}

/// Parses a rule expression: `(rule <name> (pattern ...) (action ...))`.
pub fn parse_rule(expr: &Sexp) -> Result<Rule, ParseError> {
    let Sexp::List(items) = expr else {
        return Err(ParseError::InvalidRule("rule must be a list".to_string()));
    };
    match items.as_slice() {
        [head, name, pattern_expr, action_expr]
            if head.as_atom() == Some("rule") && name.as_atom().is_some() =>
        {
            Ok(Rule::new(
                name.as_atom().unwrap(),
                parse_pattern(pattern_expr)?,
                parse_action(action_expr)?,
            ))
        }
        _ => Err(ParseError::InvalidRule(format!("{:?}", expr))),
    }
}

/// Parses a whole program source.
///
/// Accepts either a `(program <name> ...)` wrapper or a bare sequence of
/// top-level forms; the bare form gets the default name. Unrecognized
/// top-level forms are ignored, which keeps old sources loadable as the
/// syntax grows.
pub fn parse_program(src: &str) -> Result<Program, ParseError> {
    let mut forms = read_forms(&tokenize(src))?;
    if forms.is_empty() {
        return Err(ParseError::EmptySource);
    }

    let mut name = DEFAULT_PROGRAM_NAME.to_string();
    let wraps_program = match forms.as_slice() {
        [Sexp::List(items)] => items.first().and_then(Sexp::as_atom) == Some("program"),
        _ => false,
    };
    let top: Vec<Sexp> = if wraps_program {
        let Some(Sexp::List(items)) = forms.pop() else {
            return Err(ParseError::EmptySource);
        };
        let mut rest = items;
        rest.remove(0);
        if let Some(Sexp::Atom(program_name)) = rest.first() {
            name = program_name.clone();
            rest.remove(0);
        }
        rest
    } else {
        forms
    };

    let mut root = None;
    let mut rules = Vec::new();
    let mut max_steps = None;
    let mut max_terms = None;

    for form in &top {
        let Sexp::List(items) = form else { continue };
        match items.first().and_then(Sexp::as_atom) {
            Some("root") => match items.as_slice() {
                [_, term_expr] => root = Some(parse_term(term_expr)?),
                _ => {
                    return Err(ParseError::InvalidTerm(
                        "(root ...) expects a single term".to_string(),
                    ))
                }
            },
            Some("rules") => {
                for rule_expr in &items[1..] {
                    rules.push(parse_rule(rule_expr)?);
                }
            }
            Some("max_steps") => match items.as_slice() {
                [_, value] => max_steps = Some(parse_integer(value)?),
                _ => {
                    return Err(ParseError::InvalidNumber(
                        "(max_steps N) expects a single integer".to_string(),
                    ))
                }
            },
            Some("max_terms") => match items.as_slice() {
                [_, value] => max_terms = Some(parse_integer(value)?),
                _ => {
                    return Err(ParseError::InvalidNumber(
                        "(max_terms N) expects a single integer".to_string(),
                    ))
                }
            },
            _ => {}
        }
    }

    let root = root.ok_or(ParseError::MissingRoot)?;
    let mut program = Program::new(name, root, rules);
    if let Some(steps) = max_steps {
        if steps < 0 {
            return Err(ParseError::InvalidNumber(steps.to_string()));
        }
        program.max_steps = steps as usize;
    }
    if let Some(terms) = max_terms {
        if terms < 0 {
            return Err(ParseError::InvalidNumber(terms.to_string()));
        }
        program.max_terms = Some(terms as usize);
    }
    Ok(program)
}
