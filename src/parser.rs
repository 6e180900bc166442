// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::lexer::*;
use crate::number::Number;
use crate::value::*;
use crate::Rc;

use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Result};

#[derive(Clone)]
pub struct Parser<'source> {
    source: Source,
    lexer: Lexer<'source>,
    tok: Token,
    // Line and end offset of the previous token.
    line: u32,
    end: u32,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source Source) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        let tok = lexer.next_token()?;
        Ok(Self {
            source: source.clone(),
            lexer,
            tok,
            line: 0,
            end: 0,
        })
    }

    pub fn token_text(&self) -> &str {
        match self.tok.0 {
            TokenKind::Symbol | TokenKind::Number | TokenKind::Ident | TokenKind::Eof => {
                self.tok.1.text()
            }
            TokenKind::String | TokenKind::RawString => "",
        }
    }

    fn is_symbol(&self, s: &str) -> bool {
        self.tok.0 == TokenKind::Symbol && self.tok.1.text() == s
    }

    fn is_ident(&self, s: &str) -> bool {
        self.tok.0 == TokenKind::Ident && self.tok.1.text() == s
    }

    fn at_eof(&self) -> bool {
        self.tok.0 == TokenKind::Eof
    }

    pub fn next_token(&mut self) -> Result<()> {
        self.line = self.tok.1.line;
        self.end = self.tok.1.end;
        self.tok = self.lexer.next_token()?;
        Ok(())
    }

    fn error_here(&self, msg: &str) -> anyhow::Error {
        self.source.error(self.tok.1.line, self.tok.1.col, msg)
    }

    fn expect(&mut self, text: &str, context: &str) -> Result<()> {
        if self.token_text() == text && self.tok.0 != TokenKind::Eof {
            self.next_token()
        } else {
            Err(self.error_here(&format!("expecting `{text}` {context}")))
        }
    }

    fn location(&self) -> Option<Location> {
        Some(self.tok.1.location())
    }

    fn is_keyword(ident: &str) -> bool {
        matches!(
            ident,
            "as" | "contains"
                | "default"
                | "else"
                | "every"
                | "false"
                | "if"
                | "import"
                | "in"
                | "not"
                | "null"
                | "package"
                | "some"
                | "true"
                | "with"
        )
    }

    fn parse_var(&mut self) -> Result<Var> {
        let span = self.tok.1.clone();
        match self.tok.0 {
            TokenKind::Ident if Self::is_keyword(span.text()) => {
                Err(self.error_here(&format!("unexpected keyword `{}`", span.text())))
            }
            TokenKind::Ident => {
                self.next_token()?;
                Ok(Var::new(span.text()))
            }
            _ => Err(self.error_here("expecting identifier")),
        }
    }

    fn read_number(span: &Span) -> Result<Number> {
        match Number::from_str(span.text()) {
            Ok(n) => Ok(n),
            Err(_) => bail!(span.error("could not parse number")),
        }
    }

    fn read_string(span: &Span) -> Result<Value> {
        match serde_json::from_str::<String>(&format!("\"{}\"", span.text())) {
            Ok(s) => Ok(Value::from(s)),
            Err(e) => bail!(span.error(&format!("invalid string literal. {e}"))),
        }
    }

    fn parse_scalar_or_var(&mut self) -> Result<Term> {
        let span = self.tok.1.clone();
        let location = Some(span.location());
        let value = match self.tok.0 {
            TokenKind::Number => Value::Number(Self::read_number(&span)?),
            TokenKind::String => Self::read_string(&span)?,
            TokenKind::RawString => Value::from(span.text()),
            TokenKind::Ident => match span.text() {
                "null" => Value::Null,
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => {
                    let v = self.parse_var()?;
                    return Ok(Term::with_location(Value::Var(v), location));
                }
            },
            _ => return Err(self.error_here("expecting expression")),
        };
        self.next_token()?;
        Ok(Term::with_location(value, location))
    }

    fn parse_term_list(&mut self, end_delim: &str, context: &str) -> Result<Vec<Term>> {
        let mut items = vec![];
        while !self.is_symbol(end_delim) {
            items.push(self.parse_in_expr()?);
            if self.is_symbol(",") {
                self.next_token()?;
            } else {
                break;
            }
        }
        self.expect(end_delim, context)?;
        Ok(items)
    }

    // Comprehension heads are parsed below the set-union level so that the
    // `|` separator is not consumed as an operator.
    fn try_parse_compr_head(&mut self) -> Option<Term> {
        let state = self.clone();
        match self.parse_and_expr() {
            Ok(t) if self.is_symbol("|") => Some(t),
            _ => {
                *self = state;
                None
            }
        }
    }

    fn parse_compr_or_array(&mut self) -> Result<Term> {
        let location = self.location();
        self.expect("[", "while parsing array or comprehension")?;

        if let Some(term) = self.try_parse_compr_head() {
            self.next_token()?;
            let body = self.parse_query("]")?;
            let compr = ArrayComprehension { term, body };
            return Ok(Term::with_location(
                Value::ArrayCompr(Rc::new(compr)),
                location,
            ));
        }

        let items = self.parse_term_list("]", "while parsing array")?;
        Ok(Term::with_location(Value::Array(Rc::new(items)), location))
    }

    fn parse_compr_set_or_object(&mut self) -> Result<Term> {
        let location = self.location();
        self.expect("{", "while parsing set, object or comprehension")?;

        if self.is_symbol("}") {
            self.next_token()?;
            return Ok(Term::with_location(Value::new_object(), location));
        }

        if let Some(term) = self.try_parse_compr_head() {
            self.next_token()?;
            let body = self.parse_query("}")?;
            let compr = SetComprehension { term, body };
            return Ok(Term::with_location(
                Value::SetCompr(Rc::new(compr)),
                location,
            ));
        }

        let first = self.parse_in_expr()?;
        if !self.is_symbol(":") {
            let mut items = BTreeSet::new();
            items.insert(first);
            if self.is_symbol(",") {
                self.next_token()?;
                items.extend(self.parse_term_list("}", "while parsing set")?);
            } else {
                self.expect("}", "while parsing set")?;
            }
            return Ok(Term::with_location(Value::Set(Rc::new(items)), location));
        }
        self.next_token()?;

        if let Some(value) = self.try_parse_compr_head() {
            self.next_token()?;
            let body = self.parse_query("}")?;
            let compr = ObjectComprehension {
                key: first,
                value,
                body,
            };
            return Ok(Term::with_location(
                Value::ObjectCompr(Rc::new(compr)),
                location,
            ));
        }

        let mut fields = BTreeMap::new();
        fields.insert(first, self.parse_in_expr()?);
        while self.is_symbol(",") {
            self.next_token()?;
            if self.is_symbol("}") {
                break;
            }
            let key = self.parse_in_expr()?;
            self.expect(":", "while parsing object item")?;
            let value = self.parse_in_expr()?;
            fields.insert(key, value);
        }
        self.expect("}", "while parsing object")?;
        Ok(Term::with_location(Value::Object(Rc::new(fields)), location))
    }

    fn parse_empty_set(&mut self) -> Result<Term> {
        let location = self.location();
        self.next_token()?;
        self.expect("(", "while parsing empty set")?;
        self.expect(")", "while parsing empty set")?;
        Ok(Term::with_location(Value::new_set(), location))
    }

    fn parse_parens_expr(&mut self) -> Result<Term> {
        self.next_token()?;
        let term = self.parse_in_expr()?;
        self.expect(")", "while parsing parenthesized expression")?;
        Ok(term)
    }

    fn parse_unary_expr(&mut self) -> Result<Term> {
        let location = self.location();
        let minus_end = self.tok.1.end;
        self.next_token()?;
        if self.tok.0 == TokenKind::Number && self.tok.1.start == minus_end {
            let n = Self::read_number(&self.tok.1)?;
            self.next_token()?;
            return Ok(Term::with_location(Value::Number(n.neg()), location));
        }
        let operand = self.parse_ref()?;
        let zero = Term::with_location(Value::from(0), location.clone());
        Ok(Term::with_location(
            Value::Call(Rc::new(vec![operator("minus"), zero, operand])),
            location,
        ))
    }

    fn parse_ref(&mut self) -> Result<Term> {
        let location = self.location();
        let head = match self.tok.0 {
            TokenKind::Symbol => match self.token_text() {
                "[" => self.parse_compr_or_array()?,
                "{" => self.parse_compr_set_or_object()?,
                "(" => return self.parse_parens_expr(),
                "-" => return self.parse_unary_expr(),
                _ => return Err(self.error_here("expecting expression")),
            },
            TokenKind::Ident if self.is_ident("set") => {
                let mut peek = self.clone();
                peek.next_token()?;
                if peek.is_symbol("(") && peek.tok.1.start == self.tok.1.end {
                    peek.next_token()?;
                    if peek.is_symbol(")") {
                        return self.parse_empty_set();
                    }
                }
                self.parse_scalar_or_var()?
            }
            _ => self.parse_scalar_or_var()?,
        };

        let mut terms = vec![head];
        loop {
            match self.token_text() {
                "." | "[" if self.tok.0 == TokenKind::Symbol && self.tok.1.start != self.end => {
                    if self.line != self.tok.1.line {
                        // Newline encountered. This could be a separate literal.
                        break;
                    }
                    return Err(self.error_here(&format!(
                        "invalid whitespace before {}",
                        self.token_text()
                    )));
                }
                "." if self.tok.0 == TokenKind::Symbol => {
                    let sep_end = self.tok.1.end;
                    self.next_token()?;
                    if self.tok.0 != TokenKind::Ident || self.tok.1.start != sep_end {
                        return Err(self.error_here("expecting identifier after `.`"));
                    }
                    let field = Term::with_location(
                        Value::from(self.tok.1.text()),
                        Some(self.tok.1.location()),
                    );
                    self.next_token()?;
                    terms.push(field);
                }
                "[" if self.tok.0 == TokenKind::Symbol => {
                    self.next_token()?;
                    let index = self.parse_in_expr()?;
                    self.expect("]", "while parsing bracketed reference")?;
                    terms.push(index);
                }
                "(" if self.tok.0 == TokenKind::Symbol
                    && self.tok.1.start == self.end
                    && Self::is_callable(&terms) =>
                {
                    self.next_token()?;
                    let args = self.parse_term_list(")", "while parsing call")?;
                    let op = Term::with_location(
                        Value::Ref(Rc::new(core::mem::take(&mut terms))),
                        location.clone(),
                    );
                    let mut call = vec![op];
                    call.extend(args);
                    let call = Term::with_location(Value::Call(Rc::new(call)), location.clone());
                    // A call can still be dereferenced: f(x).y
                    terms = vec![call];
                }
                _ => break,
            }
        }

        if terms.len() == 1 {
            if let Some(t) = terms.pop() {
                return Ok(t);
            }
        }
        Ok(Term::with_location(Value::Ref(Rc::new(terms)), location))
    }

    fn is_callable(terms: &[Term]) -> bool {
        matches!(terms.first().map(|t| &t.value), Some(Value::Var(_)))
            && terms[1..]
                .iter()
                .all(|t| matches!(t.value, Value::String(_)))
    }

    fn binary(op: &str, lhs: Term, rhs: Term) -> Term {
        let location = lhs.location.clone();
        Term::with_location(
            Value::Call(Rc::new(vec![operator(op), lhs, rhs])),
            location,
        )
    }

    fn parse_mul_div_mod_expr(&mut self) -> Result<Term> {
        let mut expr = self.parse_ref()?;
        loop {
            let op = match self.token_text() {
                "*" => "mul",
                "/" => "div",
                "%" => "rem",
                _ => return Ok(expr),
            };
            self.next_token()?;
            let rhs = self.parse_ref()?;
            expr = Self::binary(op, expr, rhs);
        }
    }

    fn parse_arith_expr(&mut self) -> Result<Term> {
        let mut expr = self.parse_mul_div_mod_expr()?;
        loop {
            let op = match self.token_text() {
                "+" => "plus",
                "-" => "minus",
                _ => return Ok(expr),
            };
            self.next_token()?;
            let rhs = self.parse_mul_div_mod_expr()?;
            expr = Self::binary(op, expr, rhs);
        }
    }

    fn parse_and_expr(&mut self) -> Result<Term> {
        let mut expr = self.parse_arith_expr()?;
        while self.is_symbol("&") {
            self.next_token()?;
            let rhs = self.parse_arith_expr()?;
            expr = Self::binary("and", expr, rhs);
        }
        Ok(expr)
    }

    fn parse_or_expr(&mut self) -> Result<Term> {
        let mut expr = self.parse_and_expr()?;
        while self.is_symbol("|") {
            self.next_token()?;
            let rhs = self.parse_and_expr()?;
            expr = Self::binary("or", expr, rhs);
        }
        Ok(expr)
    }

    fn parse_bool_expr(&mut self) -> Result<Term> {
        let mut expr = self.parse_or_expr()?;
        loop {
            let op = match self.token_text() {
                "==" => "equal",
                "!=" => "neq",
                "<" => "lt",
                "<=" => "lte",
                ">" => "gt",
                ">=" => "gte",
                _ => return Ok(expr),
            };
            if self.tok.0 != TokenKind::Symbol {
                return Ok(expr);
            }
            self.next_token()?;
            let rhs = self.parse_or_expr()?;
            expr = Self::binary(op, expr, rhs);
        }
    }

    fn parse_in_expr(&mut self) -> Result<Term> {
        let mut expr = self.parse_bool_expr()?;
        while self.is_ident("in") {
            self.next_token()?;
            let collection = self.parse_bool_expr()?;
            expr = Self::binary("internal.member_2", expr, collection);
        }
        Ok(expr)
    }

    fn parse_some(&mut self) -> Result<Expr> {
        let location = self.location();
        self.expect("some", "while parsing some-decl")?;

        let mut terms = vec![self.parse_ref()?];
        while self.is_symbol(",") {
            self.next_token()?;
            terms.push(self.parse_ref()?);
        }

        if !self.is_ident("in") {
            for t in &terms {
                if !matches!(t.value, Value::Var(_)) {
                    let (line, col) = match &t.location {
                        Some(l) => (l.row, l.col),
                        None => (self.tok.1.line, self.tok.1.col),
                    };
                    bail!(self.source.error(
                        line,
                        col,
                        &format!("encountered `{t}` while expecting identifier")
                    ));
                }
            }
            return Ok(Expr::new(ExprTerms::Some(terms), location));
        }

        self.next_token()?;
        let collection = self.parse_bool_expr()?;
        let op = match terms.len() {
            1 => "internal.member_2",
            2 => "internal.member_3",
            _ => bail!(self.source.error(
                self.line,
                1,
                "`some ... in` accepts at most a key and a value"
            )),
        };
        let mut call = vec![operator(op)];
        call.extend(terms);
        call.push(collection);
        let member = Term::with_location(Value::Call(Rc::new(call)), location.clone());
        Ok(Expr::new(ExprTerms::Some(vec![member]), location))
    }

    fn parse_literal(&mut self) -> Result<Expr> {
        match self.token_text() {
            "some" if self.tok.0 == TokenKind::Ident => return self.parse_some(),
            "every" if self.tok.0 == TokenKind::Ident => {
                return Err(self.error_here("`every` is not supported"))
            }
            _ => (),
        }

        let location = self.location();
        let negated = if self.is_ident("not") {
            self.next_token()?;
            true
        } else {
            false
        };

        let lhs = self.parse_in_expr()?;
        let terms = if !negated && self.is_symbol(",") {
            // k, v in xs
            self.next_token()?;
            let value = self.parse_bool_expr()?;
            if !self.is_ident("in") {
                return Err(self.error_here("expecting `in`"));
            }
            self.next_token()?;
            let collection = self.parse_bool_expr()?;
            ExprTerms::Call(vec![
                operator("internal.member_3"),
                lhs,
                value,
                collection,
            ])
        } else if self.is_symbol("=") || self.is_symbol(":=") {
            let op = match self.token_text() {
                "=" => EQ,
                _ => ASSIGN,
            };
            self.next_token()?;
            let rhs = self.parse_in_expr()?;
            ExprTerms::Call(vec![operator(op), lhs, rhs])
        } else {
            match lhs.value {
                Value::Call(terms) => ExprTerms::Call(terms.as_ref().clone()),
                _ => ExprTerms::Term(lhs),
            }
        };

        if self.is_ident("with") {
            return Err(self.error_here("`with` modifiers are not supported"));
        }

        let mut expr = Expr::new(terms, location);
        expr.negated = negated;
        Ok(expr)
    }

    /// Literals separated by `;` or newlines, up to `end_delim` (consumed) or
    /// end of input when `end_delim` is empty.
    fn parse_query(&mut self, end_delim: &str) -> Result<Body> {
        let mut body = vec![];
        loop {
            if (end_delim.is_empty() && self.at_eof()) || self.is_symbol(end_delim) {
                if body.is_empty() {
                    return Err(self.error_here("found empty query"));
                }
                break;
            }
            let index = body.len();
            body.push(self.parse_literal()?.with_index(index));

            if self.is_symbol(";") {
                self.next_token()?;
            } else if !(self.at_eof() || self.is_symbol(end_delim) || self.line != self.tok.1.line)
            {
                return Err(self.error_here("expecting `;` or newline between expressions"));
            }
        }
        if !end_delim.is_empty() {
            self.expect(end_delim, "while parsing query")?;
        }
        Ok(body)
    }

    /// `if { ... }`, `if <literal>` or `{ ... }`.
    fn parse_rule_body(&mut self) -> Result<Option<Body>> {
        if self.is_ident("if") {
            self.next_token()?;
            if self.is_symbol("{") {
                self.next_token()?;
                return Ok(Some(self.parse_query("}")?));
            }
            return Ok(Some(vec![self.parse_literal()?]));
        }
        if self.is_symbol("{") {
            self.next_token()?;
            return Ok(Some(self.parse_query("}")?));
        }
        Ok(None)
    }

    fn true_body(location: &Option<Location>) -> Body {
        vec![Expr::term(Term::with_location(
            Value::Bool(true),
            location.clone(),
        ))]
    }

    fn parse_rule_assign(&mut self) -> Result<Option<(bool, Term)>> {
        let assign = match self.token_text() {
            "=" if self.tok.0 == TokenKind::Symbol => false,
            ":=" => true,
            _ => return Ok(None),
        };
        self.next_token()?;
        Ok(Some((assign, self.parse_in_expr()?)))
    }

    fn parse_default_rule(&mut self) -> Result<Rule> {
        let location = self.location();
        self.expect("default", "while parsing default rule")?;
        let name = self.parse_rule_name()?;
        let args = if self.is_symbol("(") {
            self.next_token()?;
            self.parse_term_list(")", "while parsing default function args")?
        } else {
            vec![]
        };
        let (assign, value) = match self.parse_rule_assign()? {
            Some(v) => v,
            None => return Err(self.error_here("expecting `:=` or `=` after default rule name")),
        };
        if !value.is_ground() {
            bail!(self.source.error(
                value.location.as_ref().map_or(self.line, |l| l.row),
                value.location.as_ref().map_or(1, |l| l.col),
                "default rule value cannot contain variables, references or calls",
            ));
        }
        Ok(Rule {
            default: true,
            head: Head {
                name,
                args,
                key: None,
                value: Some(value),
                assign,
                location: location.clone(),
            },
            body: Self::true_body(&location),
            else_rule: None,
            location,
        })
    }

    fn parse_rule_name(&mut self) -> Result<Var> {
        let span = self.tok.1.clone();
        let name = self.parse_var()?;
        if name.is_root_document() {
            bail!(span.error(&format!("{name} cannot be shadowed")));
        }
        if self.is_symbol(".") {
            return Err(self.error_here("rule heads with nested refs are not supported"));
        }
        Ok(name)
    }

    fn parse_else(&mut self, head: &Head) -> Result<Option<Box<Rule>>> {
        if !self.is_ident("else") {
            return Ok(None);
        }
        let location = self.location();
        self.next_token()?;

        let (assign, value) = match self.parse_rule_assign()? {
            Some((assign, value)) => (assign, value),
            None => (head.assign, Term::with_location(Value::Bool(true), location.clone())),
        };
        let body = match self.parse_rule_body()? {
            Some(body) => body,
            None => Self::true_body(&location),
        };
        let head = Head {
            name: head.name.clone(),
            args: head.args.clone(),
            key: None,
            value: Some(value),
            assign,
            location: location.clone(),
        };
        let else_rule = self.parse_else(&head)?;
        Ok(Some(Box::new(Rule {
            default: false,
            head,
            body,
            else_rule,
            location,
        })))
    }

    pub fn parse_rule(&mut self) -> Result<Rule> {
        if self.is_ident("default") {
            return self.parse_default_rule();
        }

        let location = self.location();
        let name = self.parse_rule_name()?;

        let mut args = vec![];
        let mut key = None;
        let mut contains = false;
        if self.is_symbol("(") && self.tok.1.start == self.end {
            self.next_token()?;
            args = self.parse_term_list(")", "while parsing function args")?;
            if args.is_empty() {
                return Err(self.error_here("functions must take at least one argument"));
            }
        } else if self.is_symbol("[") && self.tok.1.start == self.end {
            self.next_token()?;
            key = Some(self.parse_in_expr()?);
            self.expect("]", "while parsing rule key")?;
        } else if self.is_ident("contains") {
            self.next_token()?;
            key = Some(self.parse_in_expr()?);
            contains = true;
        }

        if contains && (self.is_symbol("=") || self.is_symbol(":=")) {
            return Err(self.error_here("multi-value rules cannot have a value"));
        }
        let assignment = self.parse_rule_assign()?;
        let valued = assignment.is_some();
        let (assign, value) = match assignment {
            Some((assign, value)) => (assign, Some(value)),
            // `p[x] { ... }` and `p contains x` build sets.
            None if key.is_some() => (false, None),
            None => (false, Some(Term::with_location(Value::Bool(true), location.clone()))),
        };

        let body = match self.parse_rule_body()? {
            Some(body) => body,
            None if valued || contains => Self::true_body(&location),
            None => return Err(self.error_here("expecting rule body")),
        };

        let head = Head {
            name,
            args,
            key,
            value,
            assign,
            location: location.clone(),
        };
        let else_rule = match head.kind() {
            RuleKind::Complete | RuleKind::Function => self.parse_else(&head)?,
            _ => None,
        };

        Ok(Rule {
            default: false,
            head,
            body,
            else_rule,
            location,
        })
    }

    fn parse_package(&mut self) -> Result<Package> {
        let location = self.location();
        self.expect("package", "at start of module")?;
        let path = self.parse_path(Some("data"))?;
        Ok(Package { path, location })
    }

    // ident(.ident | ["string"])*
    fn parse_path(&mut self, root: Option<&str>) -> Result<Term> {
        let location = self.location();
        let mut terms = vec![];
        if let Some(r) = root {
            terms.push(Term::with_location(Value::Var(Var::new(r)), location.clone()));
        }
        let first = self.tok.1.clone();
        if self.tok.0 != TokenKind::Ident {
            return Err(self.error_here("expecting identifier"));
        }
        self.next_token()?;
        match root {
            Some(_) => terms.push(Term::with_location(
                Value::from(first.text()),
                Some(first.location()),
            )),
            None => terms.push(Term::with_location(
                Value::Var(Var::new(first.text())),
                Some(first.location()),
            )),
        }

        loop {
            if self.is_symbol(".") && self.tok.1.start == self.end {
                self.next_token()?;
                if self.tok.0 != TokenKind::Ident {
                    return Err(self.error_here("expecting identifier"));
                }
                terms.push(Term::with_location(
                    Value::from(self.tok.1.text()),
                    self.location(),
                ));
                self.next_token()?;
            } else if self.is_symbol("[") && self.tok.1.start == self.end {
                self.next_token()?;
                if self.tok.0 != TokenKind::String {
                    return Err(self.error_here("expected string"));
                }
                let s = Self::read_string(&self.tok.1)?;
                terms.push(Term::with_location(s, self.location()));
                self.next_token()?;
                self.expect("]", "while parsing path")?;
            } else {
                break;
            }
        }
        Ok(Term::with_location(Value::Ref(Rc::new(terms)), location))
    }

    fn parse_import(&mut self) -> Result<Import> {
        let location = self.location();
        self.expect("import", "while parsing import")?;
        let path = self.parse_path(None)?;
        let root = path
            .value
            .as_ref_terms()
            .and_then(|t| t.first())
            .and_then(Term::as_var)
            .map(|v| v.as_str().to_string())
            .unwrap_or_default();
        if !matches!(root.as_str(), "data" | "input" | "rego" | "future") {
            return Err(self.source.error(
                location.as_ref().map_or(1, |l| l.row),
                location.as_ref().map_or(1, |l| l.col),
                "import path must begin with `data`, `input`, `rego` or `future`",
            ));
        }
        let alias = if self.is_ident("as") {
            self.next_token()?;
            Some(self.parse_var()?)
        } else {
            None
        };
        Ok(Import {
            path,
            alias,
            location,
        })
    }

    pub fn parse(&mut self) -> Result<Module> {
        let package = self.parse_package()?;

        let mut imports = vec![];
        while self.is_ident("import") {
            imports.push(self.parse_import()?);
        }

        let mut rules = vec![];
        while !self.at_eof() {
            rules.push(self.parse_rule()?);
        }

        Ok(Module {
            package,
            imports,
            rules,
        })
    }

    /// Parses a standalone query such as `x := data.a.b; x > 1`.
    pub fn parse_user_query(&mut self) -> Result<Body> {
        self.parse_query("")
    }
}

/// Parses a module from text.
pub fn parse_module(file: &str, rego: &str) -> Result<Module> {
    let source = Source::new(file.to_string(), rego.to_string());
    let mut parser = Parser::new(&source)?;
    parser.parse()
}

/// Parses a query body from text.
pub fn parse_body(rego: &str) -> Result<Body> {
    let source = Source::new("<query.rego>".to_string(), rego.to_string());
    let mut parser = Parser::new(&source)?;
    parser.parse_user_query()
}

/// Parses a single rule from text.
pub fn parse_rule(rego: &str) -> Result<Rule> {
    let source = Source::new("<rule.rego>".to_string(), rego.to_string());
    let mut parser = Parser::new(&source)?;
    let rule = parser.parse_rule()?;
    if !parser.at_eof() {
        return Err(parser.error_here("unexpected input after rule"));
    }
    Ok(rule)
}
