//! Rule model: conditions, embedded code fragments, rules and programs.

use regex::Regex;
use std::sync::OnceLock;

use crate::domain::tree::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionKind {
    /// Read-only pattern, consumes a child
    Match,
    /// `-`: consumes a child and removes it
    Remove,
    /// `+`: appends a new node to the matched context
    Create,
    /// `!`: the rule fails if any child satisfies the pattern
    Prevent,
}

impl ConditionKind {
    pub fn from_prefix(prefix: Option<char>) -> Option<Self> {
        match prefix {
            None => Some(Self::Match),
            Some('-') => Some(Self::Remove),
            Some('+') => Some(Self::Create),
            Some('!') => Some(Self::Prevent),
            Some(_) => None,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Match => "",
            Self::Remove => "-",
            Self::Create => "+",
            Self::Prevent => "!",
        }
    }

    /// Match and Remove conditions take a child of the context for themselves.
    pub fn consumes(&self) -> bool {
        matches!(self, Self::Match | Self::Remove)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Multiplicity {
    #[default]
    One,
    /// `*`: any number of children, including none
    Many,
}

/// One line of a rule and its nested block.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub kind: ConditionKind,
    pub label: String,
    pub variable: Option<String>,
    pub value: Option<Value>,
    pub children: Vec<Condition>,
    /// Declared with `::`
    pub ordered: bool,
    /// Declared with `=`
    pub exhaustive: bool,
    pub multiplicity: Multiplicity,
    pub line: usize,
}

impl Condition {
    pub fn new(kind: ConditionKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            variable: None,
            value: None,
            children: Vec::new(),
            ordered: false,
            exhaustive: false,
            multiplicity: Multiplicity::One,
            line: 0,
        }
    }

    pub fn with_variable(mut self, variable: impl Into<String>) -> Self {
        self.variable = Some(variable.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_children(mut self, children: Vec<Condition>) -> Self {
        self.children = children;
        self
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    pub fn exhaustive(mut self) -> Self {
        self.exhaustive = true;
        self
    }

    pub fn many(mut self) -> Self {
        self.multiplicity = Multiplicity::Many;
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    /// No nested block, no variable and no literal.
    pub fn is_plain_leaf(&self) -> bool {
        self.children.is_empty() && self.variable.is_none() && self.value.is_none()
    }

    pub fn is_many(&self) -> bool {
        self.multiplicity == Multiplicity::Many
    }

    /// Calls `f` on this condition and every nested one, in declaration order.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Condition)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").expect("static regex"))
}

/// A `< ...` line of embedded code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFragment {
    pub source: String,
    pub line: usize,
}

impl CodeFragment {
    pub fn new(source: impl Into<String>, line: usize) -> Self {
        Self {
            source: source.into(),
            line,
        }
    }

    /// Names referenced as `$Name`, in order of appearance, with repeats.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        variable_pattern()
            .captures_iter(&self.source)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
    }

    /// Source with every `$Name` passed through `replace`.
    pub fn rewrite(&self, replace: impl Fn(&str) -> String) -> String {
        variable_pattern()
            .replace_all(&self.source, |c: &regex::Captures| replace(&c[1]))
            .into_owned()
    }
}

/// A blank-line separated group of conditions and code.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rule {
    pub conditions: Vec<Condition>,
    pub code: Vec<CodeFragment>,
    /// Wrapped in the `^` pseudo-root: only the root context is searched
    pub anchored: bool,
    /// Top-level set declared with `^::`
    pub ordered: bool,
    /// Top-level set declared with `^:=`
    pub exhaustive: bool,
    /// First line of the rule in its source file
    pub line: usize,
}

impl Rule {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            ..Default::default()
        }
    }

    pub fn anchored(mut self) -> Self {
        self.anchored = true;
        self
    }

    pub fn ordered(mut self) -> Self {
        self.ordered = true;
        self
    }

    pub fn exhaustive(mut self) -> Self {
        self.exhaustive = true;
        self
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }

    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }

    /// All conditions of the rule, pre-order.
    pub fn flatten(&self) -> Vec<&Condition> {
        let mut all = Vec::new();
        for condition in &self.conditions {
            condition.visit(&mut |c| all.push(c));
        }
        all
    }
}

/// A parsed rule file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Verbatim text of the `%{ ... %}` header
    pub preamble: Option<String>,
    pub rules: Vec<Rule>,
}

impl Program {
    pub fn has_code(&self) -> bool {
        self.preamble.is_some() || self.rules.iter().any(Rule::has_code)
    }
}
