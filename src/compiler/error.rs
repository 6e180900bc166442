// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::Location;

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// A ref index the analysis cannot characterize statically.
    UnsupportedDynamicIndex,
    /// A variable that no expression binds.
    UnsafeVar,
    UnknownFunction,
    ArityMismatch,
    /// `:=` of an already declared variable.
    Redeclared,
    /// Rules sharing a path disagree on their kind.
    KindConflict,
    MultipleDefaults,
    /// Assignment to `input` or `data`.
    RootShadowed,
}

#[derive(Debug, Clone)]
pub struct CompileError {
    pub location: Option<Location>,
    pub kind: CompileErrorKind,
    pub message: String,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, location: Option<&Location>, message: impl Into<String>) -> Self {
        Self {
            location: location.cloned(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.location {
            Some(l) => write!(f, "{l}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for CompileError {}

/// Errors collected over independent rules.
#[derive(Debug, Clone, Default)]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.0.iter()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} error", self.0.len())?;
        if self.0.len() != 1 {
            f.write_str("s")?;
        }
        f.write_str(" occurred during compilation")?;
        for e in &self.0 {
            write!(f, "\n{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}
