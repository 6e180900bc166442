// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::lexer::Location;
use crate::storage::StoreError;

use core::fmt;

use thiserror::Error;

/// Errors that abort an evaluation. They are wrapped in `anyhow::Error`;
/// use `downcast_ref::<EvalError>()` to inspect them.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("evaluation cancelled")]
    Cancelled,

    #[error("{}: {message}", OptLocation(.location))]
    Conflict {
        location: Option<Location>,
        message: String,
    },

    #[error("{}: {name}: {message}", OptLocation(.location))]
    Builtin {
        name: String,
        location: Option<Location>,
        message: String,
    },

    #[error("{}: recursion detected while evaluating {path}", OptLocation(.location))]
    Recursion {
        location: Option<Location>,
        path: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

struct OptLocation<'a>(&'a Option<Location>);

impl fmt::Display for OptLocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            Some(l) => write!(f, "{l}"),
            None => f.write_str("<unknown>"),
        }
    }
}
