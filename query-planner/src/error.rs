use apollo_compiler::validation::DiagnosticList;

/// Errors raised while building a query plan.
///
/// Planning is synchronous and pure, so none of these are retryable: each one describes either a
/// malformed request or a mismatch between the operation and the supergraph it is planned against.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlannerError {
    #[error("Must provide operation name if query contains multiple operations.")]
    AmbiguousOperation,
    #[error("Unknown operation named \"{name}\".")]
    UnknownOperation { name: String },
    #[error("Must provide an operation.")]
    NoOperation,
    #[error(
        "Cannot plan field \"{type_name}.{field_name}\": no key of \"{type_name}\" is usable by service \"{service}\""
    )]
    UnresolvableRequirement {
        type_name: String,
        field_name: String,
        service: String,
    },
    #[error("Couldn't find owning service for field \"{type_name}.{field_name}\"")]
    UnownedField {
        type_name: String,
        field_name: String,
    },
    #[error("Type condition \"{type_name}\" does not name a composite type of the supergraph")]
    InvalidTypeCondition { type_name: String },
    #[error("Cannot query field \"{field_name}\" on type \"{type_name}\"")]
    UnknownField {
        type_name: String,
        field_name: String,
    },
    #[error("Unknown fragment \"{name}\".")]
    UnknownFragment { name: String },
    #[error("{message}")]
    UnsupportedOperation { message: String },
    #[error("Invalid supergraph: {message}")]
    InvalidSupergraph { message: String },
    #[error("{message}")]
    InvalidGraphQL { message: String },
    #[error("An internal error has occurred, please report this bug to Apollo. Details: {message}")]
    Internal { message: String },
}

impl PlannerError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_supergraph(message: impl Into<String>) -> Self {
        Self::InvalidSupergraph {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_graphql(errors: &DiagnosticList) -> Self {
        Self::InvalidGraphQL {
            message: errors.to_string(),
        }
    }
}

pub type Result<T, E = PlannerError> = std::result::Result<T, E>;
