// Values, parameters, scopes and the lazy evaluator
pub mod error;
pub mod eval;
pub mod param;
pub mod path;
pub mod scope;
pub mod value;

// Re-export commonly used types
pub use error::{EvalError, Error, Result, SchemaError, UsageError, ValidityError};
pub use eval::{Binding, Eval};
pub use param::{Expr, Param};
pub use path::{parse_path, Seg};
pub use scope::{Mode, Probe, Scope};
pub use value::Value;
