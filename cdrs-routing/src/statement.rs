mod statement_params;
mod statement_params_builder;

pub use self::statement_params::StatementParams;
pub use self::statement_params_builder::StatementParamsBuilder;
