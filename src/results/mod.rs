pub mod provider;
pub mod sports;

pub use provider::ResultProvider;
pub use sports::SportsDbResults;
