pub mod identifier;
pub mod locate;
pub mod mutate;
pub mod portfolio_ops;

pub use identifier::resolve;
pub use locate::{find, locate, EmbeddedChild, IdMatchRule, Located, ID_MATCH_RULES};
pub use mutate::AggregateMutator;
pub use portfolio_ops::PortfolioService;
