pub mod eligibility;
pub mod keyword;

pub use eligibility::{EligibilityConfig, EligibilityStats};
pub use keyword::{KeywordConfig, KeywordStats};
