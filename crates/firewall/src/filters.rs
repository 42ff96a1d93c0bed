//! Built-in filters.

pub mod external;
pub mod regex_pii;

pub use external::ExternalHttpFilter;
pub use regex_pii::RegexPiiFilter;
