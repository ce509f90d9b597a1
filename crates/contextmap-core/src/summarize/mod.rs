mod invoker;

pub use invoker::{Summarizer, SummaryOutcome, SummaryRequest};
