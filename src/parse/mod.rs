mod markdown;

pub use markdown::{Header, ParsedDocument, parse_document};
